use ammpi::{Error, ErrorCode, Logical, MpiWorld, MpiWorldBuilder, ReduceOp, ValueIndex};
use serial_test::serial;
use std::time::Duration;

fn world(localities: usize, ranks: usize) -> MpiWorld {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    MpiWorldBuilder::new()
        .with_localities(localities)
        .with_ranks(ranks)
        .with_threads(4)
        .with_wait_timeout(Duration::from_secs(30))
        .build()
}

fn unwrap_all<T>(results: Vec<ammpi::Result<T>>) -> Vec<T> {
    results
        .into_iter()
        .enumerate()
        .map(|(rank, r)| r.unwrap_or_else(|e| panic!("rank {rank} failed: {e}")))
        .collect()
}

macro_rules! create_test {
    ($name:ident, $body:ident, $localities:expr, $ranks:expr) => {
        #[test]
        #[serial]
        fn $name() {
            $body(world($localities, $ranks));
        }
    };
}

fn bcast_content(world: MpiWorld) {
    let size = world.size();
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mut seen = Vec::new();
        for root in 0..comm.size() {
            let mut buf = vec![0u32; 64];
            if comm.rank() == root {
                buf.iter_mut()
                    .enumerate()
                    .for_each(|(i, b)| *b = (root * 1000 + i) as u32);
            }
            comm.bcast(&mut buf, root).await?;
            seen.push(buf);
        }
        mpi.finalize().await?;
        Ok::<_, Error>(seen)
    }));
    for seen in results {
        for (root, buf) in seen.iter().enumerate() {
            let expected: Vec<u32> = (0..64).map(|i| (root * 1000 + i) as u32).collect();
            assert_eq!(buf, &expected);
        }
        assert_eq!(seen.len(), size);
    }
}

fn gatherv_displacements(world: MpiWorld) {
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let counts = [2usize, 0, 3];
        let displs = [0usize, 2, 2];
        let send: Vec<i32> = (0..counts[comm.rank()])
            .map(|i| (comm.rank() * 10 + i) as i32)
            .collect();
        let mut recv = vec![-1i32; 5];
        comm.gatherv(&send, &mut recv, &counts, &displs, 0).await?;
        mpi.finalize().await?;
        Ok::<_, Error>(recv)
    }));
    assert_eq!(results[0], vec![0, 1, 20, 21, 22]);
    assert_eq!(results[1], vec![-1; 5]);
}

fn reduce_sum_and_max(world: MpiWorld) {
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let sum_in = [1i32, 2, 3, 4, 5];
        let max_in = [3i32, 1, 4, 1, 5];
        let mut sum = [0i32];
        let mut max = [0i32];
        comm.reduce(&[sum_in[comm.rank()]], &mut sum, ReduceOp::Sum, 0)
            .await?;
        comm.reduce(&[max_in[comm.rank()]], &mut max, ReduceOp::Max, comm.size() - 1)
            .await?;
        mpi.finalize().await?;
        Ok::<_, Error>((sum[0], max[0]))
    }));
    let size = results.len();
    assert_eq!(results[0].0, [1, 2, 3, 4, 5][..size].iter().sum::<i32>());
    assert_eq!(
        results[size - 1].1,
        *[3, 1, 4, 1, 5][..size].iter().max().unwrap()
    );
}

fn allreduce_round_trip(world: MpiWorld) {
    let size = world.size();
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let r = comm.rank();
        let ints = [r as i64, 2 * r as i64, 1];
        let mut int_out = [0i64; 3];
        comm.allreduce(&ints, &mut int_out, ReduceOp::Sum).await?;
        let floats = [0.5 * r as f64, 1.25];
        let mut float_out = [0.0f64; 2];
        comm.allreduce(&floats, &mut float_out, ReduceOp::Sum).await?;
        mpi.finalize().await?;
        Ok::<_, Error>((int_out, float_out))
    }));
    let serial: i64 = (0..size as i64).sum();
    for (ints, floats) in results {
        assert_eq!(ints, [serial, 2 * serial, size as i64]);
        assert_eq!(floats, [0.5 * serial as f64, 1.25 * size as f64]);
    }
}

fn allgather_everywhere(world: MpiWorld) {
    let size = world.size();
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mine = [comm.rank() as i16, 100 + comm.rank() as i16];
        let mut all = vec![0i16; 2 * comm.size()];
        comm.allgather(&mine, &mut all).await?;

        // rank r contributes r elements, packed back to back
        let counts: Vec<usize> = (0..comm.size()).collect();
        let displs: Vec<usize> = (0..comm.size()).map(|r| r * (r.max(1) - 1) / 2).collect();
        let mut packed = vec![0i16; counts.iter().sum()];
        let send = vec![comm.rank() as i16; comm.rank()];
        comm.allgatherv(&send, &mut packed, &counts, &displs).await?;
        mpi.finalize().await?;
        Ok::<_, Error>((all, packed))
    }));
    let expected: Vec<i16> = (0..size as i16).flat_map(|r| [r, 100 + r]).collect();
    let packed: Vec<i16> = (0..size as i16).flat_map(|r| vec![r; r as usize]).collect();
    for (all, got) in results {
        assert_eq!(all, expected);
        assert_eq!(got, packed);
    }
}

fn alltoall_exchange(world: MpiWorld) {
    let size = world.size();
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let (r, n) = (comm.rank(), comm.size());
        let send: Vec<u64> = (0..n).flat_map(|d| [(r * 100 + d) as u64; 2]).collect();
        let mut recv = vec![0u64; 2 * n];
        comm.alltoall(&send, &mut recv).await?;

        // rank r sends d+1 elements to rank d
        let scounts: Vec<usize> = (0..n).map(|d| d + 1).collect();
        let sdispls: Vec<usize> = (0..n).map(|d| d * (d + 1) / 2).collect();
        let vsend: Vec<u64> = (0..n)
            .flat_map(|d| vec![(r * 100 + d) as u64; d + 1])
            .collect();
        let rcounts = vec![r + 1; n];
        let rdispls: Vec<usize> = (0..n).map(|s| s * (r + 1)).collect();
        let mut vrecv = vec![0u64; n * (r + 1)];
        comm.alltoallv(&vsend, &scounts, &sdispls, &mut vrecv, &rcounts, &rdispls)
            .await?;
        mpi.finalize().await?;
        Ok::<_, Error>((recv, vrecv))
    }));
    for (r, (recv, vrecv)) in results.into_iter().enumerate() {
        let expected: Vec<u64> = (0..size).flat_map(|s| [(s * 100 + r) as u64; 2]).collect();
        assert_eq!(recv, expected);
        let vexpected: Vec<u64> = (0..size)
            .flat_map(|s| vec![(s * 100 + r) as u64; r + 1])
            .collect();
        assert_eq!(vrecv, vexpected);
    }
}

fn scatter_blocks(world: MpiWorld) {
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let n = comm.size();
        let root = n / 2;
        let send: Vec<f32> = if comm.rank() == root {
            (0..3 * n).map(|i| i as f32).collect()
        } else {
            Vec::new()
        };
        let mut block = [0.0f32; 3];
        comm.scatter(&send, &mut block, root).await?;

        // rank r receives r elements from the tail of the root buffer
        let counts: Vec<usize> = (0..n).collect();
        let displs: Vec<usize> = (0..n).map(|r| 3 * n - r).collect();
        let mut tail = vec![0.0f32; comm.rank()];
        comm.scatterv(&send, &counts, &displs, &mut tail, root).await?;
        mpi.finalize().await?;
        Ok::<_, Error>((block, tail))
    }));
    let n = results.len();
    for (r, (block, tail)) in results.into_iter().enumerate() {
        assert_eq!(block, [(3 * r) as f32, (3 * r + 1) as f32, (3 * r + 2) as f32]);
        let expected: Vec<f32> = (3 * n - r..3 * n).map(|i| i as f32).collect();
        assert_eq!(tail, expected);
    }
}

fn unsupported_reduction_fails_everywhere(world: MpiWorld) {
    let results = world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mut out = [0i32];
        let bad = comm.reduce(&[1i32], &mut out, ReduceOp::Lor, 0).await;
        // collectives after the failure still line up
        let mut total = [0i32];
        comm.allreduce(&[1i32], &mut total, ReduceOp::Sum).await?;
        mpi.finalize().await?;
        Ok::<_, Error>((bad, total[0]))
    });
    let size = results.len();
    for res in results {
        let (bad, total) = res.unwrap();
        let err = bad.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Error);
        assert!(matches!(err, Error::UnsupportedReduction { op: ReduceOp::Lor, .. }));
        assert_eq!(total, size as i32);
    }
}

fn logical_and_location_reductions(world: MpiWorld) {
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let r = comm.rank();
        let mut any = [Logical(false)];
        comm.allreduce(&[Logical(r == 1)], &mut any, ReduceOp::Lor).await?;
        let mut loc = [ValueIndex::default()];
        let value = ((r as f64) - 1.0).abs();
        comm.allreduce(&[ValueIndex::new(value, r as f64)], &mut loc, ReduceOp::MinLoc)
            .await?;
        mpi.finalize().await?;
        Ok::<_, Error>((any[0], loc[0]))
    }));
    for (any, loc) in results {
        assert_eq!(any, Logical(true));
        assert_eq!(loc, ValueIndex::new(0.0, 1.0));
    }
}

create_test!(bcast_1x3, bcast_content, 1, 3);
create_test!(bcast_2x5, bcast_content, 2, 5);
create_test!(gatherv_1x3, gatherv_displacements, 1, 3);
create_test!(gatherv_3x3, gatherv_displacements, 3, 3);
create_test!(reduce_1x4, reduce_sum_and_max, 1, 4);
create_test!(reduce_2x5, reduce_sum_and_max, 2, 5);
create_test!(allreduce_1x1, allreduce_round_trip, 1, 1);
create_test!(allreduce_3x7, allreduce_round_trip, 3, 7);
create_test!(allgather_2x4, allgather_everywhere, 2, 4);
create_test!(alltoall_1x3, alltoall_exchange, 1, 3);
create_test!(alltoall_2x4, alltoall_exchange, 2, 4);
create_test!(scatter_2x3, scatter_blocks, 2, 3);
create_test!(unsupported_reduce_2x4, unsupported_reduction_fails_everywhere, 2, 4);
create_test!(logical_reduce_2x3, logical_and_location_reductions, 2, 3);

#[test]
#[serial]
fn dictionaries_grow_under_load() {
    let world = MpiWorldBuilder::new()
        .with_localities(2)
        .with_ranks(4)
        .with_threads(4)
        .with_dict_capacity(1)
        .with_wait_timeout(Duration::from_secs(30))
        .build();
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mut last = Vec::new();
        // non-roots race ahead, so the root's dictionary holds many live transactions at once
        for round in 0..40u32 {
            let mut recv = vec![0u32; comm.size()];
            comm.gather(&[round * 10 + comm.rank() as u32], &mut recv, 0)
                .await?;
            if comm.rank() == 0 {
                assert_eq!(
                    recv,
                    (0..comm.size() as u32).map(|r| round * 10 + r).collect::<Vec<_>>()
                );
                last = recv;
            }
        }
        mpi.finalize().await?;
        Ok::<_, Error>(last)
    }));
    assert_eq!(results[0], vec![390, 391, 392, 393]);
}

#[test]
#[serial]
fn zero_length_collectives_return_immediately() {
    let world = world(2, 3);
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        comm.bcast::<i32>(&mut [], 0).await?;
        comm.gather::<i32>(&[], &mut [], 1).await?;
        comm.reduce::<f64>(&[], &mut [], ReduceOp::Sum, 2).await?;
        comm.alltoall::<u8>(&[], &mut []).await?;
        let mut after = [comm.rank() as i32];
        comm.bcast(&mut after, 2).await?;
        mpi.finalize().await?;
        Ok::<_, Error>(after[0])
    }));
    assert_eq!(results, vec![2, 2, 2]);
}

#[test]
#[serial]
fn late_root_still_gathers() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let world = MpiWorldBuilder::new()
        .with_localities(2)
        .with_ranks(3)
        .with_threads(4)
        .with_wait_timeout(Duration::from_millis(200))
        .build();
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mut recv = vec![u32::MAX; 3];
        if comm.rank() == 0 {
            // every contribution lands well past the wait deadline
            async_std::task::sleep(Duration::from_millis(500)).await;
        }
        comm.gather(&[comm.rank() as u32 * 7], &mut recv, 0).await?;
        Ok::<_, Error>(recv)
    }));
    assert_eq!(results[0], vec![0, 7, 14]);
    assert_eq!(results[1], vec![u32::MAX; 3]);
    assert_eq!(results[2], vec![u32::MAX; 3]);
}
