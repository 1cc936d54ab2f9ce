use ammpi::{Error, MpiWorld, MpiWorldBuilder, RequestId, Source, Tag};
use serial_test::serial;
use std::time::Duration;

fn world(localities: usize, ranks: usize, match_thread: bool) -> MpiWorld {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    MpiWorldBuilder::new()
        .with_localities(localities)
        .with_ranks(ranks)
        .with_threads(4)
        .with_match_thread(match_thread)
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
    ($name:ident, $body:ident, $localities:expr, $ranks:expr, $match_thread:expr) => {
        #[test]
        #[serial]
        fn $name() {
            $body(world($localities, $ranks, $match_thread));
        }
    };
}

fn ring(world: MpiWorld) {
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let (r, n) = (comm.rank(), comm.size());
        comm.send(&[r as u64, 7], (r + 1) % n, 3)?;
        let mut buf = [0u64; 2];
        let status = comm.recv(&mut buf, (r + n - 1) % n, 3).await?;
        assert_eq!(status.source, Some((r + n - 1) % n));
        assert_eq!(status.tag, Some(3));
        assert_eq!(status.count, 2);
        mpi.finalize().await?;
        Ok::<_, Error>(buf[0])
    }));
    let n = results.len() as u64;
    for (r, got) in results.into_iter().enumerate() {
        assert_eq!(got, (r as u64 + n - 1) % n);
    }
}

fn fifo_with_any_tag(world: MpiWorld) {
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let last = comm.size() - 1;
        let mut got = Vec::new();
        if comm.rank() == 0 {
            for i in 0..50i32 {
                comm.send(&[i], last, i % 4)?;
            }
        }
        if comm.rank() == last {
            for _ in 0..50 {
                let mut buf = [0i32];
                let status = comm.recv(&mut buf, 0usize, Tag::Any).await?;
                assert_eq!(status.tag, Some(buf[0] % 4));
                got.push(buf[0]);
            }
        }
        mpi.finalize().await?;
        Ok::<_, Error>(got)
    }));
    assert_eq!(results.last().unwrap(), &(0..50).collect::<Vec<i32>>());
}

fn tag_selective_out_of_order(world: MpiWorld) {
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mut got = Vec::new();
        if comm.rank() == 0 {
            comm.send(&[1.5f64], 1, 10)?;
            comm.send(&[2.5f64], 1, 20)?;
            comm.send(&[3.5f64], 1, 10)?;
        } else if comm.rank() == 1 {
            // tag 20 is overtaken by neither tag 10 message
            let mut buf = [0.0f64];
            comm.recv(&mut buf, 0usize, 20).await?;
            got.push(buf[0]);
            comm.recv(&mut buf, 0usize, 10).await?;
            got.push(buf[0]);
            comm.recv(&mut buf, 0usize, 10).await?;
            got.push(buf[0]);
        }
        mpi.finalize().await?;
        Ok::<_, Error>(got)
    }));
    assert_eq!(results[1], vec![2.5, 1.5, 3.5]);
}

fn any_source_waitall(world: MpiWorld) {
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mut sources = Vec::new();
        if comm.rank() == 0 {
            let mut requests = (1..comm.size())
                .map(|_| comm.irecv::<i16>(4, Source::Any, 5))
                .collect::<ammpi::Result<Vec<_>>>()?;
            let statuses = comm.waitall(&mut requests).await?;
            assert!(requests.iter().all(RequestId::is_null));
            for status in statuses {
                let data = status.to_vec::<i16>()?;
                let src = status.source.unwrap_or(0);
                assert_eq!(data, vec![src as i16; src]);
                sources.push(src);
            }
        } else {
            let payload = vec![comm.rank() as i16; comm.rank()];
            let mut req = comm.isend(&payload, 0, 5)?;
            let status = comm.wait(&mut req).await?;
            assert_eq!(status.count, comm.rank());
            assert_eq!(status.source, Some(0));
            assert!(req.is_null());
        }
        mpi.finalize().await?;
        Ok::<_, Error>(sources)
    }));
    let mut sources = results[0].clone();
    sources.sort_unstable();
    assert_eq!(sources, (1..results.len()).collect::<Vec<_>>());
}

fn many_outstanding_requests(world: MpiWorld) {
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let peer = comm.size() - 1 - comm.rank();
        let mut requests = Vec::new();
        for i in 0..24u8 {
            requests.push(comm.irecv::<u8>(1, peer, i as i32)?);
        }
        // sends go out in reverse tag order so every receive waits on a later arrival
        for i in (0..24u8).rev() {
            comm.send(&[i], peer, i as i32)?;
        }
        let statuses = comm.waitall(&mut requests).await?;
        let got = statuses
            .iter()
            .map(|s| s.to_vec::<u8>().map(|v| v[0]))
            .collect::<ammpi::Result<Vec<_>>>()?;
        mpi.finalize().await?;
        Ok::<_, Error>(got)
    }));
    for got in results {
        assert_eq!(got, (0..24).collect::<Vec<u8>>());
    }
}

create_test!(ring_1x4, ring, 1, 4, false);
create_test!(ring_3x6, ring, 3, 6, false);
create_test!(ring_2x4_matcher, ring, 2, 4, true);
create_test!(fifo_1x2, fifo_with_any_tag, 1, 2, false);
create_test!(fifo_2x4, fifo_with_any_tag, 2, 4, false);
create_test!(fifo_2x4_matcher, fifo_with_any_tag, 2, 4, true);
create_test!(tag_select_2x2, tag_selective_out_of_order, 2, 2, false);
create_test!(any_source_1x5, any_source_waitall, 1, 5, false);
create_test!(any_source_3x5_matcher, any_source_waitall, 3, 5, true);
create_test!(outstanding_2x2, many_outstanding_requests, 2, 2, false);

#[test]
#[serial]
fn request_table_grows() {
    let world = MpiWorldBuilder::new()
        .with_localities(2)
        .with_ranks(2)
        .with_threads(4)
        .with_request_capacity(2)
        .with_wait_timeout(Duration::from_secs(30))
        .build();
    many_outstanding_requests(world);
}

#[test]
#[serial]
fn waiting_on_null_request_is_empty() {
    let world = world(1, 1, false);
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mut req = RequestId::NULL;
        let status = comm.wait(&mut req).await?;
        mpi.finalize().await?;
        Ok::<_, Error>(status)
    }));
    assert_eq!(results[0].source, None);
    assert_eq!(results[0].count, 0);
}

#[test]
#[serial]
fn unmatched_receive_times_out() {
    let world = MpiWorldBuilder::new()
        .with_localities(1)
        .with_ranks(2)
        .with_threads(2)
        .with_wait_timeout(Duration::from_millis(200))
        .build();
    let results = world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mut waited = Ok(());
        if comm.rank() == 0 {
            let mut buf = [0u32];
            waited = comm.recv(&mut buf, 1usize, 99).await.map(|_| ());
        }
        Ok::<_, Error>(waited)
    });
    assert!(matches!(results[0], Ok(Err(Error::Timeout(_)))));
    assert!(matches!(results[1], Ok(Ok(()))));
}

#[test]
#[serial]
fn oversized_message_is_truncated() {
    let world = world(2, 2, false);
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let mut outcome = Ok(());
        if comm.rank() == 0 {
            comm.send(&[1u32, 2, 3, 4], 1, 0)?;
        } else {
            let mut buf = [0u32; 2];
            outcome = comm.recv(&mut buf, 0usize, 0).await.map(|_| ());
        }
        mpi.finalize().await?;
        Ok::<_, Error>(outcome)
    }));
    assert_eq!(results[0], Ok(()));
    assert!(matches!(
        results[1],
        Err(Error::Truncated {
            incoming: 16,
            capacity: 8
        })
    ));
}

#[test]
#[serial]
fn invalid_ranks_are_rejected() {
    let world = world(1, 2, false);
    let results = unwrap_all(world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        let send = comm.send(&[0u8], 5, 0);
        let recv = comm.irecv::<u8>(1, 7usize, 0);
        mpi.finalize().await?;
        Ok::<_, Error>((send, recv))
    }));
    for (send, recv) in results {
        assert_eq!(send, Err(Error::InvalidRank { rank: 5, size: 2 }));
        assert_eq!(recv, Err(Error::InvalidRank { rank: 7, size: 2 }));
    }
}
