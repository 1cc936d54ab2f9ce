use ammpi::{decide_ranks_per_node, status_code, Error, ErrorCode, MpiWorldBuilder, RankMap, ReduceOp};
use serial_test::serial;
use std::time::Duration;

#[test]
fn ranks_interleave_across_localities() {
    let map = RankMap::new(3, 7, 0);
    assert_eq!(map.size(), 7);
    assert_eq!(
        (0..3).map(|l| map.ranks_on(l)).collect::<Vec<_>>(),
        vec![3, 2, 2]
    );
    assert_eq!(map.rank_of(1, 1).unwrap(), 4);
    assert_eq!(map.locality_of(5).unwrap(), 2);
    assert_eq!(map.slot_of(6).unwrap(), 2);
    assert!(map.rank_of(2, 2).is_err());
    assert!(map.locality_of(7).is_err());

    assert_eq!(decide_ranks_per_node(0, 4, 100, 5), 5);
    assert_eq!(decide_ranks_per_node(3, 4, 0, 0), 1);
}

#[test]
#[serial]
fn outputs_come_back_by_rank() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let world = MpiWorldBuilder::new()
        .with_localities(3)
        .with_ranks_per_node(2)
        .with_threads(3)
        .build();
    assert_eq!(world.size(), 6);
    assert_eq!(world.num_localities(), 3);
    let results = world.run(|env| async move {
        let mpi = env.init().await?;
        let comm = mpi.world()?;
        assert_eq!(mpi.rank(), comm.rank());
        assert_eq!(comm.id(), 0);
        assert_eq!(comm.rank() % 3, env.locality());
        let out = (comm.rank(), comm.size(), env.locality());
        mpi.finalize().await?;
        Ok::<_, Error>(out)
    });
    for (rank, res) in results.into_iter().enumerate() {
        assert_eq!(res.unwrap(), (rank, 6, rank % 3));
    }
}

#[test]
#[serial]
fn context_requires_init() {
    let world = MpiWorldBuilder::new()
        .with_localities(2)
        .with_ranks(2)
        .with_threads(2)
        .with_wait_timeout(Duration::from_secs(30))
        .build();
    let results = world.run(|env| async move {
        let before = env.current().map(|_| ());
        let mpi = env.init().await?;
        let again = env.init().await?;
        assert_eq!(again.rank(), mpi.rank());
        let during = env.current().map(|mpi| mpi.rank());
        let closing = mpi.clone();
        mpi.finalize().await?;
        let after = closing.world().map(|_| ());
        let current = env.current().map(|_| ());
        Ok::<_, Error>((before, during, after, current))
    });
    for (rank, res) in results.into_iter().enumerate() {
        let (before, during, after, current) = res.unwrap();
        assert_eq!(before, Err(Error::NotInitialized));
        assert_eq!(during, Ok(rank));
        assert_eq!(after, Err(Error::NotInitialized));
        assert_eq!(current, Err(Error::NotInitialized));
    }
}

#[test]
#[serial]
fn finalize_is_idempotent() {
    let world = MpiWorldBuilder::new()
        .with_localities(1)
        .with_ranks(3)
        .with_threads(2)
        .build();
    let results = world.run(|env| async move {
        let mpi = env.init().await?;
        mpi.clone().finalize().await?;
        mpi.finalize().await
    });
    assert!(results.iter().all(|r| status_code(r) == ErrorCode::Success));
}

#[test]
#[serial]
fn world_runs_more_than_once() {
    let world = MpiWorldBuilder::new()
        .with_localities(2)
        .with_ranks(4)
        .with_threads(4)
        .with_wait_timeout(Duration::from_secs(30))
        .build();
    for round in 1..=3i64 {
        let results = world.run(move |env| async move {
            let mpi = env.init().await?;
            let comm = mpi.world()?;
            let mut sum = [0i64];
            comm.allreduce(&[round * comm.rank() as i64], &mut sum, ReduceOp::Sum)
                .await?;
            comm.barrier().await?;
            mpi.finalize().await?;
            Ok::<_, Error>(sum[0])
        });
        assert!(results.into_iter().all(|r| r.unwrap() == 6 * round));
    }
    assert!(world.bytes_sent() > 0);
}

#[test]
#[serial]
fn block_on_runs_plain_futures() {
    let world = MpiWorldBuilder::new().with_threads(2).build();
    assert_eq!(world.block_on(async { 21 * 2 }), 42);
}

#[test]
fn status_codes() {
    assert_eq!(ErrorCode::Success as i32, 0);
    assert_eq!(ErrorCode::Error as i32, -1);
    assert_eq!(ErrorCode::ErrorRecording as i32, -2);
    assert_eq!(ErrorCode::ErrorCompleting as i32, -3);
    assert_eq!(status_code::<()>(&Err(Error::Timeout(0.5))), ErrorCode::Error);
    assert_eq!(
        status_code::<()>(&Err(Error::Completing(3))),
        ErrorCode::ErrorCompleting
    );
}
