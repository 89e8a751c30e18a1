mod common;

use glam::DVec3;
use pmcosmo_core::comm::{Cluster, Communicator};
use pmcosmo_core::decomposition::Decomposition;
use pmcosmo_core::error::Error;

#[test]
fn test_all_reduce_and_gather() {
    let results = common::run_nodes(4, |comm| {
        let sum = comm.all_reduce_sum_u64(comm.rank() as u64 + 1)?;
        let max = comm.all_reduce_max_f64(comm.rank() as f64 * 0.5)?;
        let gathered = comm.all_gather(comm.rank() * 10)?;
        Ok((sum, max, gathered))
    });
    for (rank, (sum, max, gathered)) in results.into_iter().enumerate() {
        assert_eq!(sum, 10, "node {} sum", rank);
        assert_eq!(max, 1.5, "node {} max", rank);
        assert_eq!(gathered, vec![0, 10, 20, 30], "node {} gather order", rank);
    }
}

#[test]
fn test_all_to_all_routes_by_rank() {
    let received = common::run_nodes(3, |comm| {
        let me = comm.rank();
        let send = (0..comm.size()).map(|d| vec![(me, d); d + 1]).collect();
        comm.all_to_all(send)
    });
    for (me, bufs) in received.into_iter().enumerate() {
        for (src, buf) in bufs.into_iter().enumerate() {
            assert_eq!(buf, vec![(src, me); me + 1], "buffer from {} to {}", src, me);
        }
    }
}

#[test]
fn test_broadcast_and_gather_to_root() {
    let results = common::run_nodes(3, |comm| {
        let value = comm.is_root().then(|| String::from("hello"));
        let b = comm.broadcast(0, value)?;
        let g = comm.gather_to_root(comm.rank())?;
        comm.barrier()?;
        Ok((b, g))
    });
    assert!(results.iter().all(|(b, _)| b == "hello"));
    assert_eq!(results[0].1, Some(vec![0, 1, 2]));
    assert_eq!(results[1].1, None);
    assert_eq!(results[2].1, None);
}

#[test]
fn test_diverging_collectives_fail_everywhere() {
    let results = Cluster::run(2, |comm| {
        if comm.rank() == 0 {
            comm.barrier()
        } else {
            comm.all_reduce_sum_u64(1).map(|_| ())
        }
    })
    .unwrap();
    for (rank, r) in results.into_iter().enumerate() {
        match r {
            Err(e @ Error::CollectiveMismatch { .. }) => assert!(e.is_fatal()),
            other => panic!("node {} expected a collective mismatch, got {:?}", rank, other),
        }
    }
}

#[test]
fn test_payload_type_is_checked() {
    let results = Cluster::run(2, |comm| {
        if comm.rank() == 0 {
            comm.all_reduce_sum_u64(1).map(|_| ())
        } else {
            comm.all_reduce_sum_f64(1.0).map(|_| ())
        }
    })
    .unwrap();
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(Error::CollectiveMismatch { .. }))));
}

#[test]
fn test_nodes_recover_after_mismatch() {
    let results = common::run_nodes(2, |comm| {
        let first = if comm.rank() == 0 {
            comm.barrier().is_err()
        } else {
            comm.all_gather(0u8).is_err()
        };
        let sum = comm.all_reduce_sum_u64(2)?;
        Ok((first, sum, comm.collective_count()))
    });
    assert_eq!(results, vec![(true, 4, 2), (true, 4, 2)]);
}

#[test]
fn test_cluster_rejects_zero_nodes() {
    assert!(matches!(
        Cluster::run(0, |_comm: Communicator| ()),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_owner_of_position() {
    let d = Decomposition::new(8, 16.0, 3).unwrap();
    assert_eq!(d.owner_of(DVec3::new(0.0, 1.0, 1.0)), Some(0));
    assert_eq!(d.owner_of(DVec3::new(6.1, 1.0, 1.0)), Some(1));
    assert_eq!(d.owner_of(DVec3::new(15.99, 1.0, 1.0)), Some(2));
    assert_eq!(d.owner_of(DVec3::new(16.0, 1.0, 1.0)), None);
    assert_eq!(d.owner_of(DVec3::new(1.0, -0.1, 1.0)), None);
    assert_eq!(d.owner_of(DVec3::new(f64::NAN, 1.0, 1.0)), None);
    assert_eq!(d.x_range(1), (6.0, 12.0));
}
