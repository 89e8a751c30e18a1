//! Collectives over MPI. Runs as a singleton world under `cargo test
//! --features mpi`, or on several ranks with `mpirun -n 3 <test binary>`.
#![cfg(feature = "mpi")]

use glam::DVec3;
use pmcosmo_core::comm::Communicator;
use pmcosmo_core::pm::{PmConfig, PmSolver};
use pmcosmo_core::particle::ParticleEnsemble;

/// One test function: MPI can be initialised once per process.
#[test]
fn test_mpi_collectives_and_force() {
    let universe = mpi::initialize().expect("MPI initialisation");
    let comm = Communicator::from_mpi(universe.world());
    let (rank, size) = (comm.rank(), comm.size());

    let gathered = comm.all_gather(rank as u64 * 10).unwrap();
    assert_eq!(gathered, (0..size as u64).map(|r| r * 10).collect::<Vec<_>>(), "all_gather order");
    assert_eq!(comm.all_reduce_sum_u64(1).unwrap(), size as u64);

    let send: Vec<Vec<(usize, usize)>> = (0..size).map(|d| vec![(rank, d); d + 1]).collect();
    let received = comm.all_to_all(send).unwrap();
    for (src, buf) in received.into_iter().enumerate() {
        assert_eq!(buf, vec![(src, rank); rank + 1], "buffer from {}", src);
    }

    let greeting = comm.broadcast(0, comm.is_root().then(|| String::from("hello"))).unwrap();
    assert_eq!(greeting, "hello");
    let ranks = comm.gather_to_root(rank).unwrap();
    if comm.is_root() {
        assert_eq!(ranks, Some((0..size).collect()));
    } else {
        assert_eq!(ranks, None);
    }
    comm.barrier().unwrap();

    let config = PmConfig {
        nc: 16,
        box_size: 16.0,
        ..PmConfig::default()
    };
    let pm = PmSolver::new(config, &comm).unwrap();
    let mut e = ParticleEnsemble::allocate_for_node(2, 16.0, rank, size).unwrap();
    if comm.is_root() {
        e.append(&[DVec3::new(6.5, 8.5, 8.5), DVec3::new(10.5, 8.5, 8.5)]).unwrap();
    }
    pm.compute_force(&comm, &mut e).unwrap();
    if comm.is_root() {
        let f = e.forces().expect("forces after compute_force");
        assert!(f[0].x < 0.0 && f[1].x > 0.0, "potential gradient points away from the partner: {:?}", f);
    }
    assert!(comm.collective_count() > 6);
}
