#![allow(dead_code)]

use glam::DVec3;
use pmcosmo_core::comm::Cluster;
use pmcosmo_core::power::PowerSpectrum;
use pmcosmo_core::Result;

/// Smooth, red test spectrum: most power well below the mesh Nyquist
/// frequency, small enough amplitude to stay linear.
pub fn test_spectrum() -> PowerSpectrum {
    PowerSpectrum::tabulate(1.0e-3, 20.0, 256, |k| 0.1 * (-(k / 0.5).powi(2)).exp() + 1.0e-12)
        .expect("tabulated spectrum")
}

/// Run `node` on `n` nodes and unwrap every node's result.
pub fn run_nodes<T, F>(n: usize, node: F) -> Vec<T>
where
    T: Send,
    F: Fn(pmcosmo_core::Communicator) -> Result<T> + Sync,
{
    Cluster::run(n, node)
        .expect("cluster")
        .into_iter()
        .enumerate()
        .map(|(rank, r)| r.unwrap_or_else(|e| panic!("node {} failed: {}", rank, e)))
        .collect()
}

/// Shortest periodic separation between two positions.
pub fn periodic_distance(a: DVec3, b: DVec3, box_size: f64) -> f64 {
    let d = a - b;
    let wrap = |x: f64| x - box_size * (x / box_size).round();
    DVec3::new(wrap(d.x), wrap(d.y), wrap(d.z)).length()
}

/// Deterministic pseudo-random positions in the box.
pub fn scattered_positions(count: usize, box_size: f64, seed: u64) -> Vec<DVec3> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            DVec3::new(
                rng.gen_range(0.0..box_size),
                rng.gen_range(0.0..box_size),
                rng.gen_range(0.0..box_size),
            )
        })
        .collect()
}
