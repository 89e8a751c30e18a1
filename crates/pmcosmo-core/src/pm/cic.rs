//! Cloud-in-cell assignment and interpolation.
//!
//! The same stencil is used both ways, so the force a particle feels from
//! the mesh is the transpose of the mass it put there.
//!
//! Reference: Hockney & Eastwood, "Computer Simulation Using Particles", §5-3

use glam::DVec3;

use crate::decomposition::Slab;
use crate::grid::PlaneBuckets;

/// The 2×2×2 cells a particle touches and their weights.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CicStencil {
    /// Lower cell per axis.
    pub i0: [usize; 3],
    /// Upper cell per axis, `(i0 + 1) % n`.
    pub i1: [usize; 3],
    pub w0: [f64; 3],
    pub w1: [f64; 3],
}

impl CicStencil {
    /// Stencil of a position in `[0, box_size)` on an `n³` mesh.
    #[inline]
    pub fn new(position: DVec3, n: usize, box_size: f64) -> Self {
        let scale = n as f64 / box_size;
        let mut i0 = [0usize; 3];
        let mut i1 = [0usize; 3];
        let mut w0 = [0.0; 3];
        let mut w1 = [0.0; 3];

        for axis in 0..3 {
            let u = position[axis] * scale;
            let fl = u.floor();
            let mut lo = fl as usize;
            // u can round up to exactly n just below the box edge
            if lo >= n {
                lo -= n;
            }
            i0[axis] = lo;
            i1[axis] = (lo + 1) % n;
            w1[axis] = u - fl;
            w0[axis] = 1.0 - w1[axis];
        }

        Self { i0, i1, w0, w1 }
    }

    /// x plane and weight for corner `side` (0 = lower, 1 = upper).
    #[inline]
    pub fn x_plane(&self, side: usize) -> (usize, f64) {
        if side == 0 {
            (self.i0[0], self.w0[0])
        } else {
            (self.i1[0], self.w1[0])
        }
    }

    /// The four (y, z) cells of one x plane with their yz weights.
    #[inline]
    pub fn yz_cells(&self) -> [(usize, usize, f64); 4] {
        [
            (self.i0[1], self.i0[2], self.w0[1] * self.w0[2]),
            (self.i0[1], self.i1[2], self.w0[1] * self.w1[2]),
            (self.i1[1], self.i0[2], self.w1[1] * self.w0[2]),
            (self.i1[1], self.i1[2], self.w1[1] * self.w1[2]),
        ]
    }
}

/// Deposit `mass` per particle onto the x-slab `slab` of an `n³` mesh.
///
/// Plane `P` collects bucket `P` with the lower x weight, then bucket `P - 1`
/// with the upper one; each plane is written by exactly one task.
pub fn deposit(
    density: &mut [f64],
    slab: Slab,
    n: usize,
    stencils: &[CicStencil],
    buckets: &PlaneBuckets,
    mass: f64,
) {
    let plane_len = n * n;
    let fill = |(p_local, plane): (usize, &mut [f64])| {
        let p = slab.start + p_local;
        let below = (p + n - 1) % n;
        for (bucket, side) in [(p, 0), (below, 1)] {
            for &i in buckets.bucket(bucket) {
                let s = &stencils[i];
                let (_, wx) = s.x_plane(side);
                let m = mass * wx;
                for (iy, iz, wyz) in s.yz_cells() {
                    plane[iy * n + iz] += m * wyz;
                }
            }
        }
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        density.par_chunks_mut(plane_len).enumerate().for_each(fill);
    }

    #[cfg(not(feature = "parallel"))]
    density.chunks_mut(plane_len).enumerate().for_each(fill);
}

/// Force contributions `[lower x plane, upper x plane]` of one particle.
///
/// Only planes inside `slab` contribute; the other entry is zero and is
/// filled in by the node owning that plane.
#[inline]
pub fn interpolate(mesh: &[DVec3], slab: Slab, n: usize, stencil: &CicStencil) -> [DVec3; 2] {
    let mut parts = [DVec3::ZERO; 2];
    for (side, part) in parts.iter_mut().enumerate() {
        let (px, wx) = stencil.x_plane(side);
        if !slab.contains(px) {
            continue;
        }
        let base = (px - slab.start) * n * n;
        let mut acc = DVec3::ZERO;
        for (iy, iz, wyz) in stencil.yz_cells() {
            acc += wyz * mesh[base + iy * n + iz];
        }
        *part = wx * acc;
    }
    parts
}
