//! Distributed 3-D complex FFT over a slab decomposition.
//!
//! Configuration space is stored as x-slabs, index `(ix_local * n + iy) * n + iz`.
//! Fourier space is stored transposed as y-slabs, index
//! `(iy_local * n + ix) * n + iz`, the same layout a transposed-output MPI FFT
//! produces. The forward transform runs z, y, then (after an all-to-all
//! transpose) x; the inverse runs the same passes backwards and divides by n³.
//!
//! Every 1-D line sees exactly the same input regardless of how many nodes
//! share the mesh, so the result does not depend on the decomposition.

use std::sync::Arc;

use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::comm::Communicator;
use crate::decomposition::{Decomposition, Slab};
use crate::error::{Error, Result};
use crate::math::try_filled;

pub struct SlabFft {
    n: usize,
    rank: usize,
    slabs: Vec<Slab>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl SlabFft {
    pub fn new(decomposition: &Decomposition, rank: usize) -> Result<Self> {
        if rank >= decomposition.n_nodes() {
            return Err(Error::InvalidArgument(format!(
                "rank {} outside a {}-node decomposition",
                rank,
                decomposition.n_nodes()
            )));
        }
        let n = decomposition.grid_size();
        let mut planner = FftPlanner::<f64>::new();
        log::debug!("[fft] planning {}^3 transforms for node {}", n, rank);
        Ok(Self {
            n,
            rank,
            slabs: decomposition.slabs().to_vec(),
            forward: planner.plan_fft_forward(n),
            inverse: planner.plan_fft_inverse(n),
        })
    }

    pub fn grid_size(&self) -> usize {
        self.n
    }

    /// Planes of configuration space held by this node (x-slab).
    pub fn local_x(&self) -> Slab {
        self.slabs[self.rank]
    }

    /// Planes of Fourier space held by this node (transposed y-slab).
    pub fn local_y(&self) -> Slab {
        self.slabs[self.rank]
    }

    pub fn local_len(&self) -> usize {
        self.local_x().len * self.n * self.n
    }

    /// Zeroed buffer of the local slab size.
    pub fn allocate(&self) -> Result<Vec<Complex64>> {
        try_filled(self.local_len(), Complex64::new(0.0, 0.0), "mesh cells")
    }

    /// x-slab configuration space → y-slab Fourier space (unnormalised).
    pub fn forward(&self, comm: &Communicator, mut data: Vec<Complex64>) -> Result<Vec<Complex64>> {
        self.check_len(&data)?;
        let n = self.n;
        lines_contiguous(&mut data, n, &self.forward);
        lines_strided(&mut data, n, &self.forward);
        let mut out = self.transpose(comm, data)?;
        lines_strided(&mut out, n, &self.forward);
        Ok(out)
    }

    /// y-slab Fourier space → x-slab configuration space, divided by n³.
    pub fn inverse(&self, comm: &Communicator, mut data: Vec<Complex64>) -> Result<Vec<Complex64>> {
        self.check_len(&data)?;
        let n = self.n;
        lines_strided(&mut data, n, &self.inverse);
        let mut out = self.transpose(comm, data)?;
        lines_strided(&mut out, n, &self.inverse);
        lines_contiguous(&mut out, n, &self.inverse);

        let scale = 1.0 / (n as f64).powi(3);
        for v in out.iter_mut() {
            *v *= scale;
        }
        Ok(out)
    }

    /// Visit every local Fourier mode with its global `[ix, iy, iz]` bin indices.
    pub fn for_each_mode<F>(&self, data: &mut [Complex64], f: F)
    where
        F: Fn([usize; 3], &mut Complex64) + Sync + Send,
    {
        let n = self.n;
        let y0 = self.local_y().start;
        let visit = |(iy_local, plane): (usize, &mut [Complex64])| {
            let iy = y0 + iy_local;
            for (j, v) in plane.iter_mut().enumerate() {
                f([j / n, iy, j % n], v);
            }
        };

        #[cfg(feature = "parallel")]
        data.par_chunks_mut(n * n).enumerate().for_each(visit);

        #[cfg(not(feature = "parallel"))]
        data.chunks_mut(n * n).enumerate().for_each(visit);
    }

    fn check_len(&self, data: &[Complex64]) -> Result<()> {
        if data.len() != self.local_len() {
            return Err(Error::InvalidArgument(format!(
                "slab buffer has {} cells, expected {}",
                data.len(),
                self.local_len()
            )));
        }
        Ok(())
    }

    /// Exchange slabs so the slow axis switches between x and y.
    fn transpose(&self, comm: &Communicator, data: Vec<Complex64>) -> Result<Vec<Complex64>> {
        let n = self.n;
        let mine = self.slabs[self.rank];

        // Outgoing block for d: [my slow plane][d's fast range][z]
        let send: Vec<Vec<Complex64>> = self
            .slabs
            .iter()
            .map(|dest| {
                let mut block = Vec::with_capacity(mine.len * dest.len * n);
                for p in 0..mine.len {
                    for q in dest.start..dest.end() {
                        let base = (p * n + q) * n;
                        block.extend_from_slice(&data[base..base + n]);
                    }
                }
                block
            })
            .collect();
        drop(data);

        let received = comm.all_to_all(send)?;

        let mut out = self.allocate()?;
        for (src, block) in self.slabs.iter().zip(received) {
            // block layout: [src slow plane][my fast plane][z]
            if block.len() != src.len * mine.len * n {
                return Err(Error::CollectiveMismatch {
                    rank: self.rank,
                    message: format!("transpose block of {} cells from a {}-plane slab", block.len(), src.len),
                });
            }
            for p in 0..src.len {
                for q in 0..mine.len {
                    let from = (p * mine.len + q) * n;
                    let to = (q * n + src.start + p) * n;
                    out[to..to + n].copy_from_slice(&block[from..from + n]);
                }
            }
        }
        Ok(out)
    }
}

/// Transform every contiguous run of `n` values (the fast z axis).
fn lines_contiguous(data: &mut [Complex64], n: usize, fft: &Arc<dyn Fft<f64>>) {
    if data.is_empty() {
        return;
    }

    #[cfg(feature = "parallel")]
    data.par_chunks_mut(n * n).for_each(|plane| fft.process(plane));

    #[cfg(not(feature = "parallel"))]
    fft.process(data);
}

/// Transform along the middle axis of each `n × n` plane (stride `n`).
fn lines_strided(data: &mut [Complex64], n: usize, fft: &Arc<dyn Fft<f64>>) {
    if data.is_empty() {
        return;
    }
    let plane_len = n * n;

    let process_plane = |plane: &mut [Complex64], scratch: &mut Vec<Complex64>| {
        scratch.clear();
        for z in 0..n {
            scratch.extend((0..n).map(|m| plane[m * n + z]));
        }
        fft.process(scratch);
        for z in 0..n {
            for m in 0..n {
                plane[m * n + z] = scratch[z * n + m];
            }
        }
    };

    #[cfg(feature = "parallel")]
    data.par_chunks_mut(plane_len)
        .for_each_init(|| Vec::with_capacity(plane_len), |scratch, plane| {
            process_plane(plane, scratch)
        });

    #[cfg(not(feature = "parallel"))]
    {
        let mut scratch = Vec::with_capacity(plane_len);
        for plane in data.chunks_mut(plane_len) {
            process_plane(plane, &mut scratch);
        }
    }
}
