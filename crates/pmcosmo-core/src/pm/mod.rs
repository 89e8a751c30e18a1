//! Particle-mesh gravity on a slab-decomposed periodic mesh.
//!
//! 1. Validate that every particle lies inside the box (collective).
//! 2. Ship particle copies to the owners of their CIC planes.
//! 3. CIC deposit, δ = ρ / ρ̄ − 1.
//! 4. Forward FFT, `f_k = −i g(k) δ_k / (k² W(k))` per axis, inverse FFT.
//! 5. CIC interpolation on the owned planes, partial forces shipped back.
//!
//! The stored force is the potential gradient `∇φ` with `∇²φ = δ`, in the
//! same length units as the LPT displacements. The acceleration is `−∇φ`,
//! so in the linear regime the stored force equals `−D1 ψ1`.

pub mod cic;
mod exchange;

use std::f64::consts::PI;

use glam::DVec3;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::comm::Communicator;
use crate::decomposition::{Decomposition, Slab};
use crate::error::{Error, Result};
use crate::fft::SlabFft;
use crate::grid::PlaneBuckets;
use crate::math::{in_box, is_nyquist, signed_mode, sinc, try_filled};
use crate::particle::ParticleEnsemble;

use self::cic::CicStencil;
use self::exchange::{GhostExchange, MeshParticle};

/// Discrete form of the inverse Laplacian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GreenFunction {
    /// `1 / k²`
    #[default]
    Continuous,
    /// `1 / Σ (2/Δ sin(k Δ / 2))²`, the 7-point finite-difference Laplacian
    FiniteDifference,
}

/// Discrete form of the gradient, `g(k)` in place of `k`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gradient {
    /// `i k`, zero at Nyquist. Rings with alternating sign around particles
    /// that sit exactly on mesh nodes.
    #[default]
    Spectral,
    /// Four-point central difference, `i (8 sin(kΔ) − sin(2kΔ)) / 6Δ`.
    FiniteDifference,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PmConfig {
    /// Particles per side of the initial lattice.
    pub nc: usize,
    /// Mesh cells per particle spacing.
    pub mesh_factor: usize,
    pub box_size: f64,
    pub green: GreenFunction,
    #[serde(default)]
    pub gradient: Gradient,
    /// Divide by the CIC window of the mass assignment.
    pub deconvolve: bool,
}

impl Default for PmConfig {
    fn default() -> Self {
        Self {
            nc: 64,
            mesh_factor: 1,
            box_size: 64.0,
            green: GreenFunction::Continuous,
            gradient: Gradient::Spectral,
            deconvolve: true,
        }
    }
}

impl PmConfig {
    pub fn grid_size(&self) -> usize {
        self.nc * self.mesh_factor
    }

    /// Mass per particle in units of the mean mesh density.
    pub fn particle_mass(&self) -> f64 {
        (self.mesh_factor as f64).powi(3)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nc < 2 {
            return Err(Error::InvalidArgument(format!("nc must be at least 2, got {}", self.nc)));
        }
        if self.mesh_factor == 0 {
            return Err(Error::InvalidArgument("mesh factor must be positive".into()));
        }
        if !(self.box_size.is_finite() && self.box_size > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "box size must be positive, got {}",
                self.box_size
            )));
        }
        Ok(())
    }
}

/// Node-local slab of the deposited density, in units of the mean.
pub struct DensityField {
    slab: Slab,
    n: usize,
    density: Vec<f64>,
}

impl DensityField {
    pub fn slab(&self) -> Slab {
        self.slab
    }

    pub fn grid_size(&self) -> usize {
        self.n
    }

    /// ρ / ρ̄ at x-slab index `(ix_local * n + iy) * n + iz`.
    pub fn density(&self) -> &[f64] {
        &self.density
    }

    /// Density contrast δ = ρ / ρ̄ − 1 (copy).
    pub fn contrast(&self) -> Vec<f64> {
        self.density.iter().map(|rho| rho - 1.0).collect()
    }

    /// Collective: total deposited mass over all nodes.
    pub fn total_mass(&self, comm: &Communicator) -> Result<f64> {
        comm.all_reduce_sum_f64(self.density.iter().sum())
    }

    /// Collective: true if the global mean density is 1 within `tolerance`.
    pub fn check_mean(&self, comm: &Communicator, tolerance: f64) -> Result<bool> {
        let cells = (self.n as f64).powi(3);
        let mean = self.total_mass(comm)? / cells;
        let ok = (mean - 1.0).abs() <= tolerance;
        if !ok {
            log::warn!("[pm] mean density {} differs from 1 by more than {}", mean, tolerance);
        }
        Ok(ok)
    }
}

pub struct PmSolver {
    config: PmConfig,
    decomposition: Decomposition,
    fft: SlabFft,
}

impl PmSolver {
    pub fn new(config: PmConfig, comm: &Communicator) -> Result<Self> {
        config.validate()?;
        let decomposition = Decomposition::new(config.grid_size(), config.box_size, comm.size())?;
        let fft = SlabFft::new(&decomposition, comm.rank())?;
        Ok(Self {
            config,
            decomposition,
            fft,
        })
    }

    pub fn config(&self) -> &PmConfig {
        &self.config
    }

    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    /// Collective: deposit the ensemble onto this node's mesh slab.
    pub fn compute_density(&self, comm: &Communicator, ensemble: &ParticleEnsemble) -> Result<DensityField> {
        self.check_positions(comm, ensemble)?;
        let (_, mesh_particles) = GhostExchange::scatter(comm, &self.decomposition, ensemble.as_slice())?;
        self.deposit(&mesh_particles)
    }

    /// Collective: compute the PM force on every local particle.
    ///
    /// Only the ensemble's forces are written.
    pub fn compute_force(&self, comm: &Communicator, ensemble: &mut ParticleEnsemble) -> Result<()> {
        self.check_positions(comm, ensemble)?;

        // ==== 1. Ship copies to the plane owners ====
        let (exchange, mesh_particles) =
            GhostExchange::scatter(comm, &self.decomposition, ensemble.as_slice())?;

        // ==== 2. Density ====
        let density = self.deposit(&mesh_particles)?;
        let mut delta = self.fft.allocate()?;
        for (d, rho) in delta.iter_mut().zip(&density.density) {
            *d = Complex64::new(rho - 1.0, 0.0);
        }
        drop(density);

        // ==== 3. Force mesh ====
        let delta_k = self.fft.forward(comm, delta)?;
        let mesh = self.force_mesh(comm, &delta_k)?;
        drop(delta_k);

        // ==== 4. Interpolate on owned planes and route back ====
        let slab = self.fft.local_x();
        let n = self.decomposition.grid_size();

        #[cfg(feature = "parallel")]
        let partials: Vec<[DVec3; 2]> = mesh_particles
            .par_iter()
            .map(|mp| cic::interpolate(&mesh, slab, n, &mp.stencil))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let partials: Vec<[DVec3; 2]> = mesh_particles
            .iter()
            .map(|mp| cic::interpolate(&mesh, slab, n, &mp.stencil))
            .collect();

        let force = exchange.gather(comm, partials)?;
        ensemble.set_forces(force)?;

        log::info!(
            "[pm] node {} computed forces for {} particles on a {}^3 mesh",
            comm.rank(),
            ensemble.len(),
            n
        );
        Ok(())
    }

    // ---------- helper functions ----------

    /// Collective: every node fails with the same error if any particle is outside the box.
    fn check_positions(&self, comm: &Communicator, ensemble: &ParticleEnsemble) -> Result<()> {
        let l = self.decomposition.box_size();
        if ensemble.box_size() != l {
            log::warn!(
                "[pm] ensemble box size {} differs from mesh box size {}",
                ensemble.box_size(),
                l
            );
        }

        let first_bad = ensemble
            .as_slice()
            .iter()
            .position(|p| !in_box(p.position, l))
            .map(|i| {
                let x = ensemble.as_slice()[i].position;
                (comm.rank(), i, [x.x, x.y, x.z])
            });

        let reports = comm.all_gather(first_bad)?;
        if let Some((rank, index, [x, y, z])) = reports.into_iter().flatten().next() {
            return Err(Error::DecompositionMismatch { rank, index, x, y, z });
        }
        Ok(())
    }

    fn deposit(&self, mesh_particles: &[MeshParticle]) -> Result<DensityField> {
        let n = self.decomposition.grid_size();
        let slab = self.fft.local_x();

        let stencils: Vec<CicStencil> = mesh_particles.iter().map(|mp| mp.stencil).collect();
        let planes: Vec<usize> = stencils.iter().map(|s| s.i0[0]).collect();
        let ids: Vec<u64> = mesh_particles.iter().map(|mp| mp.id).collect();
        let buckets = PlaneBuckets::build(n, &planes, &ids);

        let mut density = try_filled(self.fft.local_len(), 0.0, "density mesh cells")?;
        cic::deposit(
            &mut density,
            slab,
            n,
            &stencils,
            &buckets,
            self.config.particle_mass(),
        );

        Ok(DensityField { slab, n, density })
    }

    /// Three force components on this node's x-slab from `delta_k`.
    fn force_mesh(&self, comm: &Communicator, delta_k: &[Complex64]) -> Result<Vec<DVec3>> {
        let n = self.decomposition.grid_size();
        let kernel = GreenKernel::new(&self.config, n);
        let mut mesh = try_filled(self.fft.local_len(), DVec3::ZERO, "force mesh cells")?;

        for axis in 0..3 {
            let mut fk = delta_k.to_vec();
            // ∇φ with φ_k = −δ_k / k²
            self.fft.for_each_mode(&mut fk, |idx, v| {
                *v *= Complex64::new(0.0, -kernel.gradient(idx, axis));
            });
            let component = self.fft.inverse(comm, fk)?;
            for (m, c) in mesh.iter_mut().zip(&component) {
                m[axis] = c.re;
            }
        }
        Ok(mesh)
    }
}

/// Per-axis tables for `g_a / (k² W)`.
struct GreenKernel {
    /// g(k) per bin, zero at Nyquist
    k_grad: Vec<f64>,
    /// contribution of each bin to k²
    k_sq: Vec<f64>,
    /// CIC window per bin
    window: Vec<f64>,
}

impl GreenKernel {
    fn new(config: &PmConfig, n: usize) -> Self {
        let k_unit = 2.0 * PI / config.box_size;
        let spacing = config.box_size / n as f64;

        let mut k_grad = Vec::with_capacity(n);
        let mut k_sq = Vec::with_capacity(n);
        let mut window = Vec::with_capacity(n);
        for i in 0..n {
            let m = signed_mode(i, n) as f64;
            let k = k_unit * m;
            k_grad.push(match config.gradient {
                Gradient::Spectral if is_nyquist(i, n) => 0.0,
                Gradient::Spectral => k,
                Gradient::FiniteDifference => {
                    (8.0 * (k * spacing).sin() - (2.0 * k * spacing).sin()) / (6.0 * spacing)
                }
            });
            k_sq.push(match config.green {
                GreenFunction::Continuous => k * k,
                GreenFunction::FiniteDifference => {
                    let s = 2.0 / spacing * (0.5 * k * spacing).sin();
                    s * s
                }
            });
            window.push(if config.deconvolve {
                let w = sinc(PI * m / n as f64);
                w * w
            } else {
                1.0
            });
        }

        Self {
            k_grad,
            k_sq,
            window,
        }
    }

    /// `g_axis / (k² W)` for mode `idx`; zero for the mean mode.
    #[inline]
    fn gradient(&self, idx: [usize; 3], axis: usize) -> f64 {
        let k2 = self.k_sq[idx[0]] + self.k_sq[idx[1]] + self.k_sq[idx[2]];
        if k2 == 0.0 {
            return 0.0;
        }
        let w = self.window[idx[0]] * self.window[idx[1]] * self.window[idx[2]];
        self.k_grad[idx[axis]] / (k2 * w)
    }
}
