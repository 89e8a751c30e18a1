//! Second-order Lagrangian perturbation theory initial conditions.
//!
//! 1. White noise on the `nc³` lattice, one ChaCha stream per global cell.
//! 2. Forward FFT, colour with `sqrt(P(k) N / V)` so the field has power P(k).
//! 3. ψ1 = i k δ / k² (Zel'dovich), inverse transformed per axis.
//! 4. Second-order source δ2 = Σ_{i<j} φ,ii φ,jj − φ,ij² from the six
//!    second derivatives φ,ij = k_i k_j δ / k², then ψ2 = −i k δ2 / k².
//! 5. x = q + D1 ψ1 + D2 ψ2 (wrapped), v = D1v ψ1 + D2v ψ2.
//!
//! Every step depends only on global cell and mode indices, so the particles
//! do not depend on the number of nodes.
//!
//! Reference: Scoccimarro 1998, MNRAS 299, 1097

use std::f64::consts::PI;

use glam::DVec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::comm::Communicator;
use crate::cosmology::Cosmology;
use crate::decomposition::{Decomposition, Slab};
use crate::error::{Error, Result};
use crate::fft::SlabFft;
use crate::math::{is_nyquist, signed_mode, try_with_capacity, wrap_position};
use crate::particle::{IdSequence, Particle, ParticleEnsemble};
use crate::power::PowerSpectrum;

/// Local slab headroom used by [`LptGenerator::capacity_hint`].
const CAPACITY_HEADROOM: f64 = 1.25;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LptConfig {
    /// Particles per side.
    pub nc: usize,
    pub box_size: f64,
    /// Scale factor of the output.
    pub a: f64,
    pub seed: u64,
    /// Lattice shift in units of the cell size, in `[0, 1)`.
    pub lattice_offset: f64,
    pub cosmology: Cosmology,
}

impl Default for LptConfig {
    fn default() -> Self {
        Self {
            nc: 64,
            box_size: 64.0,
            a: 1.0,
            seed: 1,
            lattice_offset: 0.0,
            cosmology: Cosmology::default(),
        }
    }
}

impl LptConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nc < 2 {
            return Err(Error::InvalidArgument(format!("nc must be at least 2, got {}", self.nc)));
        }
        if !(self.box_size.is_finite() && self.box_size > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "box size must be positive, got {}",
                self.box_size
            )));
        }
        if !(self.a.is_finite() && self.a > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "scale factor must be positive, got {}",
                self.a
            )));
        }
        if !(0.0..1.0).contains(&self.lattice_offset) {
            return Err(Error::InvalidArgument(format!(
                "lattice offset must be in [0, 1), got {}",
                self.lattice_offset
            )));
        }
        self.cosmology.validate()
    }

    /// Wavenumbers the power spectrum table must cover: fundamental to the 3-D Nyquist corner.
    pub fn k_range(&self) -> (f64, f64) {
        let k_fundamental = 2.0 * PI / self.box_size;
        let k_corner = 3f64.sqrt() * PI * self.nc as f64 / self.box_size;
        (k_fundamental, k_corner)
    }
}

/// Node-local displacement fields on this node's x-slab of the lattice.
///
/// Index `(ix_local * nc + iy) * nc + iz`.
pub struct DisplacementFields {
    pub slab: Slab,
    pub nc: usize,
    pub psi1: Vec<DVec3>,
    pub psi2: Vec<DVec3>,
}

impl DisplacementFields {
    pub fn len(&self) -> usize {
        self.psi1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.psi1.is_empty()
    }

    /// Global lattice index `[ix, iy, iz]` of local entry `i`.
    pub fn lattice_index(&self, i: usize) -> [usize; 3] {
        let nc = self.nc;
        [self.slab.start + i / (nc * nc), (i / nc) % nc, i % nc]
    }
}

pub struct LptGenerator {
    config: LptConfig,
    power: PowerSpectrum,
}

impl LptGenerator {
    /// Fails with [`Error::FileFormat`] if the table does not cover every lattice wavenumber.
    pub fn new(config: LptConfig, power: &PowerSpectrum) -> Result<Self> {
        config.validate()?;
        let (k_lo, k_hi) = config.k_range();
        if !(power.covers(k_lo) && power.covers(k_hi)) {
            let (t_lo, t_hi) = power.k_range();
            return Err(Error::FileFormat(format!(
                "power spectrum covers k in [{}, {}] but the lattice needs [{}, {}]",
                t_lo, t_hi, k_lo, k_hi
            )));
        }
        Ok(Self {
            config,
            power: power.clone(),
        })
    }

    pub fn config(&self) -> &LptConfig {
        &self.config
    }

    /// Suggested per-node ensemble capacity: the largest slab plus one plane, with 25% headroom.
    pub fn capacity_hint(nc: usize, n_nodes: usize) -> usize {
        let planes = nc.div_ceil(n_nodes.max(1)) + 1;
        (CAPACITY_HEADROOM * (planes * nc * nc) as f64).ceil() as usize
    }

    /// Collective: compute the displacement fields on this node's lattice slab.
    pub fn generate(&self, comm: &Communicator) -> Result<DisplacementFields> {
        let nc = self.config.nc;
        let l = self.config.box_size;
        let decomposition = Decomposition::new(nc, l, comm.size())?;
        let fft = SlabFft::new(&decomposition, comm.rank())?;
        let slab = fft.local_x();

        // ==== 1. White noise ====
        let noise = self.white_noise(&fft)?;
        let noise_k = fft.forward(comm, noise)?;

        // ==== 2. Colour with P(k) ====
        let k_unit = 2.0 * PI / l;
        let n_cells = (nc * nc * nc) as f64;
        let volume = l * l * l;
        let power = &self.power;
        let mut delta_k = noise_k;
        fft.for_each_mode(&mut delta_k, |idx, v| {
            let k2 = wave_number_sq(idx, nc, k_unit);
            if k2 == 0.0 {
                *v = Complex64::new(0.0, 0.0);
            } else {
                *v *= (power.eval(k2.sqrt()) * n_cells / volume).sqrt();
            }
        });

        // ==== 3. First order ====
        let psi1 = self.gradient(comm, &fft, &delta_k, 1.0)?;

        // ==== 4. Second order ====
        let mut phi = Vec::with_capacity(6);
        for (i, j) in PHI_COMPONENTS {
            let mut buf = delta_k.clone();
            fft.for_each_mode(&mut buf, |idx, v| {
                let k2 = wave_number_sq(idx, nc, k_unit);
                let off_diagonal = i != j;
                if k2 == 0.0 || (off_diagonal && (is_nyquist(idx[i], nc) || is_nyquist(idx[j], nc))) {
                    *v = Complex64::new(0.0, 0.0);
                    return;
                }
                let ki = k_unit * signed_mode(idx[i], nc) as f64;
                let kj = k_unit * signed_mode(idx[j], nc) as f64;
                *v *= ki * kj / k2;
            });
            phi.push(real_part(&fft.inverse(comm, buf)?));
        }
        drop(delta_k);

        let [xx, yy, zz, xy, xz, yz] = [&phi[0], &phi[1], &phi[2], &phi[3], &phi[4], &phi[5]];
        let mut source = fft.allocate()?;
        for (c, s) in source.iter_mut().enumerate() {
            let d2 = xx[c] * yy[c] + xx[c] * zz[c] + yy[c] * zz[c]
                - xy[c] * xy[c]
                - xz[c] * xz[c]
                - yz[c] * yz[c];
            *s = Complex64::new(d2, 0.0);
        }
        drop(phi);

        let delta2_k = fft.forward(comm, source)?;
        let psi2 = self.gradient(comm, &fft, &delta2_k, -1.0)?;

        log::debug!(
            "[lpt] node {} computed displacements on planes {}..{}",
            comm.rank(),
            slab.start,
            slab.end()
        );

        Ok(DisplacementFields {
            slab,
            nc,
            psi1,
            psi2,
        })
    }

    /// Collective: replace the ensemble with this node's slab of the displaced lattice.
    ///
    /// Ids are lattice indices `(ix * nc + iy) * nc + iz`; afterwards the
    /// ensemble hands out ids from `nc³` upwards, strided by node.
    pub fn populate(&self, comm: &Communicator, ensemble: &mut ParticleEnsemble) -> Result<()> {
        self.check_fit(comm, ensemble)?;
        let fields = self.generate(comm)?;

        let particles = self.displace(&fields)?;
        let nc = self.config.nc as u64;
        let ids = IdSequence::for_node(nc * nc * nc, comm.rank(), comm.size());
        ensemble.replace_particles(particles, ids)?;

        log::info!(
            "[lpt] node {} generated {} particles at a = {}",
            comm.rank(),
            ensemble.len(),
            self.config.a
        );
        Ok(())
    }

    /// Particles for every entry of `fields`, displaced to scale factor `a`.
    pub fn displace(&self, fields: &DisplacementFields) -> Result<Vec<Particle>> {
        let nc = self.config.nc;
        let l = self.config.box_size;
        let a = self.config.a;
        let cosmo = &self.config.cosmology;
        let d1 = cosmo.growth_d1(a);
        let d2 = cosmo.growth_d2(a);
        let d1v = cosmo.velocity_factor_d1v(a);
        let d2v = cosmo.velocity_factor_d2v(a);
        let cell = l / nc as f64;
        let offset = self.config.lattice_offset;

        let mut particles = try_with_capacity(fields.len(), "particles")?;
        for i in 0..fields.len() {
            let [ix, iy, iz] = fields.lattice_index(i);
            let q = DVec3::new(
                (ix as f64 + offset) * cell,
                (iy as f64 + offset) * cell,
                (iz as f64 + offset) * cell,
            );
            let (p1, p2) = (fields.psi1[i], fields.psi2[i]);
            particles.push(Particle {
                id: ((ix * nc + iy) * nc + iz) as u64,
                position: wrap_position(q + d1 * p1 + d2 * p2, l),
                velocity: d1v * p1 + d2v * p2,
                displacement1: p1,
                displacement2: p2,
            });
        }
        Ok(particles)
    }

    // ---------- helper functions ----------

    /// Collective: fails on every node if any node's ensemble cannot take its slab.
    fn check_fit(&self, comm: &Communicator, ensemble: &ParticleEnsemble) -> Result<()> {
        let nc = self.config.nc;
        let l = self.config.box_size;
        let slab = Decomposition::new(nc, l, comm.size())?.slab(comm.rank());
        let requested = slab.len * nc * nc;

        let local = if ensemble.box_size() != l {
            Some(Unfit::BoxSize(ensemble.box_size()))
        } else if requested > ensemble.capacity() {
            Some(Unfit::Capacity {
                requested,
                capacity: ensemble.capacity(),
            })
        } else {
            None
        };

        let verdicts = comm.all_gather(local)?;
        let Some((rank, unfit)) = verdicts
            .into_iter()
            .enumerate()
            .find_map(|(r, v)| v.map(|u| (r, u)))
        else {
            return Ok(());
        };
        log::error!("[lpt] node {} cannot hold its slab: {:?}", rank, unfit);
        Err(match unfit {
            Unfit::BoxSize(found) => Error::InvalidArgument(format!(
                "node {} ensemble box size {} does not match {}",
                rank, found, l
            )),
            Unfit::Capacity {
                requested,
                capacity,
            } => Error::CapacityExceeded {
                requested,
                capacity,
            },
        })
    }

    fn white_noise(&self, fft: &SlabFft) -> Result<Vec<Complex64>> {
        let nc = self.config.nc;
        let x0 = fft.local_x().start;
        let base = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut noise = fft.allocate()?;

        let fill = |(plane, values): (usize, &mut [Complex64])| {
            let offset = ((x0 + plane) * nc * nc) as u64;
            for (j, v) in values.iter_mut().enumerate() {
                let mut rng = base.clone();
                rng.set_stream(offset + j as u64);
                *v = Complex64::new(rng.sample(StandardNormal), 0.0);
            }
        };

        #[cfg(feature = "parallel")]
        noise.par_chunks_mut(nc * nc).enumerate().for_each(fill);

        #[cfg(not(feature = "parallel"))]
        noise.chunks_mut(nc * nc).enumerate().for_each(fill);

        Ok(noise)
    }

    /// `sign · i k_a / k² · field_k` per axis, inverse transformed.
    fn gradient(
        &self,
        comm: &Communicator,
        fft: &SlabFft,
        field_k: &[Complex64],
        sign: f64,
    ) -> Result<Vec<DVec3>> {
        let nc = self.config.nc;
        let k_unit = 2.0 * PI / self.config.box_size;
        let mut out = vec![DVec3::ZERO; fft.local_len()];

        for axis in 0..3 {
            let mut buf = field_k.to_vec();
            fft.for_each_mode(&mut buf, |idx, v| {
                let k2 = wave_number_sq(idx, nc, k_unit);
                if k2 == 0.0 || is_nyquist(idx[axis], nc) {
                    *v = Complex64::new(0.0, 0.0);
                    return;
                }
                let ka = k_unit * signed_mode(idx[axis], nc) as f64;
                *v *= Complex64::new(0.0, sign * ka / k2);
            });
            let component = fft.inverse(comm, buf)?;
            for (o, c) in out.iter_mut().zip(&component) {
                o[axis] = c.re;
            }
        }
        Ok(out)
    }
}

/// Why an ensemble cannot receive its slab.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum Unfit {
    BoxSize(f64),
    Capacity { requested: usize, capacity: usize },
}

/// Pairs (i, j) of φ,ij in the order xx, yy, zz, xy, xz, yz.
const PHI_COMPONENTS: [(usize, usize); 6] = [(0, 0), (1, 1), (2, 2), (0, 1), (0, 2), (1, 2)];

#[inline]
fn wave_number_sq(idx: [usize; 3], n: usize, k_unit: f64) -> f64 {
    idx.iter()
        .map(|&i| {
            let k = k_unit * signed_mode(i, n) as f64;
            k * k
        })
        .sum()
}

fn real_part(values: &[Complex64]) -> Vec<f64> {
    values.iter().map(|c| c.re).collect()
}

/// Linear-theory force `−D1(a) · ψ1` for every particle, in the convention of
/// [`crate::pm::PmSolver::compute_force`].
pub fn set_zeldovich_force(
    ensemble: &mut ParticleEnsemble,
    cosmology: &Cosmology,
    a: f64,
) -> Result<()> {
    let d1 = cosmology.growth_d1(a);
    let force = ensemble
        .as_slice()
        .iter()
        .map(|p| -d1 * p.displacement1)
        .collect();
    ensemble.set_forces(force)
}
