//! Distributed particle store, 2LPT initial conditions and particle-mesh gravity.
//!
//! A run is a fixed set of nodes ([`comm::Cluster`]). On every node an
//! [`lpt::LptGenerator`] fills a [`particle::ParticleEnsemble`] from a
//! [`power::PowerSpectrum`], then a [`pm::PmSolver`] computes the PM force.
//! Both are collective and give the same particles and forces for any number
//! of nodes.

pub mod comm;
pub mod config;
pub mod cosmology;
pub mod decomposition;
pub mod error;
pub mod fft;
pub mod grid;
pub mod lpt;
pub mod math;
pub mod particle;
pub mod pm;
pub mod power;
pub mod snapshot;

pub use comm::{Cluster, Communicator};
pub use config::SimulationConfig;
pub use cosmology::Cosmology;
pub use error::{Error, Result};
pub use lpt::{set_zeldovich_force, LptConfig, LptGenerator};
pub use particle::{Group, Particle, ParticleEnsemble};
pub use pm::{DensityField, Gradient, GreenFunction, PmConfig, PmSolver};
pub use power::PowerSpectrum;
