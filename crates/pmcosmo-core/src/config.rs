use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cosmology::Cosmology;
use crate::error::{Error, Result};
use crate::lpt::LptConfig;
use crate::pm::{Gradient, GreenFunction, PmConfig};

/// Run parameters shared by the generator and the solver.
///
/// Missing JSON fields take their default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub nc: usize,
    pub box_size: f64,
    pub omega_m: f64,
    pub a: f64,
    pub seed: u64,
    pub mesh_factor: usize,
    pub lattice_offset: f64,
    pub n_nodes: usize,
    pub green: GreenFunction,
    pub gradient: Gradient,
    pub deconvolve: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nc: 64,
            box_size: 64.0,
            omega_m: 0.308,
            a: 1.0,
            seed: 1,
            mesh_factor: 1,
            lattice_offset: 0.0,
            n_nodes: 1,
            green: GreenFunction::Continuous,
            gradient: Gradient::Spectral,
            deconvolve: true,
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nc <= 1 {
            return Err(Error::InvalidArgument(format!("nc must be at least 2, got {}", self.nc)));
        }
        if !(self.box_size.is_finite() && self.box_size > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "box_size must be positive, got {}",
                self.box_size
            )));
        }
        if !(self.omega_m > 0.0 && self.omega_m <= 1.0) {
            return Err(Error::InvalidArgument(format!(
                "omega_m must be in (0, 1], got {}",
                self.omega_m
            )));
        }
        if !(self.a.is_finite() && self.a > 0.0) {
            return Err(Error::InvalidArgument(format!("a must be positive, got {}", self.a)));
        }
        if self.mesh_factor == 0 {
            return Err(Error::InvalidArgument("mesh_factor must be positive".into()));
        }
        if self.n_nodes == 0 {
            return Err(Error::InvalidArgument("n_nodes must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.lattice_offset) {
            return Err(Error::InvalidArgument(format!(
                "lattice_offset must be in [0, 1), got {}",
                self.lattice_offset
            )));
        }
        Ok(())
    }

    pub fn cosmology(&self) -> Cosmology {
        Cosmology {
            omega_m: self.omega_m,
        }
    }

    pub fn lpt_config(&self) -> LptConfig {
        LptConfig {
            nc: self.nc,
            box_size: self.box_size,
            a: self.a,
            seed: self.seed,
            lattice_offset: self.lattice_offset,
            cosmology: self.cosmology(),
        }
    }

    pub fn pm_config(&self) -> PmConfig {
        PmConfig {
            nc: self.nc,
            mesh_factor: self.mesh_factor,
            box_size: self.box_size,
            green: self.green,
            gradient: self.gradient,
            deconvolve: self.deconvolve,
        }
    }
}
