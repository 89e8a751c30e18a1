//! Flat ΛCDM background and LPT growth factors.
//!
//! Hubble rate is in units of H0. The linear growth factor uses the integral
//! solution `D1(a) ∝ E(a) ∫₀ᵃ da' / (a' E(a'))³`, normalised to `D1(1) = 1`.
//! Second order uses the usual fits
//! `D2 = -3/7 D1² Ωm(a)^(-1/143)` and `f2 = 2 Ωm(a)^(6/11)`.
//!
//! Reference: Bouchet et al. 1995, A&A 296, 575

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Simpson intervals for the growth integral (must be even).
const GROWTH_INTERVALS: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cosmology {
    pub omega_m: f64,
}

impl Default for Cosmology {
    fn default() -> Self {
        Self { omega_m: 0.308 }
    }
}

impl Cosmology {
    pub fn new(omega_m: f64) -> Result<Self> {
        let c = Self { omega_m };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.omega_m > 0.0 && self.omega_m <= 1.0) {
            return Err(Error::InvalidArgument(format!(
                "omega_m must be in (0, 1], got {}",
                self.omega_m
            )));
        }
        Ok(())
    }

    pub fn omega_lambda(&self) -> f64 {
        1.0 - self.omega_m
    }

    /// E(a) = H(a) / H0.
    pub fn hubble(&self, a: f64) -> f64 {
        (self.omega_m / (a * a * a) + self.omega_lambda()).sqrt()
    }

    /// Matter density parameter at scale factor `a`.
    pub fn omega_m_at(&self, a: f64) -> f64 {
        let e = self.hubble(a);
        self.omega_m / (a * a * a * e * e)
    }

    pub fn growth_d1(&self, a: f64) -> f64 {
        self.growth_unnormed(a) / self.growth_unnormed(1.0)
    }

    /// f1 = d ln D1 / d ln a.
    pub fn growth_rate_f1(&self, a: f64) -> f64 {
        let e = self.hubble(a);
        let de_da = -1.5 * self.omega_m / (a * a * a * a * e);
        let g = self.growth_integrand(a);
        a * de_da / e + a * g / self.growth_integral(a)
    }

    pub fn growth_d2(&self, a: f64) -> f64 {
        let d1 = self.growth_d1(a);
        -3.0 / 7.0 * d1 * d1 * self.omega_m_at(a).powf(-1.0 / 143.0)
    }

    pub fn growth_rate_f2(&self, a: f64) -> f64 {
        2.0 * self.omega_m_at(a).powf(6.0 / 11.0)
    }

    /// Velocity factor of the first-order displacement, `a² E(a) f1 D1`.
    pub fn velocity_factor_d1v(&self, a: f64) -> f64 {
        a * a * self.hubble(a) * self.growth_rate_f1(a) * self.growth_d1(a)
    }

    /// Velocity factor of the second-order displacement, `a² E(a) f2 D2`.
    pub fn velocity_factor_d2v(&self, a: f64) -> f64 {
        a * a * self.hubble(a) * self.growth_rate_f2(a) * self.growth_d2(a)
    }

    // ---------- helper functions ----------

    fn growth_unnormed(&self, a: f64) -> f64 {
        self.hubble(a) * self.growth_integral(a)
    }

    /// (a E(a))⁻³
    fn growth_integrand(&self, a: f64) -> f64 {
        (self.omega_m / a + self.omega_lambda() * a * a).powf(-1.5)
    }

    /// ∫₀ᵃ (a' E)⁻³ da' with a' = u², which removes the a'^(1/2) cusp at zero.
    fn growth_integral(&self, a: f64) -> f64 {
        let om = self.omega_m;
        let ol = self.omega_lambda();
        let f = |u: f64| {
            let u2 = u * u;
            2.0 * u2 * u2 / (om + ol * u2 * u2 * u2).powf(1.5)
        };

        let upper = a.sqrt();
        let h = upper / GROWTH_INTERVALS as f64;
        let mut sum = f(0.0) + f(upper);
        for i in 1..GROWTH_INTERVALS {
            let w = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += w * f(i as f64 * h);
        }
        sum * h / 3.0
    }
}
