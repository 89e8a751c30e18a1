use glam::DVec3;

use crate::error::{Error, Result};

/// Map `x` into `[0, period)`.
///
/// `rem_euclid` can round a tiny negative input up to exactly `period`,
/// which is folded back to zero.
#[inline]
pub fn wrap_periodic(x: f64, period: f64) -> f64 {
    let r = x.rem_euclid(period);
    if r >= period {
        0.0
    } else {
        r
    }
}

/// Component-wise [`wrap_periodic`].
#[inline]
pub fn wrap_position(p: DVec3, period: f64) -> DVec3 {
    DVec3::new(
        wrap_periodic(p.x, period),
        wrap_periodic(p.y, period),
        wrap_periodic(p.z, period),
    )
}

/// True when every coordinate is finite and inside `[0, period)`.
#[inline]
pub fn in_box(p: DVec3, period: f64) -> bool {
    p.is_finite()
        && (0.0..period).contains(&p.x)
        && (0.0..period).contains(&p.y)
        && (0.0..period).contains(&p.z)
}

/// Signed wavenumber index of FFT bin `i` on an `n`-point grid.
///
/// Bins `0..=n/2` are non-negative; the Nyquist bin of an even grid is
/// reported as `+n/2`.
#[inline]
pub fn signed_mode(i: usize, n: usize) -> i64 {
    if i <= n / 2 {
        i as i64
    } else {
        i as i64 - n as i64
    }
}

/// True for the self-conjugate Nyquist bin of an even grid.
#[inline]
pub fn is_nyquist(i: usize, n: usize) -> bool {
    n % 2 == 0 && i == n / 2
}

/// `sin(x) / x` with the removable singularity filled in.
#[inline]
pub fn sinc(x: f64) -> f64 {
    if x.abs() < 1.0e-8 {
        1.0 - x * x / 6.0
    } else {
        x.sin() / x
    }
}

/// Empty vector with room for exactly `capacity` elements, or [`Error::Allocation`].
pub fn try_with_capacity<T>(capacity: usize, what: &'static str) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(capacity).map_err(|_| Error::Allocation {
        what,
        requested: capacity,
    })?;
    Ok(v)
}

/// Allocate `len` copies of `value`, reporting failure instead of aborting.
pub fn try_filled<T: Clone>(len: usize, value: T, what: &'static str) -> Result<Vec<T>> {
    let mut v = try_with_capacity(len, what)?;
    v.resize(len, value);
    Ok(v)
}
