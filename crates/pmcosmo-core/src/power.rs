use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// Slack in ln k when deciding whether a wavenumber lies inside the table.
const LOG_K_TOLERANCE: f64 = 1.0e-10;

/// Tabulated linear matter power spectrum P(k).
///
/// Rows are `(k, P)` with `k` strictly increasing and both columns
/// positive; evaluation interpolates linearly in `(ln k, ln P)`. The table is
/// immutable after loading and every node must load the same one.
#[derive(Clone, Debug)]
pub struct PowerSpectrum {
    k_min: f64,
    k_max: f64,
    log_k: Vec<f64>,
    log_p: Vec<f64>,
}

impl PowerSpectrum {
    /// Parse a whitespace-separated two-column table.
    ///
    /// Blank lines and lines starting with `#` are skipped; extra columns are ignored.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut rows = Vec::new();
        let mut line_numbers = Vec::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = i + 1;
            let text = line.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }

            let mut cols = text.split_whitespace();
            let (Some(k), Some(p)) = (cols.next(), cols.next()) else {
                return Err(Error::FileFormat(format!(
                    "line {}: expected two columns (k, P), got {:?}",
                    line_no, text
                )));
            };
            let parse = |s: &str, name: &str| {
                s.parse::<f64>().map_err(|_| {
                    Error::FileFormat(format!("line {}: {} is not a number: {:?}", line_no, name, s))
                })
            };
            rows.push((parse(k, "k")?, parse(p, "P(k)")?));
            line_numbers.push(line_no);
        }

        Self::validated(rows, |row| format!("line {}", line_numbers[row]))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let ps = Self::from_reader(BufReader::new(file))?;
        log::info!(
            "[power] read {} rows from {}",
            ps.len(),
            path.display()
        );
        Ok(ps)
    }

    pub fn from_pairs(rows: Vec<(f64, f64)>) -> Result<Self> {
        Self::validated(rows, |row| format!("row {}", row))
    }

    /// Tabulate `f` at `n` log-spaced wavenumbers in `[k_min, k_max]`.
    pub fn tabulate<F: Fn(f64) -> f64>(k_min: f64, k_max: f64, n: usize, f: F) -> Result<Self> {
        if !(k_min > 0.0 && k_max > k_min && n >= 2) {
            return Err(Error::InvalidArgument(format!(
                "cannot tabulate {} points on [{}, {}]",
                n, k_min, k_max
            )));
        }
        let step = (k_max / k_min).ln() / (n - 1) as f64;
        let rows = (0..n)
            .map(|i| {
                let k = if i == n - 1 {
                    k_max
                } else {
                    k_min * (step * i as f64).exp()
                };
                (k, f(k))
            })
            .collect();
        Self::from_pairs(rows)
    }

    fn validated<L: Fn(usize) -> String>(rows: Vec<(f64, f64)>, locate: L) -> Result<Self> {
        if rows.len() < 2 {
            return Err(Error::FileFormat(format!(
                "power spectrum needs at least 2 rows, got {}",
                rows.len()
            )));
        }

        let mut log_k = Vec::with_capacity(rows.len());
        let mut log_p = Vec::with_capacity(rows.len());
        for (i, &(k, p)) in rows.iter().enumerate() {
            if !(k.is_finite() && k > 0.0) {
                return Err(Error::FileFormat(format!("{}: k = {} must be positive", locate(i), k)));
            }
            if !(p.is_finite() && p > 0.0) {
                return Err(Error::FileFormat(format!("{}: P(k) = {} must be positive", locate(i), p)));
            }
            if i > 0 && k <= rows[i - 1].0 {
                return Err(Error::FileFormat(format!(
                    "{}: k = {} is not increasing",
                    locate(i),
                    k
                )));
            }
            log_k.push(k.ln());
            log_p.push(p.ln());
        }

        Ok(Self {
            k_min: rows[0].0,
            k_max: rows[rows.len() - 1].0,
            log_k,
            log_p,
        })
    }

    pub fn len(&self) -> usize {
        self.log_k.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_k.is_empty()
    }

    /// Tabulated `(k_min, k_max)`.
    pub fn k_range(&self) -> (f64, f64) {
        (self.k_min, self.k_max)
    }

    /// True if `k` lies inside the table, up to rounding.
    pub fn covers(&self, k: f64) -> bool {
        k > 0.0 && self.log_position(k).is_some()
    }

    /// P(k); zero outside the tabulated range.
    pub fn eval(&self, k: f64) -> f64 {
        if !(k > 0.0) {
            return 0.0;
        }
        let Some(x) = self.log_position(k) else {
            return 0.0;
        };
        let last = self.len() - 1;

        let hi = self.log_k.partition_point(|&lk| lk < x).clamp(1, last);
        let lo = hi - 1;
        let t = (x - self.log_k[lo]) / (self.log_k[hi] - self.log_k[lo]);
        (self.log_p[lo] + t * (self.log_p[hi] - self.log_p[lo])).exp()
    }

    /// ln k clamped onto the table, or `None` if `k` is clearly outside it.
    fn log_position(&self, k: f64) -> Option<f64> {
        let x = k.ln();
        let lo = self.log_k[0];
        let hi = self.log_k[self.len() - 1];
        if x.is_nan() || x < lo - LOG_K_TOLERANCE || x > hi + LOG_K_TOLERANCE {
            return None;
        }
        Some(x.clamp(lo, hi))
    }

    /// Rows as `(k, P)` pairs.
    pub fn rows(&self) -> Vec<(f64, f64)> {
        self.log_k
            .iter()
            .zip(&self.log_p)
            .map(|(lk, lp)| (lk.exp(), lp.exp()))
            .collect()
    }
}
