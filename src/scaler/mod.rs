//! Standard (zero-mean, unit-variance) feature normalization.
//!
//! Statistics are accumulated with Welford's algorithm, one row at a time, so
//! a feature matrix never has to be copied to f64 in full. Non-finite values
//! are left out of their feature's statistics; each feature keeps its own
//! count. The fitted normalizer stores the population variance and its
//! square root as the per-feature scale; constant features get a scale of
//! 1.0 so transforming them yields zeros instead of NaN.

pub mod export;

pub use export::{export_scalers, ExportError, ScalerParams};

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("cannot fit a normalizer on zero samples")]
    NoSamples,

    #[error("expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("feature {index} has no finite statistics")]
    NonFinite { index: usize },

    #[error("scale for feature {index} is {value}, must be finite and non-zero")]
    InvalidScale { index: usize, value: f64 },

    #[error("cannot read normalizer {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write normalizer {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed normalizer {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Running statistics
// ============================================================================

/// Welford running mean / variance over fixed-width rows.
#[derive(Debug, Clone)]
pub struct RunningStats {
    count: u64,
    /// Finite values seen per feature.
    seen: Vec<u64>,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningStats {
    pub fn new(dim: usize) -> Self {
        Self {
            count: 0,
            seen: vec![0; dim],
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn update(&mut self, row: ArrayView1<'_, f32>) -> Result<(), ScalerError> {
        if row.len() != self.dim() {
            return Err(ScalerError::DimensionMismatch {
                expected: self.dim(),
                actual: row.len(),
            });
        }

        self.count += 1;
        for (i, &x) in row.iter().enumerate() {
            let x = f64::from(x);
            if !x.is_finite() {
                continue;
            }
            self.seen[i] += 1;
            let n = self.seen[i] as f64;
            let delta = x - self.mean[i];
            self.mean[i] += delta / n;
            let delta2 = x - self.mean[i];
            self.m2[i] += delta * delta2;
        }
        Ok(())
    }

    pub fn update_batch(&mut self, rows: ArrayView2<'_, f32>) -> Result<(), ScalerError> {
        rows.outer_iter().try_for_each(|row| self.update(row))
    }

    /// Freeze the statistics into a normalizer.
    pub fn finish(self) -> Result<StandardScaler, ScalerError> {
        if self.count == 0 {
            return Err(ScalerError::NoSamples);
        }
        if let Some(index) = self.seen.iter().position(|&n| n == 0) {
            return Err(ScalerError::NonFinite { index });
        }
        let var: Vec<f64> = self
            .m2
            .iter()
            .zip(&self.seen)
            .map(|(m2, &n)| m2 / n as f64)
            .collect();
        let scale = var
            .iter()
            .map(|&v| if v > 0.0 { v.sqrt() } else { 1.0 })
            .collect();
        Ok(StandardScaler {
            n_samples_seen: self.count,
            mean: self.mean,
            var,
            scale,
        })
    }
}

// ============================================================================
// Fitted normalizer
// ============================================================================

/// A fitted per-feature mean / scale pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Rows the statistics were computed from (0 when built from parts).
    pub n_samples_seen: u64,
    pub mean: Vec<f64>,
    /// Population variance.
    pub var: Vec<f64>,
    /// Divisor applied by `transform`.
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on every row of `data`.
    pub fn fit(data: ArrayView2<'_, f32>) -> Result<Self, ScalerError> {
        let mut stats = RunningStats::new(data.ncols());
        stats.update_batch(data)?;
        stats.finish()
    }

    /// Build from known parameters.
    pub fn from_parts(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, ScalerError> {
        if mean.len() != scale.len() {
            return Err(ScalerError::DimensionMismatch {
                expected: mean.len(),
                actual: scale.len(),
            });
        }
        let scaler = Self {
            n_samples_seen: 0,
            var: scale.iter().map(|s| s * s).collect(),
            mean,
            scale,
        };
        scaler.check_params()?;
        Ok(scaler)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// `(x - mean) / scale`, row by row.
    pub fn transform(&self, data: ArrayView2<'_, f32>) -> Result<Array2<f32>, ScalerError> {
        self.check_width(data.ncols())?;
        let mut out = data.to_owned();
        for mut row in out.outer_iter_mut() {
            for ((x, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
                *x = ((f64::from(*x) - m) / s) as f32;
            }
        }
        Ok(out)
    }

    /// `x * scale + mean`, row by row.
    pub fn inverse_transform(&self, data: ArrayView2<'_, f32>) -> Result<Array2<f32>, ScalerError> {
        self.check_width(data.ncols())?;
        let mut out = data.to_owned();
        for mut row in out.outer_iter_mut() {
            for ((x, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
                *x = f64::from(*x).mul_add(*s, *m) as f32;
            }
        }
        Ok(out)
    }

    fn check_width(&self, actual: usize) -> Result<(), ScalerError> {
        if actual == self.dim() {
            Ok(())
        } else {
            Err(ScalerError::DimensionMismatch {
                expected: self.dim(),
                actual,
            })
        }
    }

    fn check_params(&self) -> Result<(), ScalerError> {
        if self.var.len() != self.dim() || self.scale.len() != self.dim() {
            return Err(ScalerError::DimensionMismatch {
                expected: self.dim(),
                actual: self.scale.len().min(self.var.len()),
            });
        }
        let stats_ok = |i: usize| self.mean[i].is_finite() && self.var[i].is_finite();
        if let Some(index) = (0..self.dim()).find(|&i| !stats_ok(i)) {
            return Err(ScalerError::NonFinite { index });
        }
        match self
            .scale
            .iter()
            .enumerate()
            .find(|(_, s)| !s.is_finite() || **s == 0.0)
        {
            Some((index, &value)) => Err(ScalerError::InvalidScale { index, value }),
            None => Ok(()),
        }
    }

    /// Save to disk atomically (write temp file, then rename). Parameters
    /// that [`StandardScaler::load`] would reject are not written.
    pub fn save(&self, path: &Path) -> Result<(), ScalerError> {
        self.check_params()?;
        let json = serde_json::to_vec_pretty(self).map_err(|source| ScalerError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, &json).map_err(|source| ScalerError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a normalizer saved by [`StandardScaler::save`].
    pub fn load(path: &Path) -> Result<Self, ScalerError> {
        let data = std::fs::read(path).map_err(|source| ScalerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let scaler: Self = serde_json::from_slice(&data).map_err(|source| ScalerError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        scaler.check_params()?;
        Ok(scaler)
    }
}

/// Write `bytes` next to `path` and rename over it.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = crate::store::temp_sibling(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let result = std::fs::write(&tmp_path, bytes).and_then(|()| std::fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}
