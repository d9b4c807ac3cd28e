//! Normalizer parameter export for the inference runtime.
//!
//! Produces one JSON object with exactly four float arrays:
//!
//! ```json
//! {
//!     "x_mean": [...],
//!     "x_std": [...],
//!     "y_mean": [...],
//!     "y_std": [...]
//! }
//! ```
//!
//! Keys are written in that order, but consumers look them up by name.
//! Values are f64 printed in shortest round-trip form, so parsing gives back
//! the exact fitted numbers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::{write_atomic, ScalerError, StandardScaler};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot load {role} normalizer: {source}")]
    Load {
        role: &'static str,
        #[source]
        source: ScalerError,
    },

    #[error("cannot serialize scaler parameters: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The wire contract consumed by the inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub x_mean: Vec<f64>,
    pub x_std: Vec<f64>,
    pub y_mean: Vec<f64>,
    pub y_std: Vec<f64>,
}

impl ScalerParams {
    pub fn from_scalers(input: &StandardScaler, output: &StandardScaler) -> Self {
        Self {
            x_mean: input.mean().to_vec(),
            x_std: input.scale().to_vec(),
            y_mean: output.mean().to_vec(),
            y_std: output.scale().to_vec(),
        }
    }

    /// Pretty JSON with 4-space indentation.
    pub fn to_json(&self) -> Result<Vec<u8>, ExportError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(buf)
    }

    /// Write atomically to `path`.
    pub fn write(&self, path: &Path) -> Result<(), ExportError> {
        let json = self.to_json()?;
        write_atomic(path, &json).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, ExportError> {
        let data = std::fs::read(path).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Load the fitted input and output normalizers and write their parameters
/// to `output`.
pub fn export_scalers(
    scaler_x_path: &Path,
    scaler_y_path: &Path,
    output: &Path,
) -> Result<ScalerParams, ExportError> {
    let scaler_x = StandardScaler::load(scaler_x_path).map_err(|source| ExportError::Load {
        role: "input",
        source,
    })?;
    let scaler_y = StandardScaler::load(scaler_y_path).map_err(|source| ExportError::Load {
        role: "output",
        source,
    })?;

    let params = ScalerParams::from_scalers(&scaler_x, &scaler_y);
    params.write(output)?;
    info!(
        output = %output.display(),
        inputs = params.x_mean.len(),
        outputs = params.y_mean.len(),
        "Exported scaler parameters"
    );
    Ok(params)
}
