//! End-to-end operations behind the CLI subcommands.
//!
//! Each function loads what it needs from a dataset, runs one component and
//! writes its artifact. Keeping them here rather than in `main.rs` lets the
//! integration tests drive the same code paths as the binary.

use ndarray::{s, Array2};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{KeyConfig, PipelineConfig};
use crate::features::{diagnose_layout, FeatureBuilder, FeatureError, LayoutDiagnosis};
use crate::input_file::{self, InputFileError};
use crate::scaler::{ScalerError, StandardScaler};
use crate::store::{DatasetReader, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Scaler(#[from] ScalerError),

    #[error(transparent)]
    InputFile(#[from] InputFileError),

    #[error("sample {index} out of range: dataset has {rows} rows")]
    SampleOutOfRange { index: usize, rows: usize },

    #[error("'{key}' has {actual} rows, expected {expected}")]
    RowMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },
}

/// Arrays a dataset holds for the feature builder.
#[derive(Debug, Clone)]
pub struct TrajectoryBatch {
    pub current: Array2<f32>,
    pub reference: Array2<f32>,
    /// Only loaded when the caller needs model outputs.
    pub control: Option<Array2<f32>>,
}

impl TrajectoryBatch {
    pub fn rows(&self) -> usize {
        self.current.nrows()
    }
}

/// Read the state and path arrays (and optionally the controls) from one
/// dataset through a single file handle.
pub fn load_batch(
    path: &Path,
    keys: &KeyConfig,
    with_control: bool,
) -> Result<TrajectoryBatch, PipelineError> {
    let mut reader = DatasetReader::open(path)?;
    let current = reader.read(&keys.current_state)?;
    let reference = reader.read(&keys.reference_path)?;
    let control = if with_control {
        let control = reader.read(&keys.control)?;
        if control.nrows() != current.nrows() {
            return Err(PipelineError::RowMismatch {
                key: keys.control.clone(),
                expected: current.nrows(),
                actual: control.nrows(),
            });
        }
        Some(control)
    } else {
        None
    };

    info!(
        file = %path.display(),
        rows = current.nrows(),
        "Loaded trajectory batch"
    );
    Ok(TrajectoryBatch {
        current,
        reference,
        control,
    })
}

/// Feature matrix for every row of `dataset`.
pub fn build_feature_matrix(
    config: &PipelineConfig,
    dataset: &Path,
) -> Result<Array2<f32>, PipelineError> {
    let batch = load_batch(dataset, &config.dataset.keys, false)?;
    let builder = FeatureBuilder::new(config.trajectory_layout());
    Ok(builder.build(batch.current.view(), batch.reference.view())?)
}

/// Build the feature row of `sample` in `dataset` and write it to `output`.
pub fn build_input_file(
    config: &PipelineConfig,
    dataset: &Path,
    sample: usize,
    output: &Path,
) -> Result<Vec<f32>, PipelineError> {
    let batch = load_batch(dataset, &config.dataset.keys, false)?;
    if sample >= batch.rows() {
        return Err(PipelineError::SampleOutOfRange {
            index: sample,
            rows: batch.rows(),
        });
    }

    let builder = FeatureBuilder::new(config.trajectory_layout());
    let features = builder.build(
        batch.current.slice(s![sample..=sample, ..]),
        batch.reference.slice(s![sample..=sample, ..]),
    )?;
    let row = features.row(0).to_vec();

    input_file::write_feature_row(output, &row)?;
    info!(output = %output.display(), sample, width = row.len(), "Saved sample feature row");
    Ok(row)
}

/// Fit the input normalizer on the feature matrix and the output normalizer
/// on the control array, then persist both.
pub fn fit_scalers(
    config: &PipelineConfig,
    dataset: &Path,
    scaler_x_path: &Path,
    scaler_y_path: &Path,
) -> Result<(StandardScaler, StandardScaler), PipelineError> {
    let batch = load_batch(dataset, &config.dataset.keys, true)?;
    let builder = FeatureBuilder::new(config.trajectory_layout());
    let features = builder.build(batch.current.view(), batch.reference.view())?;

    let scaler_x = StandardScaler::fit(features.view())?;
    let scaler_y = match &batch.control {
        Some(control) => StandardScaler::fit(control.view())?,
        None => return Err(ScalerError::NoSamples.into()),
    };

    scaler_x.save(scaler_x_path)?;
    scaler_y.save(scaler_y_path)?;
    info!(
        samples = scaler_x.n_samples_seen,
        inputs = scaler_x.dim(),
        outputs = scaler_y.dim(),
        scaler_x = %scaler_x_path.display(),
        scaler_y = %scaler_y_path.display(),
        "Fitted normalizers"
    );
    Ok((scaler_x, scaler_y))
}

/// Check the configured flatten convention against recorded data.
pub fn check_layout(config: &PipelineConfig, dataset: &Path) -> Result<LayoutDiagnosis, PipelineError> {
    let batch = load_batch(dataset, &config.dataset.keys, false)?;
    let layout = config.trajectory_layout();
    let diagnosis = diagnose_layout(&layout, batch.current.view(), batch.reference.view())?;

    match diagnosis.best() {
        Some(order) if order == layout.order => {
            info!(%order, residual = diagnosis.residual(order), "Flatten order confirmed");
        }
        Some(order) => {
            warn!(
                configured = %layout.order,
                detected = %order,
                configured_residual = diagnosis.residual(layout.order),
                detected_residual = diagnosis.residual(order),
                "Configured flatten order does not anchor paths at the current position"
            );
        }
        None => {
            warn!(
                channel_major = diagnosis.channel_major_residual,
                time_major = diagnosis.time_major_residual,
                "Flatten order check is inconclusive"
            );
        }
    }
    Ok(diagnosis)
}
