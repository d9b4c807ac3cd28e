//! trajprep: data preparation for a learned trajectory controller
//!
//! Turns per-session recordings of an optimal-control solver into the
//! artifacts a neural controller is trained and deployed with.
//!
//! ## Architecture
//!
//! - **Store**: named 2-D f32 arrays in `.npz` containers
//! - **Merge**: concatenate session recordings row-wise into one dataset
//! - **Features**: shift the reference path into the current-position frame
//! - **Scaler**: fit, persist and export per-feature normalizers
//! - **Input file**: one feature row as text for runtime smoke tests

pub mod config;
pub mod features;
pub mod input_file;
pub mod merge;
pub mod pipeline;
pub mod scaler;
pub mod store;

// Re-export configuration
pub use config::PipelineConfig;

// Re-export commonly used types
pub use features::{FeatureBuilder, FlattenOrder, TrajectoryLayout};
pub use merge::{MergeOutcome, SessionMerger};
pub use scaler::{export_scalers, ScalerParams, StandardScaler};
pub use store::DatasetReader;
