//! Trajectory Feature Builder
//!
//! Turns a batch of current states and flattened reference paths into model
//! input rows:
//!
//! ```text
//! current_state       [x y z | v4 .. v12]                      (N × 12)
//! reference_path_flat [c0t0 c0t1 .. c0tH | c1t0 .. | .. c11tH]  (N × 12·(H+1))
//!
//!   1. reshape path      → N × 12 × (H+1)   (storage order, channel-major)
//!   2. transpose         → N × (H+1) × 12   (one state per step)
//!   3. subtract [x y z 0 .. 0] from every step of its own sample
//!   4. reflatten in storage order, prepend [v4 .. v12]
//!
//! feature row         [v4 .. v12 | shifted path]                (N × (9 + 12·(H+1)))
//! ```
//!
//! The shift expresses the path relative to the current position, so the
//! model never sees absolute world coordinates. All arithmetic is `f32`.

pub mod layout_check;

use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use layout_check::{diagnose_layout, LayoutDiagnosis};

/// How `reference_path_flat` packs (step, channel) pairs into one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenOrder {
    /// `flat[c * steps + t]`: all steps of channel 0 first.
    #[default]
    ChannelMajor,
    /// `flat[t * state_dim + c]`: one full state per step.
    TimeMajor,
}

impl FlattenOrder {
    pub const ALL: [FlattenOrder; 2] = [FlattenOrder::ChannelMajor, FlattenOrder::TimeMajor];
}

impl std::fmt::Display for FlattenOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlattenOrder::ChannelMajor => write!(f, "channel_major"),
            FlattenOrder::TimeMajor => write!(f, "time_major"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("current state has {actual} columns, expected {expected}")]
    StateWidth { expected: usize, actual: usize },

    #[error("reference path has {actual} columns, expected {expected} ({steps} steps x {state_dim} channels)")]
    PathWidth {
        expected: usize,
        actual: usize,
        steps: usize,
        state_dim: usize,
    },

    #[error("{state_rows} current-state rows but {path_rows} reference-path rows")]
    RowMismatch { state_rows: usize, path_rows: usize },

    #[error("{position_dims} position channels do not fit in a {state_dim}-channel state")]
    Layout { state_dim: usize, position_dims: usize },

    #[error("reshape failed: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

// ============================================================================
// Layout
// ============================================================================

/// Geometry of one state vector and its reference path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrajectoryLayout {
    /// Scalars per state.
    pub state_dim: usize,
    /// Leading scalars of a state that are positions.
    pub position_dims: usize,
    /// Points on the reference path (horizon + 1).
    pub reference_steps: usize,
    /// Storage convention of the flattened path.
    pub order: FlattenOrder,
}

impl Default for TrajectoryLayout {
    fn default() -> Self {
        Self {
            state_dim: 12,
            position_dims: 3,
            reference_steps: 41,
            order: FlattenOrder::ChannelMajor,
        }
    }
}

impl TrajectoryLayout {
    /// Planning horizon H: future steps beyond the current one.
    pub const fn horizon(&self) -> usize {
        self.reference_steps.saturating_sub(1)
    }

    /// Width of `reference_path_flat`: `state_dim * (H + 1)`.
    pub const fn path_width(&self) -> usize {
        self.state_dim * self.reference_steps
    }

    /// Current-state scalars kept after the position is dropped.
    pub const fn remainder_width(&self) -> usize {
        self.state_dim.saturating_sub(self.position_dims)
    }

    /// Width of one feature row.
    pub const fn feature_width(&self) -> usize {
        self.remainder_width() + self.path_width()
    }

    /// Same geometry under a different flatten convention.
    pub const fn with_order(self, order: FlattenOrder) -> Self {
        Self { order, ..self }
    }

    /// 3-D shape matching the storage order of the flat path.
    const fn storage_shape(&self, rows: usize) -> (usize, usize, usize) {
        match self.order {
            FlattenOrder::ChannelMajor => (rows, self.state_dim, self.reference_steps),
            FlattenOrder::TimeMajor => (rows, self.reference_steps, self.state_dim),
        }
    }

    /// Reshape flat path rows into storage order without reordering memory.
    fn unflatten(&self, reference: ArrayView2<'_, f32>) -> Result<Array3<f32>, FeatureError> {
        let rows = reference.nrows();
        let flat = reference.as_standard_layout().into_owned();
        Ok(flat.into_shape(self.storage_shape(rows))?)
    }

    /// View a storage-order path as samples × steps × channels.
    pub fn time_major<'a>(&self, storage: ArrayView3<'a, f32>) -> ArrayView3<'a, f32> {
        match self.order {
            FlattenOrder::ChannelMajor => storage.permuted_axes([0, 2, 1]),
            FlattenOrder::TimeMajor => storage,
        }
    }

    fn time_major_mut<'a>(&self, storage: ArrayViewMut3<'a, f32>) -> ArrayViewMut3<'a, f32> {
        match self.order {
            FlattenOrder::ChannelMajor => storage.permuted_axes([0, 2, 1]),
            FlattenOrder::TimeMajor => storage,
        }
    }

    /// Reference paths as an owned samples × steps × channels array.
    pub fn reference_path(&self, reference: ArrayView2<'_, f32>) -> Result<Array3<f32>, FeatureError> {
        self.check_path_width(reference.ncols())?;
        let storage = self.unflatten(reference)?;
        Ok(self.time_major(storage.view()).as_standard_layout().into_owned())
    }

    /// Reject geometry the transform cannot slice.
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.position_dims > self.state_dim {
            return Err(FeatureError::Layout {
                state_dim: self.state_dim,
                position_dims: self.position_dims,
            });
        }
        Ok(())
    }

    /// `[x, y, z, 0, .., 0]` for one current state.
    ///
    /// `state` must hold at least `position_dims` values.
    pub(crate) fn shift_vector(&self, state: ArrayView1<'_, f32>) -> Array1<f32> {
        let mut shift = Array1::zeros(self.state_dim);
        shift
            .slice_mut(s![..self.position_dims])
            .assign(&state.slice(s![..self.position_dims]));
        shift
    }

    fn check_path_width(&self, actual: usize) -> Result<(), FeatureError> {
        if actual == self.path_width() {
            Ok(())
        } else {
            Err(FeatureError::PathWidth {
                expected: self.path_width(),
                actual,
                steps: self.reference_steps,
                state_dim: self.state_dim,
            })
        }
    }

    fn check_inputs(
        &self,
        current: ArrayView2<'_, f32>,
        reference: ArrayView2<'_, f32>,
    ) -> Result<(), FeatureError> {
        self.validate()?;
        if current.ncols() != self.state_dim {
            return Err(FeatureError::StateWidth {
                expected: self.state_dim,
                actual: current.ncols(),
            });
        }
        self.check_path_width(reference.ncols())?;
        if current.nrows() != reference.nrows() {
            return Err(FeatureError::RowMismatch {
                state_rows: current.nrows(),
                path_rows: reference.nrows(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds model input rows from current states and reference paths.
///
/// Used for training-set preparation and for single inference requests;
/// both go through the same transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureBuilder {
    layout: TrajectoryLayout,
}

impl FeatureBuilder {
    pub const fn new(layout: TrajectoryLayout) -> Self {
        Self { layout }
    }

    pub const fn layout(&self) -> &TrajectoryLayout {
        &self.layout
    }

    /// Transform `current` (N × state_dim) and `reference` (N × path_width)
    /// into N × feature_width rows.
    pub fn build(
        &self,
        current: ArrayView2<'_, f32>,
        reference: ArrayView2<'_, f32>,
    ) -> Result<Array2<f32>, FeatureError> {
        let layout = &self.layout;
        layout.check_inputs(current, reference)?;
        let rows = current.nrows();

        let mut storage = layout.unflatten(reference)?;
        let mut paths = layout.time_major_mut(storage.view_mut());
        for (mut steps, state) in paths.outer_iter_mut().zip(current.outer_iter()) {
            // Broadcasts over every step of this sample.
            steps -= &layout.shift_vector(state);
        }

        // Storage order is untouched, so rows flatten back in the recorded order.
        let shifted = storage.into_shape((rows, layout.path_width()))?;
        let remainder = current.slice(s![.., layout.position_dims..]);
        Ok(concatenate(Axis(1), &[remainder, shifted.view()])?)
    }

    /// Single-sample variant of [`FeatureBuilder::build`].
    pub fn build_row(&self, current: &[f32], reference: &[f32]) -> Result<Vec<f32>, FeatureError> {
        let current = ArrayView2::from_shape((1, current.len()), current)?;
        let reference = ArrayView2::from_shape((1, reference.len()), reference)?;
        Ok(self.build(current, reference)?.into_raw_vec())
    }
}
