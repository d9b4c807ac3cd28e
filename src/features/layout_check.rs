//! Flatten-convention check for `reference_path_flat`.
//!
//! A reference path starts at the vehicle's current state, so under the
//! correct convention step 0's position lies on (or very near) the current
//! position. Reading the same row with the wrong convention scatters
//! unrelated channels into the position slots and the residual jumps.
//! Getting this backwards silently corrupts every feature row, so the
//! convention is checked against recorded data rather than assumed.

use ndarray::{s, ArrayView2, Zip};

use super::{FeatureError, FlattenOrder, TrajectoryLayout};

/// Best residual must be below this fraction of the worst one.
const DECISIVE_RATIO: f32 = 0.5;

/// Mean distance between step 0 and the current position, per convention.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutDiagnosis {
    pub samples: usize,
    pub channel_major_residual: f32,
    pub time_major_residual: f32,
}

impl LayoutDiagnosis {
    pub fn residual(&self, order: FlattenOrder) -> f32 {
        match order {
            FlattenOrder::ChannelMajor => self.channel_major_residual,
            FlattenOrder::TimeMajor => self.time_major_residual,
        }
    }

    /// The convention whose step 0 sits on the current position, if the data
    /// tells them apart.
    pub fn best(&self) -> Option<FlattenOrder> {
        let (cm, tm) = (self.channel_major_residual, self.time_major_residual);
        if self.samples == 0 || !cm.is_finite() || !tm.is_finite() || cm == tm {
            return None;
        }
        if cm <= tm * DECISIVE_RATIO {
            Some(FlattenOrder::ChannelMajor)
        } else if tm <= cm * DECISIVE_RATIO {
            Some(FlattenOrder::TimeMajor)
        } else {
            None
        }
    }

    /// Whether the data confirms `order`.
    pub fn confirms(&self, order: FlattenOrder) -> bool {
        self.best() == Some(order)
    }
}

/// Measure both conventions on recorded `current` / `reference` rows.
///
/// With a single path point both conventions read identically and the
/// diagnosis is inconclusive.
pub fn diagnose_layout(
    layout: &TrajectoryLayout,
    current: ArrayView2<'_, f32>,
    reference: ArrayView2<'_, f32>,
) -> Result<LayoutDiagnosis, FeatureError> {
    layout.check_inputs(current, reference)?;

    let mut residuals = [0.0_f32; 2];
    for (slot, order) in residuals.iter_mut().zip(FlattenOrder::ALL) {
        *slot = anchor_residual(&layout.with_order(order), current, reference)?;
    }

    Ok(LayoutDiagnosis {
        samples: current.nrows(),
        channel_major_residual: residuals[0],
        time_major_residual: residuals[1],
    })
}

fn anchor_residual(
    layout: &TrajectoryLayout,
    current: ArrayView2<'_, f32>,
    reference: ArrayView2<'_, f32>,
) -> Result<f32, FeatureError> {
    let rows = current.nrows();
    if rows == 0 {
        return Ok(0.0);
    }

    let storage = layout.unflatten(reference)?;
    let paths = layout.time_major(storage.view());
    let anchors = paths.slice(s![.., 0, ..layout.position_dims]);
    let positions = current.slice(s![.., ..layout.position_dims]);

    let mut total = 0.0_f64;
    Zip::from(anchors.rows())
        .and(positions.rows())
        .for_each(|anchor, position| {
            let sq: f32 = anchor
                .iter()
                .zip(position.iter())
                .map(|(a, p)| (a - p) * (a - p))
                .sum();
            total += f64::from(sq.sqrt());
        });

    Ok((total / rows as f64) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Rows whose step 0 position equals the current position when read in
    /// `order`, with large distinct values in every other slot.
    fn anchored_rows(layout: &TrajectoryLayout, rows: usize) -> (Array2<f32>, Array2<f32>) {
        let mut current = Array2::<f32>::zeros((rows, layout.state_dim));
        let mut reference = Array2::<f32>::zeros((rows, layout.path_width()));
        for i in 0..rows {
            for c in 0..layout.state_dim {
                current[[i, c]] = (i * 7 + c) as f32;
            }
            for t in 0..layout.reference_steps {
                for c in 0..layout.state_dim {
                    let value = if t == 0 && c < layout.position_dims {
                        current[[i, c]]
                    } else {
                        1000.0 + (t * 31 + c * 17) as f32
                    };
                    let col = match layout.order {
                        FlattenOrder::ChannelMajor => c * layout.reference_steps + t,
                        FlattenOrder::TimeMajor => t * layout.state_dim + c,
                    };
                    reference[[i, col]] = value;
                }
            }
        }
        (current, reference)
    }

    #[test]
    fn test_identifies_channel_major() {
        let layout = TrajectoryLayout::default();
        let (current, reference) = anchored_rows(&layout, 5);
        let diagnosis = diagnose_layout(&layout, current.view(), reference.view()).expect("diagnose");
        assert_eq!(diagnosis.channel_major_residual, 0.0);
        assert!(diagnosis.time_major_residual > 100.0);
        assert!(diagnosis.confirms(FlattenOrder::ChannelMajor));
    }

    #[test]
    fn test_identifies_time_major() {
        let layout = TrajectoryLayout::default().with_order(FlattenOrder::TimeMajor);
        let (current, reference) = anchored_rows(&layout, 5);
        // Checking under the other configured order must still find the truth.
        let configured = layout.with_order(FlattenOrder::ChannelMajor);
        let diagnosis =
            diagnose_layout(&configured, current.view(), reference.view()).expect("diagnose");
        assert_eq!(diagnosis.best(), Some(FlattenOrder::TimeMajor));
        assert!(!diagnosis.confirms(FlattenOrder::ChannelMajor));
    }

    #[test]
    fn test_single_step_is_inconclusive() {
        let layout = TrajectoryLayout {
            reference_steps: 1,
            ..TrajectoryLayout::default()
        };
        let (current, reference) = anchored_rows(&layout, 3);
        let diagnosis = diagnose_layout(&layout, current.view(), reference.view()).expect("diagnose");
        assert_eq!(diagnosis.best(), None);
    }

    #[test]
    fn test_empty_dataset_is_inconclusive() {
        let layout = TrajectoryLayout::default();
        let current = Array2::<f32>::zeros((0, 12));
        let reference = Array2::<f32>::zeros((0, 492));
        let diagnosis = diagnose_layout(&layout, current.view(), reference.view()).expect("diagnose");
        assert_eq!(diagnosis.samples, 0);
        assert_eq!(diagnosis.best(), None);
    }
}
