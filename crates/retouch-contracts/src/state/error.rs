use thiserror::Error;

use super::{AdjustmentKey, CosmeticField};

/// Rejected state transition.
///
/// These are caller mistakes (a stale index, a slider value outside its
/// range), never provider failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("image index {index} out of range ({len} images)")]
    ImageIndex { index: usize, len: usize },

    #[error("result index {index} out of range ({len} results)")]
    ResultIndex { index: usize, len: usize },

    #[error("{key} must be within {min}..={max}, got {value}")]
    AdjustmentRange {
        key: AdjustmentKey,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("unknown adjustment '{0}'")]
    UnknownAdjustment(String),

    #[error("'{value}' is not a {field} style")]
    CosmeticStyle { field: CosmeticField, value: String },

    #[error("unknown makeup field '{0}'")]
    UnknownCosmetic(String),

    #[error("result {0} has no generated image")]
    NoImageResult(usize),

    #[error("expected {expected} result entries, got {actual}")]
    ResultCount { expected: usize, actual: usize },
}
