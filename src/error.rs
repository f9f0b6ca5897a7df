//! Error types for the knob engine

use thiserror::Error;

use crate::types::ViewIdx;

/// Errors surfaced by knob operations
///
/// All failures are synchronous and local; nothing in this crate retries or
/// reports errors asynchronously.
#[derive(Debug, Error)]
pub enum KnobError {
    /// A dimension index outside `[0, dimensions)` was passed
    #[error("dimension {index} out of range (knob has {count} dimensions)")]
    DimensionOutOfRange { index: usize, count: usize },

    /// A view index that is neither declared by the owner nor the main view
    #[error("view {0:?} is not declared for this knob")]
    ViewNotFound(ViewIdx),

    /// The operation has no meaning for this value kind
    /// (e.g. derivative of a string knob)
    #[error("{0} is not available for this knob type")]
    UnsupportedOperation(&'static str),

    /// The scripting evaluator rejected or failed to run the expression
    #[error("expression on dimension {dimension} failed: {message}")]
    ExpressionFailed { dimension: usize, message: String },
}

impl KnobError {
    /// Build a dimension-range error for the given knob size
    pub(crate) fn bad_dimension(index: usize, count: usize) -> Self {
        KnobError::DimensionOutOfRange { index, count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = KnobError::bad_dimension(3, 2);
        assert_eq!(
            err.to_string(),
            "dimension 3 out of range (knob has 2 dimensions)"
        );

        let err = KnobError::UnsupportedOperation("derivative");
        assert_eq!(err.to_string(), "derivative is not available for this knob type");
    }
}
