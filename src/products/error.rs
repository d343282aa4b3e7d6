use crate::types::field::{FieldId, GridShape};
use crate::types::units::Unit;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ProductError {
    #[error("Grids of {left} ({left_shape}) and {right} ({right_shape}) are not aligned")]
    GridMismatch {
        left: FieldId,
        left_shape: GridShape,
        right: FieldId,
        right_shape: GridShape,
    },

    #[error("{field} is in {found}, expected {expected}")]
    UnitMismatch {
        field: FieldId,
        expected: Unit,
        found: Unit,
    },

    #[error("Inputs are valid at different times ({left} vs {right})")]
    ValidTimeMismatch {
        left: DateTime<Utc>,
        right: DateTime<Utc>,
    },

    #[error("Expected a {expected} field, got {found}")]
    FieldMismatch { expected: FieldId, found: FieldId },

    #[error("No retrieved input for {0}")]
    MissingInput(FieldId),

    #[error("A threshold mask needs at least one criterion")]
    EmptyCriteria,
}
