use crate::retrieval::cascade::DegradationRecord;
use crate::types::field::{MaskField, NormalizedField};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Product {
    Field(NormalizedField),
    Mask(MaskField),
}

/// A finished product and how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductOutcome {
    pub product: Product,
    pub requested: DateTime<Utc>,
    /// The single valid time every input was retrieved at.
    pub valid_time: DateTime<Utc>,
    /// Valid time of the earlier leg of a 24-hour difference.
    pub paired_time: Option<DateTime<Utc>>,
    pub attempts_consumed: usize,
    pub degradations: Vec<DegradationRecord>,
}

impl ProductOutcome {
    pub fn is_degraded(&self) -> bool {
        self.valid_time != self.requested
    }

    pub fn as_field(&self) -> Option<&NormalizedField> {
        match &self.product {
            Product::Field(field) => Some(field),
            Product::Mask(_) => None,
        }
    }

    pub fn as_mask(&self) -> Option<&MaskField> {
        match &self.product {
            Product::Mask(mask) => Some(mask),
            Product::Field(_) => None,
        }
    }
}
