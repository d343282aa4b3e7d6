//! The immutable request a caller issues per product.

use crate::types::field::FieldId;
use crate::types::source::{DomainId, SourceFamily};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a single threshold test compares a value to its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Comparator {
    /// Missing values (NaN) never satisfy a test.
    pub fn test(&self, value: f64, threshold: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self {
            Comparator::Less => value < threshold,
            Comparator::LessOrEqual => value <= threshold,
            Comparator::Greater => value > threshold,
            Comparator::GreaterOrEqual => value >= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Less => "<",
            Comparator::LessOrEqual => "<=",
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
        }
    }
}

/// One criterion of a compound fire-weather mask, e.g. "relative humidity <= 25".
///
/// ```
/// use firewx::{Comparator, FieldId, ThresholdTest};
///
/// let dry = ThresholdTest::new(FieldId::RelativeHumidity, Comparator::LessOrEqual, 25.0);
/// assert_eq!(dry.to_string(), "relative_humidity <= 25");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTest {
    pub field: FieldId,
    pub comparator: Comparator,
    pub threshold: f64,
}

impl ThresholdTest {
    pub fn new(field: FieldId, comparator: Comparator, threshold: f64) -> Self {
        Self {
            field,
            comparator,
            threshold,
        }
    }
}

impl fmt::Display for ThresholdTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.comparator.symbol(), self.threshold)
    }
}

/// What the caller wants computed from the retrieved data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// The field itself.
    #[default]
    Single,
    /// The field now minus the field 24 hours earlier, at matched candidates.
    TwentyFourHourDifference,
    /// Relative humidity derived from temperature and dewpoint.
    DerivedHumidity,
    /// Elementwise AND of every threshold test.
    ThresholdMask(Vec<ThresholdTest>),
}

impl RetrievalMode {
    pub fn label(&self) -> String {
        match self {
            RetrievalMode::Single => "single".to_string(),
            RetrievalMode::TwentyFourHourDifference => "24h-difference".to_string(),
            RetrievalMode::DerivedHumidity => "derived-humidity".to_string(),
            RetrievalMode::ThresholdMask(tests) => {
                let parts: Vec<String> = tests.iter().map(|t| t.to_string()).collect();
                format!("threshold-mask[{}]", parts.join(" & "))
            }
        }
    }
}

/// A request for one product. Immutable once built.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use firewx::{DomainId, FieldId, RetrievalMode, RetrievalRequest};
///
/// let request = RetrievalRequest::builder()
///     .field(FieldId::Temperature)
///     .domain(DomainId::new("conus"))
///     .requested(Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap())
///     .mode(RetrievalMode::TwentyFourHourDifference)
///     .build();
/// assert_eq!(request.mode(), &RetrievalMode::TwentyFourHourDifference);
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct RetrievalRequest {
    field: FieldId,
    #[builder(into)]
    domain: DomainId,
    requested: DateTime<Utc>,
    #[builder(default)]
    mode: RetrievalMode,
    #[builder(default = SourceFamily::GriddedAnalysis)]
    family: SourceFamily,
}

impl RetrievalRequest {
    pub fn field(&self) -> FieldId {
        self.field
    }

    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    pub fn requested(&self) -> DateTime<Utc> {
        self.requested
    }

    pub fn mode(&self) -> &RetrievalMode {
        &self.mode
    }

    pub fn family(&self) -> SourceFamily {
        self.family
    }

    /// Stable key used by the outcome cache.
    pub fn cache_key(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.family,
            self.domain,
            self.field,
            self.requested.format("%Y%m%d%H%M"),
            self.mode.label()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_comparator_nan_never_passes() {
        for cmp in [
            Comparator::Less,
            Comparator::LessOrEqual,
            Comparator::Greater,
            Comparator::GreaterOrEqual,
        ] {
            assert!(!cmp.test(f64::NAN, 0.0));
        }
        assert!(Comparator::GreaterOrEqual.test(75.0, 75.0));
        assert!(!Comparator::Greater.test(75.0, 75.0));
        assert!(Comparator::LessOrEqual.test(25.0, 25.0));
        assert!(Comparator::Less.test(24.9, 25.0));
    }

    #[test]
    fn test_cache_key_distinguishes_modes() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap();
        let single = RetrievalRequest::builder()
            .field(FieldId::WindSpeed)
            .domain("conus")
            .requested(at)
            .build();
        let diff = RetrievalRequest::builder()
            .field(FieldId::WindSpeed)
            .domain("conus")
            .requested(at)
            .mode(RetrievalMode::TwentyFourHourDifference)
            .build();
        assert_eq!(single.mode(), &RetrievalMode::Single);
        assert_eq!(single.family(), SourceFamily::GriddedAnalysis);
        assert_ne!(single.cache_key(), diff.cache_key());
        assert_eq!(
            single.cache_key(),
            "analysis-conus-wind_speed-202401011500-single"
        );
    }
}
