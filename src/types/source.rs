//! Identifies the remote catalog families and spatial domains data is pulled from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The family of a remote catalog.
///
/// Each family publishes on its own cadence and names its variables in its own
/// vocabulary (see [`crate::FieldTable`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFamily {
    /// High-resolution gridded analysis with primary and backup mirrors.
    GriddedAnalysis,
    /// Lower-resolution regional analysis service, usually a single endpoint.
    RegionalAnalysis,
    /// Station-based point observations, queryable by nearest time.
    PointObservation,
}

impl SourceFamily {
    pub(crate) fn path_segment(&self) -> &'static str {
        match self {
            SourceFamily::GriddedAnalysis => "analysis",
            SourceFamily::RegionalAnalysis => "regional",
            SourceFamily::PointObservation => "observations",
        }
    }

    pub fn is_gridded(&self) -> bool {
        !matches!(self, SourceFamily::PointObservation)
    }
}

/// Formats a `SourceFamily` using its path segment.
///
/// ```
/// use firewx::SourceFamily;
///
/// assert_eq!(SourceFamily::GriddedAnalysis.to_string(), "analysis");
/// ```
impl fmt::Display for SourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// A spatial domain identifier such as `"conus"` or `"alaska"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub String);

impl DomainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DomainId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
