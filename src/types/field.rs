//! Canonical field identifiers and the normalized field value handed to consumers.

use crate::types::source::{DomainId, SourceFamily};
use crate::types::units::Unit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical, source-independent field identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    /// 2 m air temperature.
    Temperature,
    /// 2 m dewpoint temperature.
    Dewpoint,
    /// 2 m relative humidity.
    RelativeHumidity,
    /// 10 m sustained wind speed.
    WindSpeed,
    /// 10 m wind gust.
    WindGust,
    SurfacePressure,
    Visibility,
    TotalCloudCover,
}

impl FieldId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldId::Temperature => "temperature",
            FieldId::Dewpoint => "dewpoint",
            FieldId::RelativeHumidity => "relative_humidity",
            FieldId::WindSpeed => "wind_speed",
            FieldId::WindGust => "wind_gust",
            FieldId::SurfacePressure => "surface_pressure",
            FieldId::Visibility => "visibility",
            FieldId::TotalCloudCover => "total_cloud_cover",
        }
    }
}

/// The unit every consumer sees for `field`, whichever source produced it.
pub fn canonical_unit(field: FieldId) -> Unit {
    match field {
        FieldId::Temperature | FieldId::Dewpoint => Unit::Fahrenheit,
        FieldId::RelativeHumidity | FieldId::TotalCloudCover => Unit::Percent,
        FieldId::WindSpeed | FieldId::WindGust => Unit::MilesPerHour,
        FieldId::SurfacePressure => Unit::Hectopascal,
        FieldId::Visibility => Unit::Foot,
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a row-major grid. A point set is a grid with a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub ny: usize,
    pub nx: usize,
}

impl GridShape {
    pub fn new(ny: usize, nx: usize) -> Self {
        Self { ny, nx }
    }

    pub fn len(&self) -> usize {
        self.ny * self.nx
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.ny, self.nx)
    }
}

/// Where a field came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub family: SourceFamily,
    pub domain: DomainId,
    /// Concrete locator the payload was read from, or a description for derived fields.
    pub locator: String,
    /// Name of the variable in the source's own vocabulary.
    pub source_name: String,
}

/// A unit-normalized field with coordinates and a valid time.
///
/// Values are stored row-major; missing values are NaN. Latitude and longitude
/// arrays have one entry per value so curvilinear grids are represented
/// without reprojection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedField {
    pub field: FieldId,
    pub shape: GridShape,
    pub values: Vec<f64>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub unit: Unit,
    pub valid_time: DateTime<Utc>,
    pub provenance: Provenance,
}

impl NormalizedField {
    pub fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.shape.ny || col >= self.shape.nx {
            return None;
        }
        self.values.get(row * self.shape.nx + col).copied()
    }

    /// `true` when both fields share shape and coordinates, so elementwise
    /// combination is meaningful.
    pub fn is_aligned_with(&self, other: &NormalizedField) -> bool {
        self.shape == other.shape
            && self.latitudes == other.latitudes
            && self.longitudes == other.longitudes
    }

    /// Finite minimum and maximum, ignoring missing values.
    pub fn finite_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// A boolean grid produced by threshold tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskField {
    pub shape: GridShape,
    pub values: Vec<bool>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub valid_time: DateTime<Utc>,
    /// Human readable description of the combined criteria.
    pub description: String,
}

impl MaskField {
    pub fn count_true(&self) -> usize {
        self.values.iter().filter(|v| **v).count()
    }

    pub fn true_cells(&self) -> Vec<(usize, usize)> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v)
            .map(|(i, _)| (i / self.shape.nx, i % self.shape.nx))
            .collect()
    }
}
