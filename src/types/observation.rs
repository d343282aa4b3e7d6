//! Point observation records and snapshots, plus the spatial-index plumbing
//! needed to thin them with `rstar`.

use crate::types::field::FieldId;
use crate::types::units::relative_humidity_from_dewpoint;
use chrono::{DateTime, Duration, Utc};
use rstar::{PointDistance, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reported sky cover, mapped from the standard sky-condition codes.
///
/// Convert a code from an observation payload with [`CloudCover::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudCover {
    /// `CLR` / `SKC`: no clouds.
    Clear,
    /// `FEW`: 1-2 oktas.
    Few,
    /// `SCT`: 3-4 oktas.
    Scattered,
    /// `BKN`: 5-7 oktas.
    Broken,
    /// `OVC`: 8 oktas.
    Overcast,
    /// `VV`: sky obscured, vertical visibility reported instead.
    Obscured,
}

impl CloudCover {
    /// Parses a sky-cover code, case-insensitively. Unknown or empty codes
    /// yield `None`.
    ///
    /// ```
    /// use firewx::CloudCover;
    ///
    /// assert_eq!(CloudCover::from_code("bkn"), Some(CloudCover::Broken));
    /// assert_eq!(CloudCover::from_code("M"), None);
    /// ```
    pub fn from_code(code: &str) -> Option<CloudCover> {
        match code.trim().to_ascii_uppercase().as_str() {
            "CLR" | "SKC" | "NCD" | "NSC" => Some(CloudCover::Clear),
            "FEW" => Some(CloudCover::Few),
            "SCT" => Some(CloudCover::Scattered),
            "BKN" => Some(CloudCover::Broken),
            "OVC" => Some(CloudCover::Overcast),
            "VV" => Some(CloudCover::Obscured),
            _ => None,
        }
    }

    /// Representative cover in oktas, as used for station-model plotting.
    pub fn oktas(&self) -> u8 {
        match self {
            CloudCover::Clear => 0,
            CloudCover::Few => 2,
            CloudCover::Scattered => 4,
            CloudCover::Broken => 6,
            CloudCover::Overcast | CloudCover::Obscured => 8,
        }
    }
}

/// One station's report, unit-normalized (°F, mph).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub dewpoint: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    /// Eastward wind component, mph.
    pub wind_u: Option<f64>,
    /// Northward wind component, mph.
    pub wind_v: Option<f64>,
    pub cloud_cover: Option<CloudCover>,
}

impl StationRecord {
    /// Number of populated weather elements; used to prefer complete reports
    /// when thinning.
    pub fn completeness(&self) -> usize {
        [
            self.temperature.is_some(),
            self.dewpoint.is_some(),
            self.wind_speed.is_some(),
            self.wind_direction.is_some(),
            self.cloud_cover.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    /// The reported value for `field`, if the feed carries it. Relative
    /// humidity is derived from temperature and dewpoint.
    pub fn value(&self, field: FieldId) -> Option<f64> {
        match field {
            FieldId::Temperature => self.temperature,
            FieldId::Dewpoint => self.dewpoint,
            FieldId::WindSpeed => self.wind_speed,
            FieldId::RelativeHumidity => match (self.temperature, self.dewpoint) {
                (Some(t), Some(td)) => Some(relative_humidity_from_dewpoint(t, td)),
                _ => None,
            },
            FieldId::TotalCloudCover => self.cloud_cover.map(|c| f64::from(c.oktas()) * 12.5),
            FieldId::WindGust | FieldId::SurfacePressure | FieldId::Visibility => None,
        }
    }
}

/// Keeps, per station, the latest report inside `(target - window, target]`.
///
/// Reports after `target` are never selected. The result is ordered by station id.
pub fn latest_per_station(
    records: Vec<StationRecord>,
    target: DateTime<Utc>,
    window: Duration,
) -> Vec<StationRecord> {
    let earliest = target - window;
    let mut latest: HashMap<String, StationRecord> = HashMap::new();
    for record in records {
        if record.observed_at > target || record.observed_at <= earliest {
            continue;
        }
        match latest.get(&record.station_id) {
            Some(kept) if kept.observed_at >= record.observed_at => {}
            _ => {
                latest.insert(record.station_id.clone(), record);
            }
        }
    }
    let mut kept: Vec<StationRecord> = latest.into_values().collect();
    kept.sort_by(|a, b| a.station_id.cmp(&b.station_id));
    kept
}

impl RTreeObject for StationRecord {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.latitude, self.longitude])
    }
}

/// Squared planar distance in degrees; only used for candidate pruning, the
/// thinning decision itself uses great-circle distance.
impl PointDistance for StationRecord {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.latitude - point[0];
        let dy = self.longitude - point[1];
        dx * dx + dy * dy
    }
}

/// A set of station reports valid at one reporting time.
///
/// `density_mask[i]` tells whether `records[i]` survived density reduction.
/// An empty snapshot is a legitimate value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSnapshot {
    pub records: Vec<StationRecord>,
    pub reporting_time: DateTime<Utc>,
    pub density_mask: Vec<bool>,
}

impl ObservationSnapshot {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records that survived density reduction.
    pub fn visible(&self) -> impl Iterator<Item = &StationRecord> {
        self.records
            .iter()
            .zip(self.density_mask.iter())
            .filter(|(_, keep)| **keep)
            .map(|(record, _)| record)
    }

    pub fn visible_count(&self) -> usize {
        self.density_mask.iter().filter(|keep| **keep).count()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn record(id: &str, lat: f64, lon: f64, at: DateTime<Utc>) -> StationRecord {
        StationRecord {
            station_id: id.to_string(),
            latitude: lat,
            longitude: lon,
            observed_at: at,
            temperature: Some(70.0),
            dewpoint: Some(40.0),
            wind_speed: Some(10.0),
            wind_direction: Some(270.0),
            wind_u: Some(10.0),
            wind_v: Some(0.0),
            cloud_cover: Some(CloudCover::Clear),
        }
    }
}
