//! Station density reduction: no two surviving stations lie closer than the
//! configured great-circle distance.

use crate::types::observation::StationRecord;
use haversine::{distance, Location as HaversineLocation, Units};
use ordered_float::OrderedFloat;
use rstar::RTree;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

const KM_PER_DEGREE: f64 = 111.195;

/// Which station survives when two are too close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityPriority {
    /// Prefer reports with more populated elements.
    #[default]
    Completeness,
    /// Prefer the strongest reported wind.
    StrongestWind,
}

struct ThinningCandidate<'a> {
    priority: (usize, OrderedFloat<f64>),
    index: usize,
    record: &'a StationRecord,
}

impl PartialEq for ThinningCandidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for ThinningCandidate<'_> {}
impl PartialOrd for ThinningCandidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ThinningCandidate<'_> {
    // Max-heap: higher priority first, then lower station id, then input order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| Reverse(&self.record.station_id).cmp(&Reverse(&other.record.station_id)))
            .then_with(|| Reverse(self.index).cmp(&Reverse(other.index)))
    }
}

fn priority_of(record: &StationRecord, priority: DensityPriority) -> (usize, OrderedFloat<f64>) {
    let wind = OrderedFloat(record.wind_speed.unwrap_or(-1.0));
    match priority {
        DensityPriority::Completeness => (record.completeness(), wind),
        DensityPriority::StrongestWind => (usize::from(record.wind_speed.is_some()), wind),
    }
}

pub fn great_circle_km(a: &StationRecord, b: &StationRecord) -> f64 {
    distance(
        HaversineLocation {
            latitude: a.latitude,
            longitude: a.longitude,
        },
        HaversineLocation {
            latitude: b.latitude,
            longitude: b.longitude,
        },
        Units::Kilometers,
    )
}

/// Returns one flag per record telling whether it survives thinning.
///
/// Records are visited in priority order; a record is kept unless an already
/// kept record lies within `min_distance_km`. A non-positive distance keeps
/// everything.
pub fn density_mask(
    records: &[StationRecord],
    min_distance_km: f64,
    priority: DensityPriority,
) -> Vec<bool> {
    if min_distance_km.is_nan() || min_distance_km <= 0.0 {
        return vec![true; records.len()];
    }

    let mut heap: BinaryHeap<ThinningCandidate> = records
        .iter()
        .enumerate()
        .map(|(index, record)| ThinningCandidate {
            priority: priority_of(record, priority),
            index,
            record,
        })
        .collect();

    let mut mask = vec![false; records.len()];
    let mut kept: RTree<StationRecord> = RTree::new();
    while let Some(candidate) = heap.pop() {
        let record = candidate.record;
        // Degree-space radius generous enough to contain the great-circle
        // radius at this latitude; exact distances are checked below.
        let cos_lat = record.latitude.to_radians().cos().abs().max(0.05);
        let radius_deg = 2.0 * min_distance_km / (KM_PER_DEGREE * cos_lat);
        // Near the antimeridian, also search the longitude wrapped by 360.
        let mut centres = vec![record.longitude];
        if record.longitude + radius_deg > 180.0 {
            centres.push(record.longitude - 360.0);
        }
        if record.longitude - radius_deg < -180.0 {
            centres.push(record.longitude + 360.0);
        }
        let crowded = centres.iter().any(|longitude| {
            kept.locate_within_distance([record.latitude, *longitude], radius_deg * radius_deg)
                .any(|other| great_circle_km(record, other) < min_distance_km)
        });
        if !crowded {
            mask[candidate.index] = true;
            kept.insert(record.clone());
        }
    }
    mask
}
