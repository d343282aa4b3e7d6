//! Maps canonical field identifiers to each source family's variable names and
//! to the unit conversion applied after extraction.
//!
//! The table is plain configuration: an immutable value built once and handed
//! to the fetcher.

use crate::types::field::FieldId;
use crate::types::source::SourceFamily;
use crate::types::units::{Conversion, Unit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_name: String,
    pub conversion: Conversion,
}

/// One configured mapping, as it appears in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTableEntry {
    pub family: SourceFamily,
    pub field: FieldId,
    pub source_name: String,
    pub conversion: Conversion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTable {
    entries: HashMap<(SourceFamily, FieldId), FieldMapping>,
}

impl Default for FieldTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FieldTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The vocabulary of the catalogs this crate ships defaults for.
    pub fn builtin() -> Self {
        use Conversion::*;
        use FieldId::*;
        use SourceFamily::*;

        let rows: [(SourceFamily, FieldId, &str, Conversion); 18] = [
            (GriddedAnalysis, Temperature, "Temperature_height_above_ground", KelvinToFahrenheit),
            (GriddedAnalysis, Dewpoint, "Dewpoint_temperature_height_above_ground", KelvinToFahrenheit),
            (GriddedAnalysis, WindSpeed, "Wind_speed_height_above_ground", MetersPerSecondToMph),
            (GriddedAnalysis, WindGust, "Wind_speed_gust_height_above_ground", MetersPerSecondToMph),
            (GriddedAnalysis, SurfacePressure, "Pressure_surface", PascalToHectopascal),
            (GriddedAnalysis, Visibility, "Visibility_surface", MetersToFeet),
            (GriddedAnalysis, TotalCloudCover, "Total_cloud_cover_entire_atmosphere_single_layer", Identity(Unit::Percent)),
            (RegionalAnalysis, Temperature, "TMP_2maboveground", KelvinToFahrenheit),
            (RegionalAnalysis, Dewpoint, "DPT_2maboveground", KelvinToFahrenheit),
            (RegionalAnalysis, RelativeHumidity, "RH_2maboveground", Identity(Unit::Percent)),
            (RegionalAnalysis, WindSpeed, "WIND_10maboveground", MetersPerSecondToMph),
            (RegionalAnalysis, WindGust, "GUST_10maboveground", MetersPerSecondToMph),
            (RegionalAnalysis, SurfacePressure, "PRES_surface", PascalToHectopascal),
            (RegionalAnalysis, Visibility, "VIS_surface", MetersToFeet),
            (RegionalAnalysis, TotalCloudCover, "TCDC_entireatmosphere", Identity(Unit::Percent)),
            (PointObservation, Temperature, "air_temperature", CelsiusToFahrenheit),
            (PointObservation, Dewpoint, "dew_point_temperature", CelsiusToFahrenheit),
            (PointObservation, WindSpeed, "wind_speed", KnotsToMph),
        ];

        let entries = rows
            .into_iter()
            .map(|(family, field, name, conversion)| {
                (
                    (family, field),
                    FieldMapping {
                        source_name: name.to_string(),
                        conversion,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Returns a new table with `overrides` layered over `self`.
    pub fn with_overrides(&self, overrides: &[FieldTableEntry]) -> Self {
        let mut entries = self.entries.clone();
        for entry in overrides {
            entries.insert(
                (entry.family, entry.field),
                FieldMapping {
                    source_name: entry.source_name.clone(),
                    conversion: entry.conversion,
                },
            );
        }
        Self { entries }
    }

    pub fn lookup(&self, family: SourceFamily, field: FieldId) -> Option<&FieldMapping> {
        self.entries.get(&(family, field))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_differ_per_source() {
        let table = FieldTable::builtin();
        let gridded = table
            .lookup(SourceFamily::GriddedAnalysis, FieldId::Temperature)
            .unwrap();
        let regional = table
            .lookup(SourceFamily::RegionalAnalysis, FieldId::Temperature)
            .unwrap();
        assert_ne!(gridded.source_name, regional.source_name);
        assert_eq!(gridded.conversion.target_unit(), Unit::Fahrenheit);
        assert!(table
            .lookup(SourceFamily::GriddedAnalysis, FieldId::RelativeHumidity)
            .is_none());
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let table = FieldTable::builtin().with_overrides(&[
            FieldTableEntry {
                family: SourceFamily::GriddedAnalysis,
                field: FieldId::Temperature,
                source_name: "TMP".into(),
                conversion: Conversion::CelsiusToFahrenheit,
            },
            FieldTableEntry {
                family: SourceFamily::GriddedAnalysis,
                field: FieldId::RelativeHumidity,
                source_name: "RH".into(),
                conversion: Conversion::Identity(Unit::Percent),
            },
        ]);
        let temp = table
            .lookup(SourceFamily::GriddedAnalysis, FieldId::Temperature)
            .unwrap();
        assert_eq!(temp.source_name, "TMP");
        assert_eq!(temp.conversion, Conversion::CelsiusToFahrenheit);
        assert_eq!(table.len(), FieldTable::builtin().len() + 1);
    }
}
