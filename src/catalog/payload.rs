//! Decoding of catalog payloads into normalized values.
//!
//! Gridded sources serve a JSON grid document; the observation source serves
//! headered CSV which is parsed with polars.

use crate::catalog::error::FetchError;
use crate::catalog::field_table::FieldMapping;
use crate::types::field::{FieldId, GridShape, NormalizedField, Provenance};
use crate::types::observation::{CloudCover, StationRecord};
use crate::types::source::{DomainId, SourceFamily};
use crate::types::units::wind_components;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use polars::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

#[derive(Debug, Deserialize)]
struct GridDocument {
    valid_time: DateTime<Utc>,
    shape: [usize; 2],
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    variables: HashMap<String, GridVariable>,
}

#[derive(Debug, Deserialize)]
struct GridVariable {
    #[serde(default)]
    units: Option<String>,
    values: Vec<Option<f64>>,
    #[serde(default)]
    fill_value: Option<f64>,
}

/// What the caller expects to find in a grid document.
pub(crate) struct GridRequest<'a> {
    pub url: &'a str,
    pub field: FieldId,
    pub family: SourceFamily,
    pub domain: &'a DomainId,
    pub timestamp: DateTime<Utc>,
    pub mapping: &'a FieldMapping,
}

pub(crate) fn decode_grid(bytes: &[u8], request: &GridRequest<'_>) -> Result<NormalizedField, FetchError> {
    let url = request.url;
    let mut document: GridDocument =
        serde_json::from_slice(bytes).map_err(|e| FetchError::JsonParse {
            url: url.to_string(),
            source: e,
        })?;

    let shape = GridShape::new(document.shape[0], document.shape[1]);
    if shape.is_empty() {
        return Err(FetchError::malformed(url, "grid has no cells"));
    }
    if document.latitudes.len() != shape.len() || document.longitudes.len() != shape.len() {
        return Err(FetchError::malformed(
            url,
            format!(
                "coordinate arrays ({} lat, {} lon) do not match shape {}",
                document.latitudes.len(),
                document.longitudes.len(),
                shape
            ),
        ));
    }
    if document.valid_time != request.timestamp {
        return Err(FetchError::malformed(
            url,
            format!(
                "document valid time {} does not match requested {}",
                document.valid_time, request.timestamp
            ),
        ));
    }

    let source_name = &request.mapping.source_name;
    let variable = document
        .variables
        .remove(source_name)
        .ok_or_else(|| FetchError::FieldNotFound {
            url: url.to_string(),
            variable: source_name.clone(),
        })?;
    if variable.values.len() != shape.len() {
        return Err(FetchError::malformed(
            url,
            format!(
                "variable '{}' has {} values, expected {}",
                source_name,
                variable.values.len(),
                shape.len()
            ),
        ));
    }
    if let Some(units) = &variable.units {
        debug!(
            "Variable '{}' from {} declares units '{}', converting from {}",
            source_name,
            url,
            units,
            request.mapping.conversion.source_unit()
        );
    }

    let fill = variable.fill_value;
    let mut values: Vec<f64> = variable
        .values
        .into_iter()
        .map(|v| match (v, fill) {
            (Some(x), Some(f)) if x == f => f64::NAN,
            (Some(x), _) => x,
            (None, _) => f64::NAN,
        })
        .collect();
    request.mapping.conversion.apply_all(&mut values);

    Ok(NormalizedField {
        field: request.field,
        shape,
        values,
        latitudes: document.latitudes,
        longitudes: document.longitudes,
        unit: request.mapping.conversion.target_unit(),
        valid_time: document.valid_time,
        provenance: Provenance {
            family: request.family,
            domain: request.domain.clone(),
            locator: url.to_string(),
            source_name: source_name.clone(),
        },
    })
}

/// Column names and conversions for the observation CSV.
#[derive(Debug, Clone)]
pub(crate) struct ObservationColumns {
    pub temperature: FieldMapping,
    pub dewpoint: FieldMapping,
    pub wind_speed: FieldMapping,
}

pub(crate) const WIND_DIRECTION_COLUMN: &str = "wind_direction";
pub(crate) const CLOUD_COVER_COLUMN: &str = "cloud_coverage";

/// Parses headered observation CSV into unit-normalized station records.
///
/// Runs polars on a staged temp file, so call it from a blocking task. Rows
/// without a station id, position or parseable time are skipped.
pub(crate) fn parse_observation_csv(
    bytes: &[u8],
    url: &str,
    columns: &ObservationColumns,
) -> Result<Vec<StationRecord>, FetchError> {
    let mut temp_file = NamedTempFile::new().map_err(|e| FetchError::CsvStaging {
        url: url.to_string(),
        source: e,
    })?;
    temp_file
        .write_all(bytes)
        .and_then(|_| temp_file.flush())
        .map_err(|e| FetchError::CsvStaging {
            url: url.to_string(),
            source: e,
        })?;

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(temp_file.path().to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| FetchError::CsvRead {
            url: url.to_string(),
            source: e,
        })?;

    let csv_err = |e: PolarsError| FetchError::CsvRead {
        url: url.to_string(),
        source: e,
    };

    for required in ["station", "latitude", "longitude", "time"] {
        if df.get_column_index(required).is_none() {
            return Err(FetchError::malformed(
                url,
                format!("observation CSV is missing column '{required}'"),
            ));
        }
    }

    let stations = string_column(&df, "station").map_err(csv_err)?;
    let times = string_column(&df, "time").map_err(csv_err)?;
    let latitudes = float_column(&df, "latitude").map_err(csv_err)?;
    let longitudes = float_column(&df, "longitude").map_err(csv_err)?;
    let temperatures = float_column(&df, &columns.temperature.source_name).map_err(csv_err)?;
    let dewpoints = float_column(&df, &columns.dewpoint.source_name).map_err(csv_err)?;
    let speeds = float_column(&df, &columns.wind_speed.source_name).map_err(csv_err)?;
    let directions = float_column(&df, WIND_DIRECTION_COLUMN).map_err(csv_err)?;
    let covers = string_column(&df, CLOUD_COVER_COLUMN).map_err(csv_err)?;

    let mut records = Vec::with_capacity(df.height());
    let mut skipped = 0usize;
    for i in 0..df.height() {
        let (Some(station_id), Some(latitude), Some(longitude), Some(observed_at)) = (
            stations[i].clone(),
            latitudes[i],
            longitudes[i],
            times[i].as_deref().and_then(parse_report_time),
        ) else {
            skipped += 1;
            continue;
        };

        let temperature = temperatures[i].map(|v| columns.temperature.conversion.apply(v));
        let dewpoint = dewpoints[i].map(|v| columns.dewpoint.conversion.apply(v));
        let wind_speed = speeds[i].map(|v| columns.wind_speed.conversion.apply(v));
        let wind_direction = directions[i];
        let (wind_u, wind_v) = match (wind_speed, wind_direction) {
            (Some(speed), Some(direction)) => {
                let (u, v) = wind_components(speed, direction);
                (Some(u), Some(v))
            }
            _ => (None, None),
        };

        records.push(StationRecord {
            station_id,
            latitude,
            longitude,
            observed_at,
            temperature,
            dewpoint,
            wind_speed,
            wind_direction,
            wind_u,
            wind_v,
            cloud_cover: covers[i].as_deref().and_then(CloudCover::from_code),
        });
    }
    if skipped > 0 {
        warn!("Skipped {} incomplete observation rows from {}", skipped, url);
    }
    Ok(records)
}

/// Returns one entry per row; an absent column yields all `None`.
fn float_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    if df.get_column_index(name).is_none() {
        return Ok(vec![None; df.height()]);
    }
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

fn string_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    if df.get_column_index(name).is_none() {
        return Ok(vec![None; df.height()]);
    }
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
        .collect())
}

pub(crate) fn parse_report_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
