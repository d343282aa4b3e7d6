//! HTTP implementation of the catalog traits.

use crate::catalog::endpoints::Endpoint;
use crate::catalog::error::FetchError;
use crate::catalog::fetcher::{DatasetFetcher, FetchTarget, ObservationSource};
use crate::catalog::field_table::{FieldMapping, FieldTable};
use crate::catalog::payload::{decode_grid, parse_observation_csv, GridRequest, ObservationColumns};
use crate::types::field::{canonical_unit, FieldId, GridShape, NormalizedField, Provenance};
use crate::types::observation::{latest_per_station, StationRecord};
use crate::types::source::{DomainId, SourceFamily};
use async_compression::tokio::bufread::GzipDecoder;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task;
use tokio_util::io::StreamReader;

/// Window used when a point-observation feed is fetched as a point field.
const POINT_FIELD_WINDOW_MINUTES: i64 = 60;

/// Talks to remote catalogs over HTTP and decodes their payloads.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: Client,
    field_table: Arc<FieldTable>,
}

impl HttpCatalog {
    pub fn new(field_table: FieldTable) -> Self {
        Self::with_client(Client::new(), field_table)
    }

    pub fn with_client(client: Client, field_table: FieldTable) -> Self {
        Self {
            client,
            field_table: Arc::new(field_table),
        }
    }

    pub fn field_table(&self) -> &FieldTable {
        &self.field_table
    }

    fn mapping(&self, family: SourceFamily, field: FieldId) -> Result<FieldMapping, FetchError> {
        self.field_table
            .lookup(family, field)
            .cloned()
            .ok_or(FetchError::UnmappedField { field, family })
    }

    fn observation_columns(&self) -> Result<ObservationColumns, FetchError> {
        Ok(ObservationColumns {
            temperature: self.mapping(SourceFamily::PointObservation, FieldId::Temperature)?,
            dewpoint: self.mapping(SourceFamily::PointObservation, FieldId::Dewpoint)?,
            wind_speed: self.mapping(SourceFamily::PointObservation, FieldId::WindSpeed)?,
        })
    }

    /// Downloads a locator, gunzipping when it ends in `.gz`.
    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!("Downloading {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::NetworkRequest(url.to_string(), e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::DatasetNotFound {
                url: url.to_string(),
            });
        }
        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                warn!("HTTP error for {}: {:?}", url, e);
                return Err(match e.status() {
                    Some(status) => FetchError::HttpStatus {
                        url: url.to_string(),
                        status,
                        source: e,
                    },
                    None => FetchError::NetworkRequest(url.to_string(), e),
                });
            }
        };

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(stream);
        let mut body = Vec::new();
        let read = if url.ends_with(".gz") {
            GzipDecoder::new(reader).read_to_end(&mut body).await
        } else {
            reader.read_to_end(&mut body).await
        };
        read.map_err(|e| FetchError::DownloadIo {
            url: url.to_string(),
            source: e,
        })?;

        info!("Downloaded {} bytes from {}", body.len(), url);
        Ok(body)
    }

    async fn download_reports(&self, url: String) -> Result<Vec<StationRecord>, FetchError> {
        let columns = self.observation_columns()?;
        let bytes = self.download(&url).await?;
        task::spawn_blocking(move || parse_observation_csv(&bytes, &url, &columns)).await?
    }

    async fn head(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => {
                debug!("Probe {} answered {}", url, response.status());
                true
            }
            Err(e) => {
                warn!("Probe {} failed: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
impl DatasetFetcher for HttpCatalog {
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        self.head(&endpoint.probe_url()).await
    }

    async fn fetch(&self, target: &FetchTarget<'_>) -> Result<NormalizedField, FetchError> {
        let url = target.locator();
        let mapping = self.mapping(target.family, target.field)?;

        if !target.family.is_gridded() {
            let records = self.download_reports(url.clone()).await?;
            return Ok(point_field(
                records,
                target,
                url,
                mapping.source_name,
                Duration::minutes(POINT_FIELD_WINDOW_MINUTES),
            ));
        }

        let bytes = self.download(&url).await?;
        let field = target.field;
        let family = target.family;
        let domain = target.domain.clone();
        let timestamp = target.timestamp;
        task::spawn_blocking(move || {
            decode_grid(
                &bytes,
                &GridRequest {
                    url: &url,
                    field,
                    family,
                    domain: &domain,
                    timestamp,
                    mapping: &mapping,
                },
            )
        })
        .await?
    }
}

#[async_trait]
impl ObservationSource for HttpCatalog {
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        self.head(&endpoint.probe_url()).await
    }

    async fn reports(
        &self,
        endpoint: &Endpoint,
        domain: &DomainId,
        target: DateTime<Utc>,
    ) -> Result<Vec<StationRecord>, FetchError> {
        let url = endpoint.locator(SourceFamily::PointObservation, domain, target);
        self.download_reports(url).await
    }
}

/// Lays the latest report of every station out as a single-row field.
pub(crate) fn point_field(
    records: Vec<StationRecord>,
    target: &FetchTarget<'_>,
    locator: String,
    source_name: String,
    window: Duration,
) -> NormalizedField {
    let kept = latest_per_station(records, target.timestamp, window);
    let mut values = Vec::with_capacity(kept.len());
    let mut latitudes = Vec::with_capacity(kept.len());
    let mut longitudes = Vec::with_capacity(kept.len());
    for record in &kept {
        values.push(record.value(target.field).unwrap_or(f64::NAN));
        latitudes.push(record.latitude);
        longitudes.push(record.longitude);
    }
    NormalizedField {
        field: target.field,
        shape: GridShape::new(1, kept.len()),
        values,
        latitudes,
        longitudes,
        unit: canonical_unit(target.field),
        valid_time: target.timestamp,
        provenance: Provenance {
            family: target.family,
            domain: target.domain.clone(),
            locator,
            source_name,
        },
    }
}
