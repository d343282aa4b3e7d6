//! The main entry point: retrieves fields, composes products and aligns
//! observation snapshots with them.

use crate::catalog::endpoints::EndpointSet;
use crate::catalog::fetcher::{DatasetFetcher, ObservationSource};
use crate::catalog::field_table::FieldTable;
use crate::catalog::http::HttpCatalog;
use crate::catalog::registry::SourceRegistry;
use crate::config::FireWxConfig;
use crate::error::FireWxError;
use crate::observations::sync::{CrossFeedSynchronizer, SyncedPair};
use crate::products::composer::{compound_mask, difference, relative_humidity};
use crate::products::error::ProductError;
use crate::products::outcome::{Product, ProductOutcome};
use crate::retrieval::cache::OutcomeCache;
use crate::retrieval::cascade::{DegradationRecord, RetrievalCascade, RetrievalOutcome};
use crate::retrieval::error::RetrievalError;
use crate::types::field::{FieldId, NormalizedField};
use crate::types::observation::ObservationSnapshot;
use crate::types::request::{RetrievalMode, RetrievalRequest, ThresholdTest};
use crate::types::source::{DomainId, SourceFamily};
use crate::utils::{ensure_cache_dir_exists, get_cache_dir};
use bon::bon;
use chrono::{DateTime, Utc};
use futures_util::future::{join_all, try_join_all};
use log::{info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// The fire-weather data client.
///
/// Holds the configured catalogs and policies. Every call builds its own
/// cascade, so one client can serve concurrent requests.
///
/// # Examples
///
/// ```rust
/// # use firewx::{FireWx, FireWxConfig, FireWxError};
/// # async fn run() -> Result<(), FireWxError> {
/// let config = FireWxConfig::from_file("firewx.toml").await?;
/// let client = FireWx::new(config).await?;
/// # Ok(())
/// # }
/// ```
pub struct FireWx {
    catalog: Arc<dyn DatasetFetcher>,
    observations: Arc<dyn ObservationSource>,
    registry: SourceRegistry,
    field_table: FieldTable,
    config: FireWxConfig,
    cache: Option<OutcomeCache>,
}

#[bon]
impl FireWx {
    /// Creates a client talking HTTP to the configured catalogs.
    ///
    /// # Errors
    ///
    /// Returns [`FireWxError::CacheDirResolution`] or
    /// [`FireWxError::CacheDirCreation`] when the outcome cache is enabled and
    /// its directory cannot be prepared.
    pub async fn new(config: FireWxConfig) -> Result<Self, FireWxError> {
        let catalog = Arc::new(HttpCatalog::new(config.field_table()));
        let mut client = Self::with_backends(config, catalog.clone(), catalog);
        if client.config.cache.enabled {
            let directory = match &client.config.cache.directory {
                Some(directory) => directory.clone(),
                None => get_cache_dir()?,
            };
            ensure_cache_dir_exists(&directory).await?;
            client.cache = Some(OutcomeCache::new(directory, client.config.cache.ttl()));
        }
        Ok(client)
    }

    /// Reads a TOML configuration file and creates an HTTP client from it.
    pub async fn from_config_file(path: impl AsRef<Path>) -> Result<Self, FireWxError> {
        let config = FireWxConfig::from_file(path).await?;
        Self::new(config).await
    }

    /// Creates a client over arbitrary catalog implementations. The outcome
    /// cache is not set up; attach one with [`FireWx::with_cache`].
    pub fn with_backends(
        config: FireWxConfig,
        catalog: Arc<dyn DatasetFetcher>,
        observations: Arc<dyn ObservationSource>,
    ) -> Self {
        Self {
            catalog,
            observations,
            registry: config.registry(),
            field_table: config.field_table(),
            config,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: OutcomeCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &FireWxConfig {
        &self.config
    }

    fn endpoints(&self, family: SourceFamily, domain: &DomainId) -> Result<EndpointSet, RetrievalError> {
        self.registry
            .resolve(family, domain)
            .ok_or_else(|| RetrievalError::NoEndpoints {
                family,
                domain: domain.clone(),
            })
    }

    /// Retrieves one field at the freshest candidate any endpoint serves.
    ///
    /// This method uses a builder pattern.
    ///
    /// # Arguments
    ///
    /// * `.field(FieldId)`: **Required.**
    /// * `.domain(impl Into<DomainId>)`: **Required.**
    /// * `.requested(DateTime<Utc>)`: **Required.** The instant wanted; the
    ///   outcome's `actual_timestamp` tells which candidate was achieved.
    /// * `.family(SourceFamily)`: Optional. Defaults to the gridded analysis.
    ///
    /// # Errors
    ///
    /// Returns [`FireWxError::Retrieval`] when no endpoint is configured or
    /// every candidate on every endpoint failed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use firewx::{FireWx, FireWxConfig, FireWxError, FieldId};
    /// # use chrono::{TimeZone, Utc};
    /// # async fn run(client: FireWx) -> Result<(), FireWxError> {
    /// let outcome = client
    ///     .retrieve()
    ///     .field(FieldId::Temperature)
    ///     .domain("conus")
    ///     .requested(Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap())
    ///     .call()
    ///     .await?;
    /// println!("valid at {}", outcome.actual_timestamp);
    /// # Ok(())
    /// # }
    /// ```
    #[builder]
    pub async fn retrieve(
        &self,
        field: FieldId,
        #[builder(into)] domain: DomainId,
        requested: DateTime<Utc>,
        family: Option<SourceFamily>,
    ) -> Result<RetrievalOutcome, FireWxError> {
        let endpoints = self.endpoints(family.unwrap_or(SourceFamily::GriddedAnalysis), &domain)?;
        let cascade = RetrievalCascade::new(self.catalog.as_ref(), &endpoints, &self.config.cascade);
        Ok(cascade.retrieve(field, requested).await?)
    }

    /// Computes the product a request asks for.
    ///
    /// Independent inputs are retrieved concurrently. When they land on
    /// different candidates, the fresher ones are fetched again at the oldest
    /// achieved time, so every product has a single valid time.
    ///
    /// With the outcome cache enabled, a fresh cached result for the same
    /// request is returned without touching the network.
    pub async fn product(&self, request: &RetrievalRequest) -> Result<ProductOutcome, FireWxError> {
        let key = request.cache_key();
        if let Some(cache) = &self.cache {
            match cache.get::<ProductOutcome>(&key).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(e) => warn!("Ignoring unreadable cache entry {}: {}", key, e),
            }
        }

        let outcome = self.compute(request).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&key, &outcome).await {
                warn!("Could not cache {}: {}", key, e);
            }
        }
        Ok(outcome)
    }

    async fn compute(&self, request: &RetrievalRequest) -> Result<ProductOutcome, FireWxError> {
        let endpoints = self.endpoints(request.family(), request.domain())?;
        let cascade = RetrievalCascade::new(self.catalog.as_ref(), &endpoints, &self.config.cascade);
        let requested = request.requested();

        match request.mode() {
            RetrievalMode::Single => {
                let outcome = cascade.retrieve(request.field(), requested).await?;
                Ok(ProductOutcome {
                    requested,
                    valid_time: outcome.actual_timestamp,
                    paired_time: None,
                    attempts_consumed: outcome.attempts_consumed,
                    degradations: outcome.degradation.into_iter().collect(),
                    product: Product::Field(outcome.field),
                })
            }
            RetrievalMode::TwentyFourHourDifference => {
                let pair = cascade.retrieve_pair(request.field(), requested).await?;
                let delta = difference(&pair.current, &pair.previous)?;
                Ok(ProductOutcome {
                    product: Product::Field(delta),
                    requested,
                    valid_time: pair.actual_timestamp,
                    paired_time: Some(pair.paired_timestamp),
                    attempts_consumed: pair.attempts_consumed,
                    degradations: pair.degradation.into_iter().collect(),
                })
            }
            RetrievalMode::DerivedHumidity => {
                let (inputs, summary) = self
                    .retrieve_aligned(&cascade, &[FieldId::Temperature, FieldId::Dewpoint], requested)
                    .await?;
                let rh = relative_humidity(
                    input(&inputs, FieldId::Temperature)?,
                    input(&inputs, FieldId::Dewpoint)?,
                )?;
                Ok(summary.finish(Product::Field(rh), requested))
            }
            RetrievalMode::ThresholdMask(tests) => {
                self.threshold_product(&cascade, request.family(), tests, requested)
                    .await
            }
        }
    }

    async fn threshold_product(
        &self,
        cascade: &RetrievalCascade<'_, dyn DatasetFetcher>,
        family: SourceFamily,
        tests: &[ThresholdTest],
        requested: DateTime<Utc>,
    ) -> Result<ProductOutcome, FireWxError> {
        if tests.is_empty() {
            return Err(ProductError::EmptyCriteria.into());
        }
        let derive_humidity = tests.iter().any(|t| t.field == FieldId::RelativeHumidity)
            && self
                .field_table
                .lookup(family, FieldId::RelativeHumidity)
                .is_none();

        let mut wanted: Vec<FieldId> = tests
            .iter()
            .map(|t| t.field)
            .filter(|f| !(derive_humidity && *f == FieldId::RelativeHumidity))
            .collect();
        if derive_humidity {
            wanted.extend([FieldId::Temperature, FieldId::Dewpoint]);
        }
        wanted.sort();
        wanted.dedup();

        let (mut inputs, summary) = self.retrieve_aligned(cascade, &wanted, requested).await?;
        if derive_humidity {
            let rh = relative_humidity(
                input(&inputs, FieldId::Temperature)?,
                input(&inputs, FieldId::Dewpoint)?,
            )?;
            inputs.insert(FieldId::RelativeHumidity, rh);
        }

        let mut criteria = Vec::with_capacity(tests.len());
        for test in tests {
            criteria.push((input(&inputs, test.field)?, *test));
        }
        let mask = compound_mask(&criteria)?;
        Ok(summary.finish(Product::Mask(mask), requested))
    }

    /// Retrieves `fields` concurrently and brings them to one valid time.
    ///
    /// Starting at the oldest achieved timestamp, each remaining candidate is
    /// tried in turn; inputs not already valid there are fetched again, and the
    /// first candidate at which every input exists wins.
    async fn retrieve_aligned(
        &self,
        cascade: &RetrievalCascade<'_, dyn DatasetFetcher>,
        fields: &[FieldId],
        requested: DateTime<Utc>,
    ) -> Result<(HashMap<FieldId, NormalizedField>, AlignedSummary), FireWxError> {
        let mut outcomes =
            try_join_all(fields.iter().map(|field| cascade.retrieve(*field, requested))).await?;
        let mut attempts: Vec<usize> = outcomes.iter().map(|o| o.attempts_consumed).collect();

        let oldest = outcomes.iter().map(|o| o.actual_timestamp).min();
        let misaligned = outcomes
            .iter()
            .any(|o| Some(o.actual_timestamp) != oldest);
        if let (Some(oldest), true) = (oldest, misaligned) {
            let candidates = cascade.candidates(requested);
            let start = candidates
                .iter()
                .position(|candidate| candidate == oldest)
                .unwrap_or(candidates.len());
            let mut last_error: Option<RetrievalError> = None;
            let mut aligned = false;

            for at in candidates.iter().skip(start) {
                let stale: Vec<usize> = (0..outcomes.len())
                    .filter(|i| outcomes[*i].actual_timestamp != at)
                    .collect();
                info!(
                    "Re-aligning {} of {} inputs to {} (requested {})",
                    stale.len(),
                    fields.len(),
                    at,
                    requested
                );
                let results = join_all(
                    stale
                        .iter()
                        .map(|i| cascade.retrieve_at(fields[*i], requested, at)),
                )
                .await;

                let mut realigned = Vec::with_capacity(stale.len());
                let mut failure = None;
                for (i, result) in stale.into_iter().zip(results) {
                    match result {
                        Ok(outcome) => {
                            attempts[i] += outcome.attempts_consumed;
                            realigned.push((i, outcome));
                        }
                        Err(e) => {
                            attempts[i] += e.attempts();
                            failure = Some(e);
                        }
                    }
                }
                match failure {
                    None => {
                        for (i, outcome) in realigned {
                            outcomes[i] = outcome;
                        }
                        aligned = true;
                        break;
                    }
                    Some(e) => {
                        warn!("Inputs cannot all be aligned at {}: {}", at, e);
                        last_error = Some(e);
                    }
                }
            }

            if !aligned {
                if let Some(e) = last_error {
                    return Err(e.into());
                }
            }
        }

        let mut summary = AlignedSummary {
            valid_time: requested,
            attempts_consumed: attempts.iter().sum(),
            degradations: Vec::new(),
        };
        let mut inputs = HashMap::with_capacity(outcomes.len());
        for (field, outcome) in fields.iter().zip(outcomes) {
            summary.valid_time = outcome.actual_timestamp;
            summary.degradations.extend(outcome.degradation);
            inputs.insert(*field, outcome.field);
        }
        Ok((inputs, summary))
    }

    /// Fetches and thins the observation snapshot matching a grid valid time.
    ///
    /// This method uses a builder pattern.
    ///
    /// # Arguments
    ///
    /// * `.domain(impl Into<DomainId>)`: **Required.**
    /// * `.grid_valid_time(DateTime<Utc>)`: **Required.** The snapshot is never newer than this.
    /// * `.density_km(f64)`: Optional. Minimum distance between kept stations.
    ///   Defaults to the configured `observations.density_km`.
    /// * `.now(DateTime<Utc>)`: Optional. Wall-clock time used to decide which
    ///   snapshot is complete. Defaults to the current time.
    ///
    /// # Errors
    ///
    /// Returns [`FireWxError::Sync`] when no admissible snapshot exists, and
    /// [`FireWxError::Retrieval`] when no observation endpoint is configured.
    #[builder]
    pub async fn snapshot(
        &self,
        #[builder(into)] domain: DomainId,
        grid_valid_time: DateTime<Utc>,
        density_km: Option<f64>,
        now: Option<DateTime<Utc>>,
    ) -> Result<ObservationSnapshot, FireWxError> {
        let endpoints = self.endpoints(SourceFamily::PointObservation, &domain)?;
        let synchronizer = CrossFeedSynchronizer::new(
            self.observations.as_ref(),
            &endpoints,
            &self.config.observations,
            &self.config.cascade,
        );
        Ok(synchronizer
            .snapshot_at(
                grid_valid_time,
                density_km.unwrap_or(self.config.observations.density_km),
                now.unwrap_or_else(Utc::now),
            )
            .await?)
    }

    /// Pairs a retrieved grid with the observation snapshot aligned to it.
    ///
    /// A failure here is a [`FireWxError::Sync`]; the grid is still usable on its own.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use firewx::{FireWx, FireWxError, FieldId};
    /// # use chrono::Utc;
    /// # async fn run(client: FireWx) -> Result<(), FireWxError> {
    /// let grid = client
    ///     .retrieve()
    ///     .field(FieldId::Temperature)
    ///     .domain("conus")
    ///     .requested(Utc::now())
    ///     .call()
    ///     .await?;
    /// match client.sync().grid(&grid.field).call().await {
    ///     Ok(pair) => println!("{} stations", pair.snapshot.visible_count()),
    ///     Err(e) => println!("rendering grid alone: {e}"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[builder]
    pub async fn sync(
        &self,
        grid: &NormalizedField,
        density_km: Option<f64>,
        now: Option<DateTime<Utc>>,
    ) -> Result<SyncedPair, FireWxError> {
        let endpoints = self.endpoints(SourceFamily::PointObservation, &grid.provenance.domain)?;
        let synchronizer = CrossFeedSynchronizer::new(
            self.observations.as_ref(),
            &endpoints,
            &self.config.observations,
            &self.config.cascade,
        );
        Ok(synchronizer
            .sync_at(
                grid.clone(),
                density_km.unwrap_or(self.config.observations.density_km),
                now.unwrap_or_else(Utc::now),
            )
            .await?)
    }
}

fn input(
    inputs: &HashMap<FieldId, NormalizedField>,
    field: FieldId,
) -> Result<&NormalizedField, ProductError> {
    inputs.get(&field).ok_or(ProductError::MissingInput(field))
}

struct AlignedSummary {
    valid_time: DateTime<Utc>,
    attempts_consumed: usize,
    degradations: Vec<DegradationRecord>,
}

impl AlignedSummary {
    fn finish(self, product: Product, requested: DateTime<Utc>) -> ProductOutcome {
        ProductOutcome {
            product,
            requested,
            valid_time: self.valid_time,
            paired_time: None,
            attempts_consumed: self.attempts_consumed,
            degradations: self.degradations,
        }
    }
}
