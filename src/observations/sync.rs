//! Aligns a point-observation snapshot with a gridded field so the overlay is
//! never newer than the grid it annotates.

use crate::catalog::endpoints::{EndpointSet, LivenessCache};
use crate::catalog::error::FetchError;
use crate::catalog::fetcher::ObservationSource;
use crate::observations::error::SyncError;
use crate::observations::thinning::{density_mask, DensityPriority};
use crate::retrieval::cascade::CascadePolicy;
use crate::timing::observation_time::{ObservationTimeResolver, DEFAULT_GRACE_MINUTES};
use crate::types::field::NormalizedField;
use crate::types::observation::{latest_per_station, ObservationSnapshot};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW_MINUTES: u32 = 60;
pub const DEFAULT_DENSITY_KM: f64 = 50.0;

fn default_grace_minutes() -> u32 {
    DEFAULT_GRACE_MINUTES
}
fn default_window_minutes() -> u32 {
    DEFAULT_WINDOW_MINUTES
}
fn default_density_km() -> f64 {
    DEFAULT_DENSITY_KM
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationPolicy {
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: u32,
    /// How far before the target a station's report may be and still count.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_density_km")]
    pub density_km: f64,
    #[serde(default)]
    pub priority: DensityPriority,
}

impl Default for ObservationPolicy {
    fn default() -> Self {
        Self {
            grace_minutes: DEFAULT_GRACE_MINUTES,
            window_minutes: DEFAULT_WINDOW_MINUTES,
            density_km: DEFAULT_DENSITY_KM,
            priority: DensityPriority::default(),
        }
    }
}

impl ObservationPolicy {
    pub fn resolver(&self) -> ObservationTimeResolver {
        ObservationTimeResolver::new(self.grace_minutes)
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(i64::from(self.window_minutes))
    }
}

/// A grid and the observation snapshot aligned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedPair {
    pub grid: NormalizedField,
    pub snapshot: ObservationSnapshot,
    /// Never later than `grid.valid_time`.
    pub resolved_observation_time: DateTime<Utc>,
}

pub struct CrossFeedSynchronizer<'a, S: ObservationSource + ?Sized> {
    source: &'a S,
    endpoints: &'a EndpointSet,
    policy: &'a ObservationPolicy,
    timeouts: &'a CascadePolicy,
}

impl<'a, S: ObservationSource + ?Sized> CrossFeedSynchronizer<'a, S> {
    pub fn new(
        source: &'a S,
        endpoints: &'a EndpointSet,
        policy: &'a ObservationPolicy,
        timeouts: &'a CascadePolicy,
    ) -> Self {
        Self {
            source,
            endpoints,
            policy,
            timeouts,
        }
    }

    /// The observation time to request: the resolver's pick for `now`, clamped
    /// to the grid's valid time.
    pub fn target_time(&self, grid_valid_time: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        self.policy.resolver().resolve(now).min(grid_valid_time)
    }

    pub async fn sync(
        &self,
        grid: NormalizedField,
        density_km: f64,
    ) -> Result<SyncedPair, SyncError> {
        self.sync_at(grid, density_km, Utc::now()).await
    }

    /// [`Self::sync`] with an explicit wall-clock time.
    pub async fn sync_at(
        &self,
        grid: NormalizedField,
        density_km: f64,
        now: DateTime<Utc>,
    ) -> Result<SyncedPair, SyncError> {
        let snapshot = self.snapshot_at(grid.valid_time, density_km, now).await?;
        Ok(SyncedPair {
            resolved_observation_time: snapshot.reporting_time,
            grid,
            snapshot,
        })
    }

    /// Fetches and thins the snapshot for `grid_valid_time` without needing the grid itself.
    pub async fn snapshot_at(
        &self,
        grid_valid_time: DateTime<Utc>,
        density_km: f64,
        now: DateTime<Utc>,
    ) -> Result<ObservationSnapshot, SyncError> {
        let target = self.target_time(grid_valid_time, now);
        let domain = self.endpoints.domain();
        let mut liveness = LivenessCache::new();
        let mut last_error: Option<FetchError> = None;

        for endpoint in self.endpoints.endpoints() {
            let alive = liveness
                .check(endpoint, self.timeouts.probe_timeout(), || {
                    self.source.probe(endpoint)
                })
                .await;
            if !alive {
                continue;
            }

            let timeout = self.timeouts.request_timeout();
            let result = match tokio::time::timeout(
                timeout,
                self.source.reports(endpoint, domain, target),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    url: endpoint.locator(self.endpoints.family(), domain, target),
                    timeout,
                }),
            };

            let records = match result {
                Ok(records) => latest_per_station(records, target, self.policy.window()),
                Err(e) => {
                    debug!(
                        "Observation fetch for {} at {} on {} failed ({}): {}",
                        domain,
                        target,
                        endpoint,
                        e.reason(),
                        e
                    );
                    last_error = Some(e);
                    continue;
                }
            };
            if records.is_empty() {
                debug!(
                    "No reports within {} minutes before {} on {}",
                    self.policy.window_minutes, target, endpoint
                );
                continue;
            }

            let density_mask = density_mask(&records, density_km, self.policy.priority);
            let snapshot = ObservationSnapshot {
                records,
                reporting_time: target,
                density_mask,
            };
            info!(
                "Observation snapshot for {} at {}: {} stations, {} after thinning",
                domain,
                target,
                snapshot.records.len(),
                snapshot.visible_count()
            );
            return Ok(snapshot);
        }

        Err(SyncError::ObservationUnavailable {
            domain: domain.clone(),
            target,
            last_error: last_error.map(Box::new),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::catalog::endpoints::Endpoint;
    use crate::catalog::error::FetchError;
    use crate::catalog::fetcher::ObservationSource;
    use crate::types::observation::StationRecord;
    use crate::types::source::DomainId;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Serves a fixed report list per endpoint template and records each target asked for.
    #[derive(Default)]
    pub struct ScriptedObservations {
        pub reports: HashMap<String, Vec<StationRecord>>,
        /// Templates whose report requests never answer.
        pub hung: HashSet<String>,
        pub requested: Mutex<Vec<DateTime<Utc>>>,
    }

    impl ScriptedObservations {
        pub fn hang(mut self, template: &str) -> Self {
            self.hung.insert(template.to_string());
            self
        }

        pub fn serve(mut self, template: &str, records: Vec<StationRecord>) -> Self {
            self.reports.insert(template.to_string(), records);
            self
        }

        pub fn requested(&self) -> Vec<DateTime<Utc>> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObservationSource for ScriptedObservations {
        async fn probe(&self, _endpoint: &Endpoint) -> bool {
            true
        }

        async fn reports(
            &self,
            endpoint: &Endpoint,
            _domain: &DomainId,
            target: DateTime<Utc>,
        ) -> Result<Vec<StationRecord>, FetchError> {
            self.requested.lock().unwrap().push(target);
            if self.hung.contains(&endpoint.url_template) {
                std::future::pending::<()>().await;
            }
            self.reports
                .get(&endpoint.url_template)
                .cloned()
                .ok_or_else(|| FetchError::Unreachable {
                    url: endpoint.url_template.clone(),
                    message: "scripted outage".into(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedObservations;
    use super::*;
    use crate::catalog::endpoints::{Endpoint, EndpointRole};
    use crate::types::field::test_support::grid;
    use crate::types::field::FieldId;
    use crate::types::observation::test_support::record;
    use crate::types::source::{DomainId, SourceFamily};
    use crate::types::units::Unit;
    use chrono::TimeZone;

    const OBS: &str = "https://obs.test/{stamp}.csv";
    const OBS_BACKUP: &str = "https://obs-backup.test/{stamp}.csv";

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
    }

    fn endpoints() -> EndpointSet {
        EndpointSet::new(
            SourceFamily::PointObservation,
            DomainId::new("conus"),
            1,
            vec![
                Endpoint::new(OBS, EndpointRole::Primary),
                Endpoint::new(OBS_BACKUP, EndpointRole::Backup),
            ],
        )
    }

    fn grid_at(valid: DateTime<Utc>) -> NormalizedField {
        let mut field = grid(FieldId::Temperature, Unit::Fahrenheit, 1, 1, vec![80.0]);
        field.valid_time = valid;
        field
    }

    #[tokio::test]
    async fn test_never_newer_than_grid() {
        let source = ScriptedObservations::default().serve(
            OBS,
            vec![
                record("KDEN", 39.85, -104.66, t(15, 52)),
                record("KDEN", 39.85, -104.66, t(17, 52)),
                record("KBJC", 39.91, -105.12, t(16, 5)),
            ],
        );
        let set = endpoints();
        let policy = ObservationPolicy::default();
        let timeouts = CascadePolicy::default();
        let sync = CrossFeedSynchronizer::new(&source, &set, &policy, &timeouts);

        let pair = sync
            .sync_at(grid_at(t(16, 0)), 0.0, t(18, 45))
            .await
            .unwrap();
        assert_eq!(pair.resolved_observation_time, t(16, 0));
        assert!(pair.resolved_observation_time <= pair.grid.valid_time);
        assert_eq!(source.requested(), vec![t(16, 0)]);
        assert_eq!(pair.snapshot.records.len(), 1);
        assert_eq!(pair.snapshot.records[0].observed_at, t(15, 52));
    }

    #[tokio::test]
    async fn test_resolver_wins_when_grid_is_newer() {
        let source = ScriptedObservations::default()
            .serve(OBS, vec![record("KDEN", 39.85, -104.66, t(18, 0))]);
        let set = endpoints();
        let policy = ObservationPolicy::default();
        let timeouts = CascadePolicy::default();
        let sync = CrossFeedSynchronizer::new(&source, &set, &policy, &timeouts);

        assert_eq!(sync.target_time(t(19, 0), t(18, 10)), t(18, 0));
        assert_eq!(sync.target_time(t(19, 0), t(18, 45)), t(18, 45));

        let pair = sync
            .sync_at(grid_at(t(19, 0)), 50.0, t(18, 10))
            .await
            .unwrap();
        assert_eq!(pair.resolved_observation_time, t(18, 0));
        assert_eq!(pair.snapshot.visible_count(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_backup_feed() {
        let source = ScriptedObservations::default()
            .serve(OBS_BACKUP, vec![record("KDEN", 39.85, -104.66, t(12, 0))]);
        let set = endpoints();
        let policy = ObservationPolicy::default();
        let timeouts = CascadePolicy::default();
        let sync = CrossFeedSynchronizer::new(&source, &set, &policy, &timeouts);

        let snapshot = sync.snapshot_at(t(12, 0), 50.0, t(12, 50)).await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(source.requested(), vec![t(12, 0), t(12, 0)]);
    }

    #[tokio::test]
    async fn test_unavailable_is_typed() {
        let source = ScriptedObservations::default()
            .serve(OBS, vec![record("KDEN", 39.85, -104.66, t(9, 0))]);
        let set = endpoints();
        let policy = ObservationPolicy::default();
        let timeouts = CascadePolicy::default();
        let sync = CrossFeedSynchronizer::new(&source, &set, &policy, &timeouts);

        let err = sync
            .sync_at(grid_at(t(12, 0)), 50.0, t(12, 50))
            .await
            .unwrap_err();
        let SyncError::ObservationUnavailable {
            target, last_error, ..
        } = err;
        assert_eq!(target, t(12, 0));
        assert!(matches!(
            last_error.as_deref(),
            Some(FetchError::Unreachable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_feed_times_out_to_backup() {
        let source = ScriptedObservations::default()
            .serve(OBS, vec![record("KDEN", 39.85, -104.66, t(12, 0))])
            .serve(OBS_BACKUP, vec![record("KBJC", 39.91, -105.12, t(11, 40))])
            .hang(OBS);
        let set = endpoints();
        let policy = ObservationPolicy::default();
        let timeouts = CascadePolicy::default();
        let sync = CrossFeedSynchronizer::new(&source, &set, &policy, &timeouts);

        let snapshot = sync.snapshot_at(t(12, 0), 50.0, t(12, 50)).await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].station_id, "KBJC");
        assert_eq!(source.requested(), vec![t(12, 0), t(12, 0)]);

        let only_hung = ScriptedObservations::default().hang(OBS).hang(OBS_BACKUP);
        let sync = CrossFeedSynchronizer::new(&only_hung, &set, &policy, &timeouts);
        let SyncError::ObservationUnavailable { last_error, .. } = sync
            .snapshot_at(t(12, 0), 50.0, t(12, 50))
            .await
            .unwrap_err();
        assert!(matches!(
            last_error.as_deref(),
            Some(FetchError::Timeout { .. })
        ));
    }
}
