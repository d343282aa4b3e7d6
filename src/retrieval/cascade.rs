//! The retrieval cascade: candidate timestamps × endpoints driven through a
//! [`DatasetFetcher`] until one combination succeeds.
//!
//! Every candidate is tried on an endpoint before the next endpoint is used,
//! so a backup mirror is only contacted once the primary is exhausted.

use crate::catalog::endpoints::{Endpoint, EndpointRole, EndpointSet, LivenessCache};
use crate::catalog::error::FetchError;
use crate::catalog::fetcher::{DatasetFetcher, FetchTarget};
use crate::retrieval::error::RetrievalError;
use crate::timing::candidates::{CandidateTimeSequence, TWENTY_FOUR_HOURS};
use crate::types::field::{FieldId, NormalizedField};
use crate::types::source::{DomainId, SourceFamily};
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};

pub const DEFAULT_MAX_LOOKBACK: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

fn default_max_lookback() -> usize {
    DEFAULT_MAX_LOOKBACK
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}
fn default_speculative_concurrency() -> usize {
    1
}

/// How far back and how aggressively a cascade searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadePolicy {
    /// Number of candidates before the requested instant (K).
    #[serde(default = "default_max_lookback")]
    pub max_lookback: usize,
    /// Per-attempt timeout. A 24-hour pair shares one timeout for both legs.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Candidate fetches kept in flight per endpoint. 1 means strictly sequential.
    #[serde(default = "default_speculative_concurrency")]
    pub speculative_concurrency: usize,
    /// Candidates older than this are never attempted.
    #[serde(default)]
    pub max_staleness_hours: Option<u32>,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        Self {
            max_lookback: DEFAULT_MAX_LOOKBACK,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            speculative_concurrency: 1,
            max_staleness_hours: None,
        }
    }
}

impl CascadePolicy {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.probe_timeout_secs)
    }

    fn concurrency(&self) -> usize {
        self.speculative_concurrency.max(1)
    }

    /// The candidates this policy allows for `requested` at `cadence_hours`.
    pub fn candidates(&self, requested: DateTime<Utc>, cadence_hours: u32) -> CandidateTimeSequence {
        CandidateTimeSequence::generate(requested, cadence_hours, self.max_lookback).limit_staleness(
            self.max_staleness_hours
                .map(|hours| Duration::hours(i64::from(hours))),
        )
    }
}

/// Emitted whenever a cascade succeeds on a candidate other than the
/// requested instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationRecord {
    pub field: FieldId,
    pub family: SourceFamily,
    pub domain: DomainId,
    pub requested: DateTime<Utc>,
    pub achieved: DateTime<Utc>,
    pub lag_minutes: i64,
    /// Index of the achieved timestamp in the candidate sequence.
    pub candidate_index: usize,
    pub endpoint: String,
    pub role: EndpointRole,
}

impl fmt::Display for DegradationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field={} family={} domain={} requested={} achieved={} lag_minutes={} candidate={} endpoint={} role={}",
            self.field,
            self.family,
            self.domain,
            self.requested.to_rfc3339(),
            self.achieved.to_rfc3339(),
            self.lag_minutes,
            self.candidate_index,
            self.endpoint,
            self.role
        )
    }
}

/// A successful single-field retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    pub field: NormalizedField,
    pub requested: DateTime<Utc>,
    /// The candidate the data is actually valid at. Label output with this,
    /// never with `requested`.
    pub actual_timestamp: DateTime<Utc>,
    pub attempts_consumed: usize,
    pub endpoint: Endpoint,
    pub degradation: Option<DegradationRecord>,
}

impl RetrievalOutcome {
    pub fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }
}

/// A completed 24-hour pair, both legs from the same endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedOutcome {
    pub current: NormalizedField,
    pub previous: NormalizedField,
    pub requested: DateTime<Utc>,
    pub actual_timestamp: DateTime<Utc>,
    pub paired_timestamp: DateTime<Utc>,
    /// One attempt per candidate pair.
    pub attempts_consumed: usize,
    pub endpoint: Endpoint,
    pub degradation: Option<DegradationRecord>,
}

enum PairAttempt {
    Complete(NormalizedField, NormalizedField),
    CurrentFailed(FetchError),
    PairedFailed(FetchError),
}

/// Drives one request through an endpoint set. Construct one per request;
/// the liveness cache lives only for the duration of a single call.
pub struct RetrievalCascade<'a, F: DatasetFetcher + ?Sized> {
    fetcher: &'a F,
    endpoints: &'a EndpointSet,
    policy: &'a CascadePolicy,
}

impl<'a, F: DatasetFetcher + ?Sized> RetrievalCascade<'a, F> {
    pub fn new(fetcher: &'a F, endpoints: &'a EndpointSet, policy: &'a CascadePolicy) -> Self {
        Self {
            fetcher,
            endpoints,
            policy,
        }
    }

    pub fn candidates(&self, requested: DateTime<Utc>) -> CandidateTimeSequence {
        self.policy
            .candidates(requested, self.endpoints.cadence_hours())
    }

    /// Retrieves `field` at the freshest candidate any endpoint can serve.
    pub async fn retrieve(
        &self,
        field: FieldId,
        requested: DateTime<Utc>,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let candidates = self.candidates(requested);
        self.retrieve_from(field, &candidates).await
    }

    /// Like [`Self::retrieve`] but with an explicit candidate sequence.
    pub async fn retrieve_from(
        &self,
        field: FieldId,
        candidates: &CandidateTimeSequence,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let requested = self.requested_of(candidates)?;
        let mut liveness = LivenessCache::new();
        let mut attempts = 0usize;
        let mut last_error: Option<FetchError> = None;

        for endpoint in self.endpoints.endpoints() {
            if !self.is_alive(endpoint, &mut liveness).await {
                continue;
            }

            let mut results = pin!(stream::iter(candidates.iter().enumerate())
                .map(|(index, timestamp)| {
                    let target = self.target(endpoint, field, timestamp);
                    async move { (index, timestamp, self.timed_fetch(&target).await) }
                })
                .buffered(self.policy.concurrency()));

            while let Some((index, timestamp, result)) = results.next().await {
                attempts += 1;
                match result {
                    Ok(data) => {
                        let degradation =
                            self.degradation(field, requested, timestamp, index, endpoint);
                        info!(
                            "Retrieved {} for {} at {} from {} after {} attempts",
                            field,
                            self.endpoints.domain(),
                            timestamp,
                            endpoint,
                            attempts
                        );
                        return Ok(RetrievalOutcome {
                            field: data,
                            requested,
                            actual_timestamp: timestamp,
                            attempts_consumed: attempts,
                            endpoint: endpoint.clone(),
                            degradation,
                        });
                    }
                    Err(e) => {
                        debug!(
                            "Attempt {} for {} at {} on {} failed ({}): {}",
                            attempts,
                            field,
                            timestamp,
                            endpoint,
                            e.reason(),
                            e
                        );
                        last_error = Some(e);
                    }
                }
            }
            warn!(
                "Exhausted {} candidates for {} on {}",
                candidates.len(),
                field,
                endpoint
            );
        }

        Err(RetrievalError::AllCandidatesExhausted {
            field,
            domain: self.endpoints.domain().clone(),
            requested,
            attempts,
            last_error: last_error.map(Box::new),
        })
    }

    /// Retrieves `field` at exactly `at`, one of the candidates of
    /// `requested`. Used to bring a fresher input down to the valid time of
    /// the stalest input of a product.
    pub async fn retrieve_at(
        &self,
        field: FieldId,
        requested: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let candidates = self.candidates(requested);
        let index = candidates
            .iter()
            .position(|candidate| candidate == at)
            .unwrap_or(candidates.len());
        let only = CandidateTimeSequence::generate(at, self.endpoints.cadence_hours(), 0);
        let mut outcome = self
            .retrieve_from(field, &only)
            .await
            .map_err(|e| e.for_request(requested))?;
        outcome.requested = requested;
        outcome.degradation =
            self.degradation(field, requested, at, index, &outcome.endpoint);
        Ok(outcome)
    }

    /// Retrieves `field` at a candidate and at the same candidate 24 hours
    /// earlier, both from one endpoint. A candidate whose earlier leg fails is
    /// rejected as a whole.
    pub async fn retrieve_pair(
        &self,
        field: FieldId,
        requested: DateTime<Utc>,
    ) -> Result<PairedOutcome, RetrievalError> {
        let candidates = self.candidates(requested);
        let requested = self.requested_of(&candidates)?;
        let paired = candidates.paired(TWENTY_FOUR_HOURS);
        let mut liveness = LivenessCache::new();
        let mut attempts = 0usize;
        let mut any_current_succeeded = false;
        let mut last_error: Option<FetchError> = None;

        for endpoint in self.endpoints.endpoints() {
            if !self.is_alive(endpoint, &mut liveness).await {
                continue;
            }

            let mut results = pin!(stream::iter(candidates.iter().zip(paired.iter().copied()).enumerate())
                .map(|(index, (timestamp, previous))| {
                    let current_target = self.target(endpoint, field, timestamp);
                    let previous_target = self.target(endpoint, field, previous);
                    async move {
                        let attempt = self.fetch_pair(&current_target, &previous_target).await;
                        (index, timestamp, previous, attempt)
                    }
                })
                .buffered(self.policy.concurrency()));

            while let Some((index, timestamp, previous, attempt)) = results.next().await {
                attempts += 1;
                match attempt {
                    PairAttempt::Complete(current, earlier) => {
                        let degradation =
                            self.degradation(field, requested, timestamp, index, endpoint);
                        info!(
                            "Retrieved 24-hour pair for {} on {} at {} / {} from {}",
                            field,
                            self.endpoints.domain(),
                            timestamp,
                            previous,
                            endpoint
                        );
                        return Ok(PairedOutcome {
                            current,
                            previous: earlier,
                            requested,
                            actual_timestamp: timestamp,
                            paired_timestamp: previous,
                            attempts_consumed: attempts,
                            endpoint: endpoint.clone(),
                            degradation,
                        });
                    }
                    PairAttempt::CurrentFailed(e) => {
                        debug!(
                            "Pair attempt {} for {} at {} on {} failed ({}): {}",
                            attempts,
                            field,
                            timestamp,
                            endpoint,
                            e.reason(),
                            e
                        );
                        last_error = Some(e);
                    }
                    PairAttempt::PairedFailed(e) => {
                        warn!(
                            "Rejecting pair for {} at {}: paired lookup at {} on {} failed ({})",
                            field,
                            timestamp,
                            previous,
                            endpoint,
                            e.reason()
                        );
                        any_current_succeeded = true;
                        last_error = Some(e);
                    }
                }
            }
        }

        let domain = self.endpoints.domain().clone();
        let last_error = last_error.map(Box::new);
        if any_current_succeeded {
            Err(RetrievalError::PairMismatch {
                field,
                domain,
                requested,
                attempts,
                last_error,
            })
        } else {
            Err(RetrievalError::AllCandidatesExhausted {
                field,
                domain,
                requested,
                attempts,
                last_error,
            })
        }
    }

    fn requested_of(&self, candidates: &CandidateTimeSequence) -> Result<DateTime<Utc>, RetrievalError> {
        if self.endpoints.is_empty() {
            return Err(RetrievalError::NoEndpoints {
                family: self.endpoints.family(),
                domain: self.endpoints.domain().clone(),
            });
        }
        candidates.first().ok_or_else(|| RetrievalError::NoEndpoints {
            family: self.endpoints.family(),
            domain: self.endpoints.domain().clone(),
        })
    }

    fn target<'t>(
        &'t self,
        endpoint: &'t Endpoint,
        field: FieldId,
        timestamp: DateTime<Utc>,
    ) -> FetchTarget<'t> {
        FetchTarget {
            endpoint,
            family: self.endpoints.family(),
            domain: self.endpoints.domain(),
            timestamp,
            field,
        }
    }

    async fn is_alive(&self, endpoint: &Endpoint, liveness: &mut LivenessCache) -> bool {
        liveness
            .check(endpoint, self.policy.probe_timeout(), || self.fetcher.probe(endpoint))
            .await
    }

    async fn timed_fetch(&self, target: &FetchTarget<'_>) -> Result<NormalizedField, FetchError> {
        let timeout = self.policy.request_timeout();
        match tokio::time::timeout(timeout, self.fetcher.fetch(target)).await {
            Ok(result) => result.and_then(|data| check_valid_time(target, data)),
            Err(_) => Err(FetchError::Timeout {
                url: target.locator(),
                timeout,
            }),
        }
    }

    /// Both legs share one timeout; when it fires, the pending leg is dropped.
    /// A timeout after the current leg landed rejects the pair like any other
    /// paired-leg failure.
    async fn fetch_pair(&self, current: &FetchTarget<'_>, previous: &FetchTarget<'_>) -> PairAttempt {
        let timeout = self.policy.request_timeout();
        let current_landed = AtomicBool::new(false);
        let legs = async {
            let now = match self.fetcher.fetch(current).await {
                Ok(data) => match check_valid_time(current, data) {
                    Ok(data) => data,
                    Err(e) => return PairAttempt::CurrentFailed(e),
                },
                Err(e) => return PairAttempt::CurrentFailed(e),
            };
            current_landed.store(true, Ordering::Release);
            match self.fetcher.fetch(previous).await {
                Ok(data) => match check_valid_time(previous, data) {
                    Ok(earlier) => PairAttempt::Complete(now, earlier),
                    Err(e) => PairAttempt::PairedFailed(e),
                },
                Err(e) => PairAttempt::PairedFailed(e),
            }
        };
        match tokio::time::timeout(timeout, legs).await {
            Ok(attempt) => attempt,
            Err(_) if current_landed.load(Ordering::Acquire) => {
                PairAttempt::PairedFailed(FetchError::Timeout {
                    url: previous.locator(),
                    timeout,
                })
            }
            Err(_) => PairAttempt::CurrentFailed(FetchError::Timeout {
                url: current.locator(),
                timeout,
            }),
        }
    }

    fn degradation(
        &self,
        field: FieldId,
        requested: DateTime<Utc>,
        achieved: DateTime<Utc>,
        candidate_index: usize,
        endpoint: &Endpoint,
    ) -> Option<DegradationRecord> {
        if candidate_index == 0 {
            return None;
        }
        let record = DegradationRecord {
            field,
            family: self.endpoints.family(),
            domain: self.endpoints.domain().clone(),
            requested,
            achieved,
            lag_minutes: requested.signed_duration_since(achieved).num_minutes(),
            candidate_index,
            endpoint: endpoint.probe_url(),
            role: endpoint.role,
        };
        warn!("Degraded retrieval: {}", record);
        Some(record)
    }
}

fn check_valid_time(target: &FetchTarget<'_>, data: NormalizedField) -> Result<NormalizedField, FetchError> {
    if data.valid_time != target.timestamp {
        return Err(FetchError::malformed(
            &target.locator(),
            format!(
                "field is valid at {}, expected {}",
                data.valid_time, target.timestamp
            ),
        ));
    }
    Ok(data)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A scripted in-memory catalog that records every call.

    use super::*;
    use crate::types::field::test_support::grid;
    use crate::types::field::canonical_unit;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Probe(String),
        Fetch(String, FieldId, DateTime<Utc>),
    }

    #[derive(Default)]
    pub struct ScriptedCatalog {
        /// Endpoint template → (field, timestamp) pairs it can serve.
        pub available: HashMap<String, HashSet<(FieldId, DateTime<Utc>)>>,
        /// Probe roots that do not answer.
        pub dead: HashSet<String>,
        /// Explicit values per (field, timestamp); defaults to a constant grid.
        pub values: HashMap<(FieldId, DateTime<Utc>), Vec<f64>>,
        /// Fetches that never answer.
        pub hung: HashSet<(FieldId, DateTime<Utc>)>,
        /// Probe roots whose probe never answers.
        pub hung_probes: HashSet<String>,
        /// Fetches started and not yet finished or dropped.
        pub in_flight: AtomicUsize,
        pub calls: Mutex<Vec<Call>>,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl<'a> InFlight<'a> {
        fn enter(counter: &'a AtomicUsize) -> Self {
            counter.fetch_add(1, Ordering::SeqCst);
            Self(counter)
        }
    }

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ScriptedCatalog {
        pub fn serve(mut self, template: &str, field: FieldId, at: DateTime<Utc>) -> Self {
            self.available
                .entry(template.to_string())
                .or_default()
                .insert((field, at));
            self
        }

        pub fn with_values(mut self, field: FieldId, at: DateTime<Utc>, values: Vec<f64>) -> Self {
            self.values.insert((field, at), values);
            self
        }

        pub fn kill(mut self, probe_url: &str) -> Self {
            self.dead.insert(probe_url.to_string());
            self
        }

        pub fn hang(mut self, field: FieldId, at: DateTime<Utc>) -> Self {
            self.hung.insert((field, at));
            self
        }

        pub fn hang_probe(mut self, probe_url: &str) -> Self {
            self.hung_probes.insert(probe_url.to_string());
            self
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn fetches_on(&self, template: &str) -> Vec<DateTime<Utc>> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Fetch(t, _, at) if t == template => Some(at),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl DatasetFetcher for ScriptedCatalog {
        async fn probe(&self, endpoint: &Endpoint) -> bool {
            let root = endpoint.probe_url();
            self.calls.lock().unwrap().push(Call::Probe(root.clone()));
            if self.hung_probes.contains(&root) {
                std::future::pending::<()>().await;
            }
            !self.dead.contains(&root)
        }

        async fn fetch(&self, target: &FetchTarget<'_>) -> Result<NormalizedField, FetchError> {
            let template = target.endpoint.url_template.clone();
            self.calls
                .lock()
                .unwrap()
                .push(Call::Fetch(template.clone(), target.field, target.timestamp));
            let _guard = InFlight::enter(&self.in_flight);
            if self.hung.contains(&(target.field, target.timestamp)) {
                std::future::pending::<()>().await;
            }
            let served = self
                .available
                .get(&template)
                .is_some_and(|set| set.contains(&(target.field, target.timestamp)));
            if !served {
                return Err(FetchError::DatasetNotFound {
                    url: target.locator(),
                });
            }
            let values = self
                .values
                .get(&(target.field, target.timestamp))
                .cloned()
                .unwrap_or_else(|| vec![1.0; 4]);
            let side = (values.len() as f64).sqrt() as usize;
            let mut field = grid(target.field, canonical_unit(target.field), side, side, values);
            field.valid_time = target.timestamp;
            field.provenance.locator = target.locator();
            Ok(field)
        }
    }
}
