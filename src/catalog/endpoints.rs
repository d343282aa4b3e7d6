//! Ordered mirror/catalog endpoints per source family and domain, plus the
//! per-invocation liveness cache.

use crate::types::source::{DomainId, SourceFamily};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use log::warn;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRole {
    Primary,
    Backup,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Primary => f.write_str("primary"),
            EndpointRole::Backup => f.write_str("backup"),
        }
    }
}

/// A catalog endpoint described by a locator template.
///
/// Supported placeholders: `{family}`, `{domain}`, `{year}`, `{month}`,
/// `{day}`, `{hour}`, `{minute}`, `{date}` (YYYYMMDD) and `{stamp}`
/// (YYYYMMDDHHMM).
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use firewx::{DomainId, Endpoint, EndpointRole, SourceFamily};
///
/// let endpoint = Endpoint::new(
///     "https://mirror.test/{family}/{domain}/{date}/t{hour}z.json.gz",
///     EndpointRole::Primary,
/// );
/// let at = Utc.with_ymd_and_hms(2024, 7, 4, 9, 0, 0).unwrap();
/// assert_eq!(
///     endpoint.locator(SourceFamily::GriddedAnalysis, &DomainId::new("conus"), at),
///     "https://mirror.test/analysis/conus/20240704/t09z.json.gz"
/// );
/// assert_eq!(endpoint.probe_url(), "https://mirror.test/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub url_template: String,
    pub role: EndpointRole,
    /// Catalog root used for the liveness probe. Defaults to the template
    /// prefix before the first path segment containing a placeholder.
    #[serde(default)]
    pub probe: Option<String>,
}

impl Endpoint {
    pub fn new(url_template: impl Into<String>, role: EndpointRole) -> Self {
        Self {
            url_template: url_template.into(),
            role,
            probe: None,
        }
    }

    pub fn with_probe(mut self, probe: impl Into<String>) -> Self {
        self.probe = Some(probe.into());
        self
    }

    pub fn locator(
        &self,
        family: SourceFamily,
        domain: &DomainId,
        timestamp: DateTime<Utc>,
    ) -> String {
        self.url_template
            .replace("{family}", family.path_segment())
            .replace("{domain}", domain.as_str())
            .replace("{stamp}", &timestamp.format("%Y%m%d%H%M").to_string())
            .replace("{date}", &timestamp.format("%Y%m%d").to_string())
            .replace("{year}", &format!("{:04}", timestamp.year()))
            .replace("{month}", &format!("{:02}", timestamp.month()))
            .replace("{day}", &format!("{:02}", timestamp.day()))
            .replace("{hour}", &format!("{:02}", timestamp.hour()))
            .replace("{minute}", &format!("{:02}", timestamp.minute()))
    }

    pub fn probe_url(&self) -> String {
        if let Some(probe) = &self.probe {
            return probe.clone();
        }
        match self.url_template.find('{') {
            Some(idx) => {
                let prefix = &self.url_template[..idx];
                match prefix.rfind('/') {
                    Some(slash) => prefix[..=slash].to_string(),
                    None => prefix.to_string(),
                }
            }
            None => self.url_template.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.probe_url(), self.role)
    }
}

/// The endpoints serving one source family for one domain, primary first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    family: SourceFamily,
    domain: DomainId,
    cadence_hours: u32,
    endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    /// Orders the endpoints so every primary precedes every backup. The
    /// relative order within a role is preserved.
    pub fn new(
        family: SourceFamily,
        domain: DomainId,
        cadence_hours: u32,
        mut endpoints: Vec<Endpoint>,
    ) -> Self {
        endpoints.sort_by_key(|endpoint| endpoint.role);
        Self {
            family,
            domain,
            cadence_hours,
            endpoints,
        }
    }

    pub fn family(&self) -> SourceFamily {
        self.family
    }

    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    pub fn cadence_hours(&self) -> u32 {
        self.cadence_hours
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Remembers the outcome of each endpoint's liveness probe for the lifetime of
/// one cascade invocation. Each invocation owns a fresh cache.
#[derive(Debug, Default)]
pub struct LivenessCache {
    results: HashMap<String, bool>,
}

impl LivenessCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<bool> {
        self.results.get(&endpoint.probe_url()).copied()
    }

    /// Records the first probe outcome; later writes for the same endpoint are ignored.
    pub fn record(&mut self, endpoint: &Endpoint, alive: bool) -> bool {
        *self.results.entry(endpoint.probe_url()).or_insert(alive)
    }

    pub fn probed(&self) -> usize {
        self.results.len()
    }

    /// Returns the cached liveness of `endpoint`, running `probe` under
    /// `timeout` the first time it is asked about. A probe that does not
    /// answer in time marks the endpoint dead.
    pub async fn check<F, Fut>(&mut self, endpoint: &Endpoint, timeout: Duration, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        if let Some(alive) = self.get(endpoint) {
            return alive;
        }
        let alive = match tokio::time::timeout(timeout, probe()).await {
            Ok(alive) => alive,
            Err(_) => {
                warn!("Liveness probe of {} timed out after {:?}", endpoint, timeout);
                false
            }
        };
        if !alive {
            warn!("Endpoint {} failed its liveness probe, skipping it", endpoint);
        }
        self.record(endpoint, alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_primary_sorted_before_backup() {
        let set = EndpointSet::new(
            SourceFamily::GriddedAnalysis,
            DomainId::new("conus"),
            1,
            vec![
                Endpoint::new("https://b1/{date}", EndpointRole::Backup),
                Endpoint::new("https://p1/{date}", EndpointRole::Primary),
                Endpoint::new("https://b2/{date}", EndpointRole::Backup),
                Endpoint::new("https://p2/{date}", EndpointRole::Primary),
            ],
        );
        let urls: Vec<&str> = set
            .endpoints()
            .iter()
            .map(|e| e.url_template.as_str())
            .collect();
        assert_eq!(
            urls,
            ["https://p1/{date}", "https://p2/{date}", "https://b1/{date}", "https://b2/{date}"]
        );
    }

    #[test]
    fn test_locator_all_placeholders() {
        let endpoint = Endpoint::new(
            "https://x/{family}/{domain}/{year}/{month}/{day}/{hour}{minute}/{stamp}",
            EndpointRole::Primary,
        );
        let at = Utc.with_ymd_and_hms(2023, 2, 3, 4, 5, 0).unwrap();
        assert_eq!(
            endpoint.locator(SourceFamily::PointObservation, &DomainId::new("ak"), at),
            "https://x/observations/ak/2023/02/03/0405/202302030405"
        );
    }

    #[test]
    fn test_probe_url_rules() {
        let explicit =
            Endpoint::new("https://x/data/{date}", EndpointRole::Backup).with_probe("https://x/ping");
        assert_eq!(explicit.probe_url(), "https://x/ping");
        let plain = Endpoint::new("https://x/static.json", EndpointRole::Primary);
        assert_eq!(plain.probe_url(), "https://x/static.json");
        let partial = Endpoint::new("https://x/grids/rtma_{date}.json", EndpointRole::Primary);
        assert_eq!(partial.probe_url(), "https://x/grids/");
    }

    #[test]
    fn test_liveness_cache_written_once() {
        let endpoint = Endpoint::new("https://x/{date}", EndpointRole::Primary);
        let mut cache = LivenessCache::new();
        assert_eq!(cache.get(&endpoint), None);
        assert!(!cache.record(&endpoint, false));
        assert!(!cache.record(&endpoint, true));
        assert_eq!(cache.get(&endpoint), Some(false));
        assert_eq!(cache.probed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_probes_once_and_times_out() {
        let hung = Endpoint::new("https://hung/{date}", EndpointRole::Primary);
        let live = Endpoint::new("https://live/{date}", EndpointRole::Backup);
        let mut cache = LivenessCache::new();
        let timeout = Duration::from_secs(5);

        let alive = cache
            .check(&hung, timeout, || std::future::pending::<bool>())
            .await;
        assert!(!alive);
        assert_eq!(cache.get(&hung), Some(false));

        let mut probes = 0;
        for _ in 0..3 {
            let alive = cache
                .check(&live, timeout, || {
                    probes += 1;
                    async { true }
                })
                .await;
            assert!(alive);
        }
        assert_eq!(probes, 1);
        assert_eq!(cache.probed(), 2);
    }
}
