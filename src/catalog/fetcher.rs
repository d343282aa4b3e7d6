use crate::catalog::endpoints::Endpoint;
use crate::catalog::error::FetchError;
use crate::types::field::{FieldId, NormalizedField};
use crate::types::observation::StationRecord;
use crate::types::source::{DomainId, SourceFamily};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One concrete fetch: a field from one source family at one timestamp on one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct FetchTarget<'a> {
    pub endpoint: &'a Endpoint,
    pub family: SourceFamily,
    pub domain: &'a DomainId,
    pub timestamp: DateTime<Utc>,
    pub field: FieldId,
}

impl FetchTarget<'_> {
    pub fn locator(&self) -> String {
        self.endpoint
            .locator(self.family, self.domain, self.timestamp)
    }
}

/// Uniform access to every gridded or point catalog.
///
/// A fetch either returns a field valid at exactly `target.timestamp`, or
/// fails with a classified [`FetchError`]. Implementations never retry.
#[async_trait]
pub trait DatasetFetcher: Send + Sync {
    /// Cheap reachability check of the endpoint's catalog root.
    async fn probe(&self, endpoint: &Endpoint) -> bool;

    async fn fetch(&self, target: &FetchTarget<'_>) -> Result<NormalizedField, FetchError>;
}

/// The point-observation catalog.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> bool;

    /// Reports published for `target`, unit-normalized. Stations may appear
    /// more than once; selecting the report nearest the target is left to the caller.
    async fn reports(
        &self,
        endpoint: &Endpoint,
        domain: &DomainId,
        target: DateTime<Utc>,
    ) -> Result<Vec<StationRecord>, FetchError>;
}
