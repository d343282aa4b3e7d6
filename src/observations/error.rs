use crate::catalog::error::FetchError;
use crate::types::source::DomainId;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures of the observation side of a synchronized pair. Kept apart from
/// grid failures so a caller can still use the grid on its own.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No observation snapshot at or before {target} is available for '{domain}'")]
    ObservationUnavailable {
        domain: DomainId,
        target: DateTime<Utc>,
        #[source]
        last_error: Option<Box<FetchError>>,
    },
}
