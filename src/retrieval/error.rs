use crate::catalog::error::FetchError;
use crate::types::field::FieldId;
use crate::types::source::{DomainId, SourceFamily};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Terminal failures of a retrieval cascade. Per-attempt fetch failures are
/// recovered inside the cascade and only the last one is kept here.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("No {family} endpoints are configured for domain '{domain}'")]
    NoEndpoints {
        family: SourceFamily,
        domain: DomainId,
    },

    #[error("All candidates for {field} on '{domain}' requested at {requested} were exhausted after {attempts} attempts")]
    AllCandidatesExhausted {
        field: FieldId,
        domain: DomainId,
        requested: DateTime<Utc>,
        attempts: usize,
        #[source]
        last_error: Option<Box<FetchError>>,
    },

    #[error("No 24-hour pair for {field} on '{domain}' requested at {requested} completed on a single endpoint after {attempts} attempts")]
    PairMismatch {
        field: FieldId,
        domain: DomainId,
        requested: DateTime<Utc>,
        attempts: usize,
        #[source]
        last_error: Option<Box<FetchError>>,
    },
}

impl RetrievalError {
    /// Number of fetch attempts made before giving up.
    pub fn attempts(&self) -> usize {
        match self {
            RetrievalError::NoEndpoints { .. } => 0,
            RetrievalError::AllCandidatesExhausted { attempts, .. }
            | RetrievalError::PairMismatch { attempts, .. } => *attempts,
        }
    }

    /// Reports the failure against `requested` instead of the first candidate
    /// that was searched.
    pub(crate) fn for_request(mut self, requested: DateTime<Utc>) -> Self {
        match &mut self {
            RetrievalError::NoEndpoints { .. } => {}
            RetrievalError::AllCandidatesExhausted { requested: at, .. }
            | RetrievalError::PairMismatch { requested: at, .. } => *at = requested,
        }
        self
    }

    pub fn last_error(&self) -> Option<&FetchError> {
        match self {
            RetrievalError::NoEndpoints { .. } => None,
            RetrievalError::AllCandidatesExhausted { last_error, .. }
            | RetrievalError::PairMismatch { last_error, .. } => last_error.as_deref(),
        }
    }
}
