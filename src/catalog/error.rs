use crate::types::field::FieldId;
use crate::types::source::SourceFamily;
use polars::error::PolarsError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a failed fetch. The cascade treats every reason
/// the same way (advance to the next candidate); the code exists for logs and
/// for callers inspecting the last error of an exhausted cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchReason {
    EndpointUnreachable,
    DatasetNotFound,
    FieldNotFound,
    MalformedPayload,
}

impl fmt::Display for FetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            FetchReason::EndpointUnreachable => "endpoint-unreachable",
            FetchReason::DatasetNotFound => "dataset-not-found",
            FetchReason::FieldNotFound => "field-not-found",
            FetchReason::MalformedPayload => "malformed-payload",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request for {url} did not complete within {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Endpoint {url} is unreachable: {message}")]
    Unreachable { url: String, message: String },

    #[error("No dataset published at {url}")]
    DatasetNotFound { url: String },

    #[error("Variable '{variable}' not found in dataset {url}")]
    FieldNotFound { url: String, variable: String },

    #[error("No {family} variable is mapped for field {field}")]
    UnmappedField { field: FieldId, family: SourceFamily },

    #[error("Data download or decompression failed for {url}")]
    DownloadIo {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse grid document from {url}")]
    JsonParse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error staging observation CSV from {url}")]
    CsvStaging {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed parsing observation CSV from {url}")]
    CsvRead {
        url: String,
        #[source]
        source: PolarsError,
    },

    #[error("Malformed payload from {url}: {message}")]
    Malformed { url: String, message: String },

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl FetchError {
    pub fn reason(&self) -> FetchReason {
        match self {
            FetchError::NetworkRequest(..)
            | FetchError::HttpStatus { .. }
            | FetchError::Timeout { .. }
            | FetchError::Unreachable { .. }
            | FetchError::DownloadIo { .. } => FetchReason::EndpointUnreachable,
            FetchError::DatasetNotFound { .. } => FetchReason::DatasetNotFound,
            FetchError::FieldNotFound { .. } | FetchError::UnmappedField { .. } => {
                FetchReason::FieldNotFound
            }
            FetchError::JsonParse { .. }
            | FetchError::CsvStaging { .. }
            | FetchError::CsvRead { .. }
            | FetchError::Malformed { .. }
            | FetchError::TaskJoin(_) => FetchReason::MalformedPayload,
        }
    }

    pub(crate) fn malformed(url: &str, message: impl Into<String>) -> Self {
        FetchError::Malformed {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let not_found = FetchError::DatasetNotFound {
            url: "https://a/b".into(),
        };
        assert_eq!(not_found.reason(), FetchReason::DatasetNotFound);
        assert_eq!(not_found.reason().to_string(), "dataset-not-found");

        let unmapped = FetchError::UnmappedField {
            field: FieldId::Visibility,
            family: SourceFamily::PointObservation,
        };
        assert_eq!(unmapped.reason(), FetchReason::FieldNotFound);

        let timeout = FetchError::Timeout {
            url: "https://a/b".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(timeout.reason(), FetchReason::EndpointUnreachable);
        assert_eq!(
            FetchError::malformed("u", "bad shape").reason(),
            FetchReason::MalformedPayload
        );
    }
}
