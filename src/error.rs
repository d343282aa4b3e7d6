use crate::catalog::error::FetchError;
use crate::observations::error::SyncError;
use crate::products::error::ProductError;
use crate::retrieval::cache::CacheError;
use crate::retrieval::error::RetrievalError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FireWxError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Product(#[from] ProductError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Failed to read configuration file '{0}'")]
    ConfigRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse configuration{}", .0.as_ref().map(|p| format!(" file '{}'", p.display())).unwrap_or_default())]
    ConfigParse(Option<PathBuf>, #[source] toml::de::Error),

    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to determine cache directory")]
    CacheDirResolution(#[source] std::io::Error),
}
