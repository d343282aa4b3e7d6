//! Optional on-disk cache of successful outcomes, keyed by request.

use bincode::config::{Configuration, Fixint, LittleEndian};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to read cache file '{0}'")]
    CacheRead(PathBuf, #[source] io::Error),

    #[error("Failed to write cache file '{0}'")]
    CacheWrite(PathBuf, #[source] io::Error),

    #[error("Failed to decode cache data from '{0}'")]
    CacheDecode(PathBuf, #[source] Box<bincode::error::DecodeError>),

    #[error("Failed to encode cache data")]
    CacheEncode(#[source] Box<bincode::error::EncodeError>),
}

/// Entries are bincode files named after the request key; an entry older than
/// the TTL (by modification time) is treated as absent.
#[derive(Debug, Clone)]
pub struct OutcomeCache {
    directory: PathBuf,
    ttl: Duration,
}

impl OutcomeCache {
    /// The directory must already exist.
    pub fn new(directory: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            directory: directory.into(),
            ttl,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.directory.join(format!("{file_name}.bin"))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let path = self.path_for(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::CacheRead(path, e)),
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        match age {
            Some(age) if age < self.ttl => {}
            _ => {
                debug!("Cache entry {:?} expired", path);
                return Ok(None);
            }
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| CacheError::CacheRead(path.clone(), e))?;
        let (value, _) = bincode::serde::decode_from_slice::<T, _>(&bytes, BINCODE_CONFIG)
            .map_err(|e| CacheError::CacheDecode(path.clone(), Box::new(e)))?;
        info!("Cache hit for {} at {:?}", key, path);
        Ok(Some(value))
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let bytes = bincode::serde::encode_to_vec(value, BINCODE_CONFIG)
            .map_err(|e| CacheError::CacheEncode(Box::new(e)))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CacheError::CacheWrite(path.clone(), e))?;
        debug!("Cached {} to {:?}", key, path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::field::test_support::grid;
    use crate::types::field::{FieldId, NormalizedField};
    use crate::types::units::Unit;

    #[tokio::test]
    async fn test_round_trip_within_ttl() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let cache = OutcomeCache::new(dir.path(), Duration::from_secs(600));
        let field = grid(FieldId::Temperature, Unit::Fahrenheit, 1, 2, vec![70.0, f64::NAN]);
        let key = "analysis-conus-temperature-202401011500-threshold-mask[rh <= 25]";

        assert!(cache.get::<NormalizedField>(key).await?.is_none());
        cache.put(key, &field).await?;
        let cached: NormalizedField = cache.get(key).await?.unwrap();
        assert_eq!(cached.values[0], 70.0);
        assert!(cached.values[1].is_nan());
        assert_eq!(cached.valid_time, field.valid_time);
        assert_eq!(cached.provenance, field.provenance);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_entries_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let cache = OutcomeCache::new(dir.path(), Duration::ZERO);
        cache.put("k", &42u32).await?;
        assert_eq!(cache.get::<u32>("k").await?, None);
        Ok(())
    }

    #[test]
    fn test_keys_become_safe_file_names() {
        let cache = OutcomeCache::new("/tmp/x", Duration::from_secs(1));
        let path = cache.path_for("a/b c<=d");
        assert_eq!(path, PathBuf::from("/tmp/x/a_b_c__d.bin"));
    }
}
