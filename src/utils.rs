use crate::error::FireWxError;
use log::info;
use std::io;
use std::path::{Path, PathBuf};

const CACHE_DIR_NAME: &str = "firewx_cache";

pub fn get_cache_dir() -> Result<PathBuf, FireWxError> {
    dirs::cache_dir()
        .ok_or_else(|| {
            FireWxError::CacheDirResolution(io::Error::new(
                io::ErrorKind::NotFound,
                "could not determine system cache directory",
            ))
        })
        .map(|p| p.join(CACHE_DIR_NAME))
}

pub async fn ensure_cache_dir_exists(path: &Path) -> Result<(), FireWxError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(FireWxError::CacheDirCreation(
                    path.to_path_buf(),
                    io::Error::new(io::ErrorKind::AlreadyExists, "path exists but is not a directory"),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating cache directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| FireWxError::CacheDirCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(FireWxError::CacheDirCreation(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_cache_dir_creates_nested() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        ensure_cache_dir_exists(&nested).await.unwrap();
        assert!(nested.is_dir());
        ensure_cache_dir_exists(&nested).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_cache_dir_rejects_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = ensure_cache_dir_exists(file.path()).await.unwrap_err();
        assert!(matches!(err, FireWxError::CacheDirCreation(..)));
    }
}
