use std::path::PathBuf;
use tokio::fs;

use crate::errors::{AppError, AppResult};

/// File storage for uploaded import files.
///
/// Bytes are stored under a job-scoped key inside a single directory; the
/// file is written once at intake and never mutated, so validation and
/// processing can read it concurrently.
#[derive(Clone)]
pub struct ImportFileStorage {
    upload_dir: PathBuf,
}

impl ImportFileStorage {
    pub fn new(upload_dir: PathBuf) -> Self {
        Self { upload_dir }
    }

    pub async fn ensure_storage_dirs(&self) -> AppResult<()> {
        if !self.upload_dir.exists() {
            fs::create_dir_all(&self.upload_dir).await?;
        }
        Ok(())
    }

    /// Persist uploaded bytes under the given key, returning the stored size.
    pub async fn save(&self, key: &str, data: &[u8]) -> AppResult<u64> {
        self.ensure_storage_dirs().await?;
        let path = self.upload_dir.join(key);
        fs::write(&path, data).await?;
        Ok(data.len() as u64)
    }

    pub async fn read(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.upload_dir.join(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::not_found("import file", key))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the stored file. Missing files are not an error: delete is
    /// best-effort and may run after a partial cleanup.
    pub async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.upload_dir.join(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
