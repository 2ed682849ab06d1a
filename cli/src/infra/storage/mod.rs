//! Storage backends and runtime selection.
//!
//! The backend is chosen once from the base directory's scheme; the rest of
//! the program sees only `StorageProvider`.

pub mod local;
pub mod s3;

use anyhow::Result;

pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::application::ports::{LockAttempt, LockHandle, StorageProvider};
use crate::domain::config::StorageLocation;
use crate::domain::error::StorageError;
use crate::infra::command_runner::TokioCommandRunner;

/// The storage backend selected for this invocation.
pub enum Storage {
    Local(LocalStorage),
    S3(S3Storage<TokioCommandRunner>),
}

impl Storage {
    /// Open the backend for `location`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::RemoteStorageUnavailable` when an S3 location is
    /// configured but the `aws` CLI is not on `PATH`.
    pub fn open(location: &StorageLocation) -> Result<Self> {
        match location {
            StorageLocation::Local(path) => Ok(Self::Local(LocalStorage::new(path))),
            StorageLocation::S3 { bucket, prefix } => {
                if which::which(s3::AWS_CLI).is_err() {
                    return Err(StorageError::RemoteStorageUnavailable {
                        capability: format!(
                            "the `{}` CLI (install awscli and put it on PATH)",
                            s3::AWS_CLI
                        ),
                    }
                    .into());
                }
                Ok(Self::S3(S3Storage::new(
                    TokioCommandRunner::default(),
                    bucket,
                    prefix,
                )?))
            }
        }
    }
}

impl StorageProvider for Storage {
    fn describe(&self) -> String {
        match self {
            Self::Local(s) => s.describe(),
            Self::S3(s) => s.describe(),
        }
    }

    fn is_remote(&self) -> bool {
        matches!(self, Self::S3(_))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        match self {
            Self::Local(s) => s.read(path).await,
            Self::S3(s) => s.read(path).await,
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        match self {
            Self::Local(s) => s.write(path, data).await,
            Self::S3(s) => s.write(path, data).await,
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self {
            Self::Local(s) => s.exists(path).await,
            Self::S3(s) => s.exists(path).await,
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        match self {
            Self::Local(s) => s.list(prefix).await,
            Self::S3(s) => s.list(prefix).await,
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self {
            Self::Local(s) => s.delete(path).await,
            Self::S3(s) => s.delete(path).await,
        }
    }

    async fn acquire_lock(&self, workspace: &str, holder: &str) -> Result<LockAttempt> {
        match self {
            Self::Local(s) => s.acquire_lock(workspace, holder).await,
            Self::S3(s) => s.acquire_lock(workspace, holder).await,
        }
    }

    async fn release_lock(&self, lock: LockHandle) -> Result<()> {
        match self {
            Self::Local(s) => s.release_lock(lock).await,
            Self::S3(s) => s.release_lock(lock).await,
        }
    }
}
