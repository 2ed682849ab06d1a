//! Local filesystem `StorageProvider`.
//!
//! Keys map directly onto paths under the root directory. Writes go through
//! a `<file>.tmp` sibling and an atomic rename; the workspace lock is an
//! `fs2` exclusive lock on `<workspace>/.lock` holding the owner's identity.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use walkdir::WalkDir;

use crate::application::ports::{LockAttempt, LockHandle, StorageProvider};
use crate::domain::deployment::{LOCK_FILE, STAGING_SUFFIX};
use crate::domain::error::StorageError;

const LOCK_ATTEMPTS: usize = 8;

/// Storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path, refusing anything that would leave the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            anyhow::bail!("invalid storage key '{key}'");
        }
        Ok(self.root.join(rel))
    }

    fn read_sync(path: &Path, key: &str) -> Result<Vec<u8>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()).into())
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn write_sync(path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }

        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(STAGING_SUFFIX);
        let temp_path = PathBuf::from(temp_name);
        std::fs::write(&temp_path, data)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("setting permissions on {}", temp_path.display()))?;
        }

        std::fs::rename(&temp_path, path)
            .with_context(|| format!("finalizing {}", path.display()))
    }

    fn list_sync(root: &Path, prefix: &str) -> Result<Vec<String>> {
        // Walk from the deepest directory named by the prefix.
        let dir_part = prefix.rsplit_once('/').map_or("", |(dir, _)| dir);
        let start = if dir_part.is_empty() {
            root.to_path_buf()
        } else {
            root.join(dir_part)
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&start).follow_links(false) {
            let entry = entry.with_context(|| format!("listing {}", start.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.ends_with(STAGING_SUFFIX) || !key.starts_with(prefix) {
                continue;
            }
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }

    fn lock_sync(path: &Path, key: String, holder: &str) -> Result<LockAttempt> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        // Release unlinks the file before unlocking it, so a lock taken on a
        // handle opened just before that unlink guards nothing. Retry until
        // the locked handle is the file the path names.
        for _ in 0..LOCK_ATTEMPTS {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .with_context(|| format!("opening lock file {}", path.display()))?;

            if let Err(e) = file.try_lock_exclusive() {
                if e.kind() != fs2::lock_contended_error().kind() {
                    return Err(e).with_context(|| format!("locking {}", path.display()));
                }
                let mut holder = String::new();
                let _ = file.read_to_string(&mut holder);
                let holder = holder.trim();
                return Ok(LockAttempt::Held {
                    holder: if holder.is_empty() {
                        "an unknown process".to_string()
                    } else {
                        holder.to_string()
                    },
                });
            }

            if !Self::is_current(path, &file)? {
                tracing::debug!(path = %path.display(), "lock file replaced while locking, retrying");
                continue;
            }

            file.set_len(0)
                .and_then(|()| file.rewind())
                .and_then(|()| file.write_all(holder.as_bytes()))
                .and_then(|()| file.sync_all())
                .with_context(|| format!("recording lock holder in {}", path.display()))?;
            return Ok(LockAttempt::Acquired(LockHandle {
                key,
                file: Some(file),
            }));
        }
        anyhow::bail!(
            "lock file {} kept changing while locking; try again",
            path.display()
        )
    }

    /// Whether `path` still names the file behind `file`.
    #[cfg(unix)]
    fn is_current(path: &Path, file: &File) -> Result<bool> {
        use std::os::unix::fs::MetadataExt;

        let held = file
            .metadata()
            .with_context(|| format!("inspecting lock file {}", path.display()))?;
        match std::fs::metadata(path) {
            Ok(named) => Ok(named.dev() == held.dev() && named.ino() == held.ino()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("inspecting {}", path.display())),
        }
    }

    #[cfg(not(unix))]
    fn is_current(path: &Path, _file: &File) -> Result<bool> {
        Ok(path.is_file())
    }

    fn unlock_sync(path: &Path, file: Option<File>) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
        }
        if let Some(file) = file {
            FileExt::unlock(&file).with_context(|| format!("unlocking {}", path.display()))?;
        }
        Ok(())
    }
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .with_context(|| format!("{what} task panicked"))?
}

impl StorageProvider for LocalStorage {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        let key = path.to_string();
        tracing::debug!(key, "local read");
        blocking("storage read", move || Self::read_sync(&full, &key)).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        let data = data.to_vec();
        tracing::debug!(key = path, bytes = data.len(), "local write");
        blocking("storage write", move || Self::write_sync(&full, &data)).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        blocking("storage list", move || Self::list_sync(&root, &prefix)).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tracing::debug!(key = path, "local delete");
        blocking("storage delete", move || match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", full.display())),
        })
        .await
    }

    async fn acquire_lock(&self, workspace: &str, holder: &str) -> Result<LockAttempt> {
        let key = format!("{workspace}/{LOCK_FILE}");
        let full = self.resolve(&key)?;
        let holder = holder.to_string();
        blocking("lock", move || Self::lock_sync(&full, key, &holder)).await
    }

    async fn release_lock(&self, lock: LockHandle) -> Result<()> {
        let full = self.resolve(&lock.key)?;
        blocking("unlock", move || Self::unlock_sync(&full, lock.file)).await
    }
}
