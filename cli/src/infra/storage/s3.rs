//! S3 `StorageProvider` driven through the `aws` CLI.
//!
//! Object keys are `<prefix>/<key>`. Downloads land in a scratch directory
//! owned by the provider before their bytes are returned; uploads are staged
//! there too. The workspace lock is a `.lock` object created with a
//! conditional `put-object --if-none-match '*'`: present means held, and of
//! two racing creators only one succeeds.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tempfile::TempDir;

use crate::application::ports::{CommandRunner, LockAttempt, LockHandle, StorageProvider};
use crate::domain::deployment::LOCK_FILE;
use crate::domain::error::StorageError;

/// Program driven by this provider.
pub const AWS_CLI: &str = "aws";

#[derive(Deserialize)]
struct ListObjects {
    #[serde(rename = "Contents", default)]
    contents: Vec<ObjectEntry>,
}

#[derive(Deserialize)]
struct ObjectEntry {
    #[serde(rename = "Key")]
    key: String,
}

/// Storage rooted at `s3://<bucket>/<prefix>`.
pub struct S3Storage<R: CommandRunner> {
    runner: R,
    bucket: String,
    prefix: String,
    scratch: TempDir,
}

/// Whether `aws` stderr reports a missing object.
fn is_not_found(stderr: &str) -> bool {
    stderr.contains("(404)") || stderr.contains("Not Found") || stderr.contains("NoSuchKey")
}

/// Whether `aws` stderr reports a failed conditional write.
fn is_precondition_failed(stderr: &str) -> bool {
    stderr.contains("PreconditionFailed")
        || stderr.contains("(412)")
        || stderr.contains("ConditionalRequestConflict")
}

impl<R: CommandRunner> S3Storage<R> {
    /// # Errors
    ///
    /// Returns an error if the scratch directory cannot be created.
    pub fn new(runner: R, bucket: &str, prefix: &str) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("strata-s3-")
            .tempdir()
            .context("creating S3 scratch directory")?;
        Ok(Self {
            runner,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
            scratch,
        })
    }

    /// Object key for a root-relative key.
    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.object_key(key))
    }

    fn unavailable(&self, key: &str, stderr: &[u8]) -> anyhow::Error {
        StorageError::Unavailable {
            location: self.uri(key),
            reason: String::from_utf8_lossy(stderr).trim().to_string(),
        }
        .into()
    }

    fn scratch_file(&self) -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix("obj-")
            .tempfile_in(self.scratch.path())
            .context("creating scratch file")?;
        let (_, path) = file.keep().context("keeping scratch file")?;
        Ok(path)
    }
}

impl<R: CommandRunner> StorageProvider for S3Storage<R> {
    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.prefix)
        }
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let uri = self.uri(path);
        let local = self.scratch_file()?;
        let local_str = local.display().to_string();
        tracing::debug!(%uri, "s3 download");
        let out = self
            .runner
            .run(AWS_CLI, &["s3", "cp", "--only-show-errors", &uri, &local_str])
            .await
            .context("aws s3 cp")?;
        if !out.status.success() {
            let _ = std::fs::remove_file(&local);
            if is_not_found(&String::from_utf8_lossy(&out.stderr)) {
                return Err(StorageError::NotFound(path.to_string()).into());
            }
            return Err(self.unavailable(path, &out.stderr));
        }
        let bytes = std::fs::read(&local).with_context(|| format!("reading {}", local.display()));
        let _ = std::fs::remove_file(&local);
        bytes
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let uri = self.uri(path);
        let local = self.scratch_file()?;
        std::fs::write(&local, data).with_context(|| format!("staging {}", local.display()))?;
        let local_str = local.display().to_string();
        tracing::debug!(%uri, bytes = data.len(), "s3 upload");
        let out = self
            .runner
            .run(AWS_CLI, &["s3", "cp", "--only-show-errors", &local_str, &uri])
            .await
            .context("aws s3 cp");
        let _ = std::fs::remove_file(&local);
        let out = out?;
        if !out.status.success() {
            return Err(self.unavailable(path, &out.stderr));
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = self.object_key(path);
        let out = self
            .runner
            .run(
                AWS_CLI,
                &["s3api", "head-object", "--bucket", &self.bucket, "--key", &key],
            )
            .await
            .context("aws s3api head-object")?;
        if out.status.success() {
            return Ok(true);
        }
        if is_not_found(&String::from_utf8_lossy(&out.stderr)) {
            return Ok(false);
        }
        Err(self.unavailable(path, &out.stderr))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.object_key(prefix);
        tracing::debug!(bucket = %self.bucket, prefix = %full_prefix, "s3 list");
        let out = self
            .runner
            .run(
                AWS_CLI,
                &[
                    "s3api",
                    "list-objects-v2",
                    "--bucket",
                    &self.bucket,
                    "--prefix",
                    &full_prefix,
                    "--output",
                    "json",
                ],
            )
            .await
            .context("aws s3api list-objects-v2")?;
        if !out.status.success() {
            return Err(self.unavailable(prefix, &out.stderr));
        }
        if out.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let listing: ListObjects =
            serde_json::from_slice(&out.stdout).context("parsing list-objects-v2 output")?;
        let strip = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let mut keys: Vec<String> = listing
            .contents
            .into_iter()
            .filter_map(|o| o.key.strip_prefix(&strip).map(str::to_owned))
            .filter(|k| !k.is_empty() && !k.ends_with('/'))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let uri = self.uri(path);
        tracing::debug!(%uri, "s3 delete");
        let out = self
            .runner
            .run(AWS_CLI, &["s3", "rm", "--only-show-errors", &uri])
            .await
            .context("aws s3 rm")?;
        if !out.status.success() && !is_not_found(&String::from_utf8_lossy(&out.stderr)) {
            return Err(self.unavailable(path, &out.stderr));
        }
        Ok(())
    }

    async fn acquire_lock(&self, workspace: &str, holder: &str) -> Result<LockAttempt> {
        let key = format!("{workspace}/{LOCK_FILE}");
        let object = self.object_key(&key);
        let body = self.scratch_file()?;
        std::fs::write(&body, holder.as_bytes())
            .with_context(|| format!("staging {}", body.display()))?;
        let body_str = body.display().to_string();
        tracing::debug!(bucket = %self.bucket, key = %object, "s3 conditional lock");
        let out = self
            .runner
            .run(
                AWS_CLI,
                &[
                    "s3api",
                    "put-object",
                    "--bucket",
                    &self.bucket,
                    "--key",
                    &object,
                    "--body",
                    &body_str,
                    "--if-none-match",
                    "*",
                ],
            )
            .await
            .context("aws s3api put-object");
        let _ = std::fs::remove_file(&body);
        let out = out?;
        if out.status.success() {
            return Ok(LockAttempt::Acquired(LockHandle { key, file: None }));
        }
        if !is_precondition_failed(&String::from_utf8_lossy(&out.stderr)) {
            return Err(self.unavailable(&key, &out.stderr));
        }
        let holder = match self.read(&key).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
            Err(_) => String::new(),
        };
        Ok(LockAttempt::Held {
            holder: if holder.is_empty() {
                "an unknown process".to_string()
            } else {
                holder
            },
        })
    }

    async fn release_lock(&self, lock: LockHandle) -> Result<()> {
        self.delete(&lock.key).await
    }
}
