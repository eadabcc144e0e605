//! Durable storage for approved intro clips.
//!
//! The local directory is authoritative: playback only ever reads from it.  The remote store is a
//! backup for when the local directory is lost.

use anyhow::{anyhow, Result};
use serenity::all::UserId;
use std::path::{Path, PathBuf};

const CLIP_EXTENSION: &str = "mp3";

/// Object key (and local file name) for a member's clip
pub fn clip_key(member: UserId) -> String {
    format!("{}.{}", member, CLIP_EXTENSION)
}

/// One clip per member, stored as `<dir>/<member id>.mp3`
pub struct ClipStore {
    dir: PathBuf,
}

impl ClipStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, member: UserId) -> PathBuf {
        self.dir.join(clip_key(member))
    }

    pub async fn exists(&self, member: UserId) -> bool {
        tokio::fs::try_exists(self.path_for(member))
            .await
            .unwrap_or(false)
    }

    /// Read a member's clip, or `None` if they have none
    pub async fn read(&self, member: UserId) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(member);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow!(
                "Could not read clip `{}`: {}",
                path.to_string_lossy(),
                e
            )),
        }
    }

    /// Replace a member's clip
    pub async fn write(&self, member: UserId, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            anyhow!(
                "Could not create directory `{}`: {}",
                self.dir.to_string_lossy(),
                e
            )
        })?;

        let path = self.path_for(member);
        let tmp_path = path.with_extension(format!("{}.new", CLIP_EXTENSION));

        tokio::fs::write(&tmp_path, bytes).await.map_err(|e| {
            anyhow!(
                "Could not write clip to temporary file `{}`: {}",
                tmp_path.to_string_lossy(),
                e
            )
        })?;

        // Atomically rename over the previous clip so playback never sees a partial file.
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            anyhow!(
                "Could not rename temporary file `{}` to `{}`: {}",
                tmp_path.to_string_lossy(),
                path.to_string_lossy(),
                e
            )
        })?;

        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Remote object store holding copies of every approved clip
#[serenity::async_trait]
pub trait BackupStore: Sync + Send {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
}

/// Uploads with a plain HTTP `PUT {endpoint}/{bucket}/{key}`, which is what the Google Cloud
/// Storage XML API (and most S3-alikes with a presigned or bearer token) accept.
pub struct HttpBackupStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    bearer_token: Option<String>,
}

impl HttpBackupStore {
    pub fn new(client: reqwest::Client, cfg: &crate::config::Backup) -> Self {
        Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_owned(),
            bucket: cfg.bucket.clone(),
            bearer_token: cfg.bearer_token.clone(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[serenity::async_trait]
impl BackupStore for HttpBackupStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let url = self.object_url(key);
        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "audio/mpeg")
            .body(bytes);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await?
            .error_for_status()
            .map_err(|e| anyhow!("Could not upload `{}`: {}", url, e))?;
        Ok(())
    }
}
