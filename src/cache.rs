//! Date-keyed snapshot cache.
//!
//! Cached files are a permanent historical record: once a date has been
//! written it is returned as-is and never revalidated against the source.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::error::{RosterError, RosterResult};

/// Remote path component for a date, `YYYY/MM/DD`.
pub fn source_key(date: NaiveDate) -> String {
    date.format("%Y/%m/%d").to_string()
}

/// Cache file stem for a date, `YYYY.MM.DD`.
pub fn file_key(date: NaiveDate) -> String {
    source_key(date).replace('/', ".")
}

/// The upstream source answers failures with a JSON object instead of CSV.
pub fn is_error_body(raw: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(raw.trim())
        .map(|value| value.is_object())
        .unwrap_or(false)
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetches the raw payload for `key` (formatted by [`source_key`]).
    async fn fetch(&self, key: &str) -> RosterResult<String>;
}

pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> RosterResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl SnapshotSource for HttpSource {
    async fn fetch(&self, key: &str) -> RosterResult<String> {
        let url = format!("{}{}", self.base_url, key);
        debug!(%url, "fetching snapshot");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // JSON error bodies are classified by the cache, whatever the status.
        if !status.is_success() && !is_error_body(&body) {
            return Err(RosterError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            });
        }
        Ok(body)
    }
}

pub struct SnapshotCache<S> {
    dir: PathBuf,
    source: S,
}

impl<S: SnapshotSource> SnapshotCache<S> {
    pub fn new(dir: impl AsRef<Path>, source: S) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn entry_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.csv", file_key(date)))
    }

    /// Returns the raw snapshot text for `date`, fetching and persisting it
    /// on a cache miss.
    pub async fn resolve(&self, date: NaiveDate) -> RosterResult<String> {
        let path = self.entry_path(date);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                debug!(path = %path.display(), "snapshot cache hit");
                return Ok(raw);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(RosterError::CacheRead { path, source }),
        }

        info!(%date, "snapshot cache miss, fetching");
        let raw = self.source.fetch(&source_key(date)).await?;
        if is_error_body(&raw) {
            return Err(RosterError::SnapshotUnavailable { date });
        }

        persist(&path, &raw).await?;
        info!(path = %path.display(), bytes = raw.len(), "snapshot cached");
        Ok(raw)
    }
}

/// Writes next to the target and renames over it, so a crash mid-write
/// never leaves a truncated entry under the real key.
async fn persist(path: &Path, raw: &str) -> RosterResult<()> {
    let write_failure = |source| RosterError::CacheWriteFailure {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_failure)?;
    }

    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    tokio::fs::write(&partial, raw)
        .await
        .map_err(write_failure)?;
    tokio::fs::rename(&partial, path)
        .await
        .map_err(write_failure)?;
    Ok(())
}
