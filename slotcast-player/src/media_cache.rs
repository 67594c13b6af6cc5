//! Content-addressed media cache plus the persisted playlist snapshot.

use crate::playlist::{MediaRef, PlaylistSnapshot};
use crate::schedule::TerminalSettings;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SNAPSHOT_FILE: &str = "playlist.json";
const SETTINGS_FILE: &str = "settings.json";

/// Turns a media reference into something the display can open.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn resolve(&self, media: &MediaRef) -> Result<String>;
}

pub struct MediaCache {
    dir: PathBuf,
    client: reqwest::Client,
}

fn extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// `<sha256(url)>.<ext>`; the extension is kept so the player can sniff the format.
pub fn cache_key(url: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
    match extension(url) {
        Some(ext) => format!("{}.{}", digest, ext),
        None => digest,
    }
}

impl MediaCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self { dir, client })
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(cache_key(url))
    }

    /// Returns the local copy, downloading it first when absent.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let path = self.path_for(url);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }

        tracing::info!("Downloading {} to cache", url);
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let partial = path.with_extension("part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &path).await?;

        tracing::debug!("Cached {} bytes as {:?}", bytes.len(), path);
        Ok(path)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let partial = path.with_extension("json.part");
        std::fs::write(&partial, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&partial, &path)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    pub fn save_snapshot(&self, snapshot: &PlaylistSnapshot) -> Result<()> {
        self.write_json(SNAPSHOT_FILE, snapshot)
    }

    pub fn load_snapshot(&self) -> Result<Option<PlaylistSnapshot>> {
        self.read_json(SNAPSHOT_FILE)
    }

    pub fn save_settings(&self, settings: &TerminalSettings) -> Result<()> {
        self.write_json(SETTINGS_FILE, settings)
    }

    pub fn load_settings(&self) -> Result<Option<TerminalSettings>> {
        self.read_json(SETTINGS_FILE)
    }
}

#[async_trait]
impl MediaSource for MediaCache {
    async fn resolve(&self, media: &MediaRef) -> Result<String> {
        let location = if media.url.starts_with("http://") || media.url.starts_with("https://") {
            self.fetch(&media.url).await?
        } else if Path::new(&media.url).exists() {
            PathBuf::from(&media.url)
        } else {
            return Err(anyhow!("Media {} has no reachable source: {}", media.id, media.url));
        };

        Ok(location.to_string_lossy().to_string())
    }
}
