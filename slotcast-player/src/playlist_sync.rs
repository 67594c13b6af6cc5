//! Keeps the resolved playlist in step with the server snapshot.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::heartbeat::{record_error, ErrorBuffer};
use crate::media_cache::MediaCache;
use crate::playlist::{resolve, PlaylistSnapshot, ResolvedPlaylist};
use crate::websocket_client::http_base;

/// Persists the snapshot, resolves it and publishes the result. Returns
/// whether the rotation saw a change.
pub fn apply_snapshot(
    cache: &MediaCache,
    playlist_tx: &watch::Sender<Arc<ResolvedPlaylist>>,
    snapshot: &PlaylistSnapshot,
) -> bool {
    if let Err(e) = cache.save_snapshot(snapshot) {
        tracing::warn!("Failed to persist playlist snapshot: {}", e);
    }

    let resolved = resolve(snapshot);
    playlist_tx.send_if_modified(|current| {
        if **current == resolved {
            false
        } else {
            tracing::info!(
                "Playlist {:?} v{:?}: {} items",
                resolved.playlist_id,
                resolved.version,
                resolved.items.len()
            );
            *current = Arc::new(resolved);
            true
        }
    })
}

pub struct PlaylistSync {
    base_url: String,
    client: reqwest::Client,
    cache: Arc<MediaCache>,
    terminal_id: watch::Receiver<Option<i32>>,
    refresh_rx: UnboundedReceiver<()>,
    playlist_tx: Arc<watch::Sender<Arc<ResolvedPlaylist>>>,
    errors: ErrorBuffer,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl PlaylistSync {
    pub fn new(
        server_url: &str,
        cache: Arc<MediaCache>,
        terminal_id: watch::Receiver<Option<i32>>,
        refresh_rx: UnboundedReceiver<()>,
        playlist_tx: Arc<watch::Sender<Arc<ResolvedPlaylist>>>,
        errors: ErrorBuffer,
        poll_interval_secs: u64,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: http_base(server_url),
            client,
            cache,
            terminal_id,
            refresh_rx,
            playlist_tx,
            errors,
            poll_interval: Duration::from_secs(poll_interval_secs),
            cancel,
        })
    }

    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                requested = self.refresh_rx.recv() => {
                    if requested.is_none() {
                        break;
                    }
                    while self.refresh_rx.try_recv().is_ok() {}
                }
                changed = self.terminal_id.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.cancel.cancelled() => break,
            }

            let Some(terminal_id) = *self.terminal_id.borrow_and_update() else {
                tracing::debug!("Terminal id not known yet, skipping playlist sync");
                continue;
            };

            match self.fetch(terminal_id).await {
                Ok(snapshot) => {
                    apply_snapshot(&self.cache, &self.playlist_tx, &snapshot);
                }
                Err(e) => {
                    tracing::warn!("Playlist sync failed: {}", e);
                    record_error(&self.errors, format!("playlist sync failed: {}", e));
                }
            }
        }

        tracing::debug!("Playlist sync stopped");
    }

    async fn fetch(&self, terminal_id: i32) -> Result<PlaylistSnapshot> {
        let url = format!("{}/api/terminals/{}/playlist", self.base_url, terminal_id);
        let snapshot = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<PlaylistSnapshot>()
            .await?;
        Ok(snapshot)
    }
}
