//! Media rotation: Idle -> Resolving -> Playing -> Resolving(next).
//!
//! The loop owns the display timer. It never arms a timer while a resolution
//! is in flight, stops the display when the schedule says unpowered and picks
//! up again at the same index when power returns.

use crate::display::{Banner, Display};
use crate::media_cache::MediaSource;
use crate::playlist::{MediaKind, PlaylistItem, ResolvedPlaylist};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

const VIDEO_END_POLL: Duration = Duration::from_millis(500);

/// Position bookkeeping, free of any I/O.
#[derive(Debug, Default)]
pub struct Rotation {
    items: Vec<PlaylistItem>,
    index: usize,
    failures: u32,
    skipped: usize,
}

impl Rotation {
    pub fn new(items: Vec<PlaylistItem>) -> Self {
        Self {
            items,
            index: 0,
            failures: 0,
            skipped: 0,
        }
    }

    /// Swaps in a new list, keeping the position when it is still in range.
    pub fn replace(&mut self, items: Vec<PlaylistItem>) {
        if items == self.items {
            return;
        }
        self.items = items;
        if self.index >= self.items.len() {
            self.index = 0;
        }
        self.failures = 0;
        self.skipped = 0;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&PlaylistItem> {
        self.items.get(self.index)
    }

    pub fn advance(&mut self) -> usize {
        self.failures = 0;
        if !self.items.is_empty() {
            self.index = (self.index + 1) % self.items.len();
        }
        self.index
    }

    /// Counts a failure on the current item; true once it should be skipped.
    pub fn record_failure(&mut self, max_attempts: u32) -> bool {
        self.failures += 1;
        self.failures >= max_attempts
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.skipped = 0;
    }

    /// Counts an item skipped without playing; true once a whole lap was skipped.
    pub fn record_skip(&mut self) -> bool {
        self.skipped += 1;
        if self.skipped >= self.items.len() {
            self.skipped = 0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Paused,
    Resolving { media_id: i32 },
    Playing { media_id: i32, url: String },
}

impl PlaybackStatus {
    pub fn current_media(&self) -> Option<String> {
        match self {
            PlaybackStatus::Playing { url, .. } => Some(url.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationEvent {
    MediaError {
        media_id: Option<i32>,
        url: String,
        error: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RotationTiming {
    pub idle_poll: Duration,
    pub retry_backoff: Duration,
    pub max_item_retries: u32,
}

pub struct RotationChannels {
    pub playlist: watch::Receiver<Arc<ResolvedPlaylist>>,
    pub powered: watch::Receiver<bool>,
    pub status: Arc<watch::Sender<PlaybackStatus>>,
    /// Asks for a fresh snapshot while idle.
    pub refresh: UnboundedSender<()>,
    pub events: UnboundedSender<RotationEvent>,
}

enum Wait {
    Elapsed,
    Skipped,
    Retry,
    PowerLost,
    PlaylistEmptied,
    Cancelled,
}

pub struct RotationLoop<D: Display, S: MediaSource> {
    display: Arc<D>,
    source: Arc<S>,
    channels: RotationChannels,
    timing: RotationTiming,
    cancel: CancellationToken,
    rotation: Rotation,
    idle: bool,
}

impl<D: Display, S: MediaSource> RotationLoop<D, S> {
    pub fn new(
        display: Arc<D>,
        source: Arc<S>,
        channels: RotationChannels,
        timing: RotationTiming,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            display,
            source,
            channels,
            timing,
            cancel,
            rotation: Rotation::default(),
            idle: false,
        }
    }

    fn set_status(&self, status: PlaybackStatus) {
        self.channels.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    async fn show_banner(&self, banner: Banner) {
        if let Err(e) = self.display.banner(&banner).await {
            tracing::warn!("Failed to show banner {:?}: {}", banner, e);
        }
    }

    async fn stop_display(&self) {
        if let Err(e) = self.display.stop().await {
            tracing::warn!("Failed to stop display: {}", e);
        }
    }

    fn absorb_playlist(&mut self) {
        let playlist = self.channels.playlist.borrow_and_update().clone();
        self.rotation.replace(playlist.items.clone());
    }

    pub async fn run(mut self) {
        tracing::info!("Rotation loop started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !*self.channels.powered.borrow_and_update() {
                if !self.pause().await {
                    break;
                }
                continue;
            }

            self.absorb_playlist();

            let Some(item) = self.rotation.current().cloned() else {
                if !self.idle().await {
                    break;
                }
                continue;
            };

            match self.play(&item).await {
                Wait::Elapsed => {
                    self.rotation.advance();
                }
                Wait::Skipped => {
                    let lap_skipped = self.rotation.record_skip();
                    self.rotation.advance();
                    if lap_skipped && !self.back_off().await {
                        break;
                    }
                }
                Wait::Retry | Wait::PowerLost | Wait::PlaylistEmptied => {}
                Wait::Cancelled => break,
            }
        }

        self.stop_display().await;
        self.set_status(PlaybackStatus::Idle);
        tracing::info!("Rotation loop stopped");
    }

    /// Unpowered: no timer armed, index untouched. False on cancellation.
    async fn pause(&mut self) -> bool {
        self.idle = false;
        tracing::info!("Rotation paused at index {}", self.rotation.index());
        self.set_status(PlaybackStatus::Paused);
        self.stop_display().await;
        self.show_banner(Banner::Standby).await;

        loop {
            tokio::select! {
                changed = self.channels.powered.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    if *self.channels.powered.borrow_and_update() {
                        tracing::info!("Rotation resumed at index {}", self.rotation.index());
                        return true;
                    }
                }
                _ = self.cancel.cancelled() => return false,
            }
        }
    }

    /// Empty playlist: poll for content until something shows up.
    async fn idle(&mut self) -> bool {
        if !self.idle {
            self.idle = true;
            tracing::info!("Playlist is empty, waiting for content");
            self.set_status(PlaybackStatus::Idle);
            self.stop_display().await;
            self.show_banner(Banner::NoContent).await;
        }

        let _ = self.channels.refresh.send(());

        tokio::select! {
            _ = sleep(self.timing.idle_poll) => true,
            changed = self.channels.playlist.changed() => changed.is_ok(),
            changed = self.channels.powered.changed() => changed.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Nothing in the list could be played: hold the error banner before
    /// the next lap. False on cancellation.
    async fn back_off(&mut self) -> bool {
        tracing::warn!(
            "No playable media in the playlist, retrying in {:?}",
            self.timing.retry_backoff
        );
        self.set_status(PlaybackStatus::Idle);
        self.show_banner(Banner::Error("no playable media".to_string()))
            .await;

        tokio::select! {
            _ = sleep(self.timing.retry_backoff) => true,
            changed = self.channels.playlist.changed() => changed.is_ok(),
            changed = self.channels.powered.changed() => changed.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    fn report_error(&self, item: &PlaylistItem, url: &str, error: &anyhow::Error) {
        let _ = self.channels.events.send(RotationEvent::MediaError {
            media_id: Some(item.media_id),
            url: url.to_string(),
            error: error.to_string(),
        });
    }

    async fn play(&mut self, item: &PlaylistItem) -> Wait {
        self.idle = false;
        self.set_status(PlaybackStatus::Resolving {
            media_id: item.media_id,
        });

        let Some(media) = item.media.as_ref() else {
            tracing::warn!("Media {} is not in the snapshot, skipping", item.media_id);
            return Wait::Skipped;
        };

        let location = tokio::select! {
            resolved = self.source.resolve(media) => resolved,
            _ = self.cancel.cancelled() => return Wait::Cancelled,
        };
        let location = match location {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!("Cannot resolve media {}: {}, skipping", media.id, e);
                self.report_error(item, &media.url, &e);
                return Wait::Skipped;
            }
        };

        if let Err(e) = self.display.show(&location, media.kind).await {
            tracing::error!("Display failed for media {}: {}", media.id, e);
            self.report_error(item, &media.url, &e);
            if self.rotation.record_failure(self.timing.max_item_retries) {
                tracing::warn!(
                    "Media {} failed {} times, skipping",
                    media.id,
                    self.timing.max_item_retries
                );
                return Wait::Elapsed;
            }
            self.show_banner(Banner::Error(format!("media {} unavailable", media.id)))
                .await;
            // Retry the same index after the backoff.
            return match self.wait_for(self.timing.retry_backoff, MediaKind::Image).await {
                Wait::Elapsed => Wait::Retry,
                other => other,
            };
        }

        self.rotation.record_success();
        self.set_status(PlaybackStatus::Playing {
            media_id: media.id,
            url: media.url.clone(),
        });
        tracing::debug!(
            "Playing media {} (slot {:?}) for {:?}",
            media.id,
            item.slot_index,
            item.duration
        );

        self.wait_for(item.duration, media.kind).await
    }

    /// Waits out `duration` (or a video's end), reacting to power and
    /// playlist changes. A non-empty playlist update lets the item finish.
    async fn wait_for(&mut self, duration: Duration, kind: MediaKind) -> Wait {
        let deadline = Instant::now() + duration;
        let display = self.display.clone();

        let video_end = async move {
            if kind != MediaKind::Video {
                return std::future::pending::<()>().await;
            }
            loop {
                sleep(VIDEO_END_POLL).await;
                match display.finished().await {
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("Lost track of video playback: {}", e);
                        return;
                    }
                }
            }
        };
        tokio::pin!(video_end);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Wait::Elapsed,
                _ = &mut video_end => return Wait::Elapsed,
                changed = self.channels.powered.changed() => {
                    if changed.is_err() {
                        return Wait::Cancelled;
                    }
                    if !*self.channels.powered.borrow() {
                        return Wait::PowerLost;
                    }
                }
                changed = self.channels.playlist.changed() => {
                    if changed.is_err() {
                        return Wait::Cancelled;
                    }
                    if self.channels.playlist.borrow().items.is_empty() {
                        return Wait::PlaylistEmptied;
                    }
                }
                _ = self.cancel.cancelled() => return Wait::Cancelled,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::MediaRef;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeDisplay {
        shown: Mutex<Vec<String>>,
        banners: Mutex<Vec<Banner>>,
        stops: Mutex<u32>,
        /// Remaining failures per location.
        failures: Mutex<HashMap<String, u32>>,
    }

    impl FakeDisplay {
        fn shown(&self) -> Vec<String> {
            self.shown.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Display for FakeDisplay {
        async fn show(&self, location: &str, _kind: MediaKind) -> Result<()> {
            self.shown.lock().unwrap().push(location.to_string());
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(location) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(anyhow!("decoder error"))
                }
                _ => Ok(()),
            }
        }

        async fn finished(&self) -> Result<bool> {
            Ok(false)
        }

        async fn stop(&self) -> Result<()> {
            *self.stops.lock().unwrap() += 1;
            Ok(())
        }

        async fn banner(&self, banner: &Banner) -> Result<()> {
            self.banners.lock().unwrap().push(banner.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSource {
        unreachable: HashSet<String>,
    }

    #[async_trait]
    impl MediaSource for FakeSource {
        async fn resolve(&self, media: &MediaRef) -> Result<String> {
            if self.unreachable.contains(&media.url) {
                Err(anyhow!("404"))
            } else {
                Ok(media.url.clone())
            }
        }
    }

    fn item(id: i32, secs: u64) -> PlaylistItem {
        PlaylistItem {
            slot_index: Some(id),
            campaign_id: None,
            media_id: id,
            media: Some(MediaRef {
                id,
                url: format!("m{}", id),
                kind: MediaKind::Image,
            }),
            duration: Duration::from_secs(secs),
        }
    }

    fn playlist(items: Vec<PlaylistItem>) -> Arc<ResolvedPlaylist> {
        Arc::new(ResolvedPlaylist {
            playlist_id: Some(1),
            version: Some(1),
            items,
        })
    }

    struct Harness {
        display: Arc<FakeDisplay>,
        playlist_tx: watch::Sender<Arc<ResolvedPlaylist>>,
        power_tx: watch::Sender<bool>,
        refresh_rx: mpsc::UnboundedReceiver<()>,
        events_rx: mpsc::UnboundedReceiver<RotationEvent>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(display: FakeDisplay, source: FakeSource, items: Vec<PlaylistItem>) -> Harness {
        let display = Arc::new(display);
        let (playlist_tx, playlist_rx) = watch::channel(playlist(items));
        let (power_tx, power_rx) = watch::channel(true);
        let (status_tx, _status_rx) = watch::channel(PlaybackStatus::Idle);
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let rotation = RotationLoop::new(
            display.clone(),
            Arc::new(source),
            RotationChannels {
                playlist: playlist_rx,
                powered: power_rx,
                status: Arc::new(status_tx),
                refresh: refresh_tx,
                events: events_tx,
            },
            RotationTiming {
                idle_poll: Duration::from_secs(5),
                retry_backoff: Duration::from_secs(3),
                max_item_retries: 3,
            },
            cancel.clone(),
        );
        let handle = tokio::spawn(rotation.run());

        Harness {
            display,
            playlist_tx,
            power_tx,
            refresh_rx,
            events_rx,
            cancel,
            handle,
        }
    }

    #[test]
    fn test_rotation_wraps_around() {
        let mut rotation = Rotation::new(vec![item(1, 5), item(2, 5), item(3, 5)]);
        rotation.advance();
        rotation.advance();
        assert_eq!(rotation.index(), 2);
        assert_eq!(rotation.advance(), 0);
    }

    #[test]
    fn test_shrunken_playlist_resets_out_of_range_index() {
        let mut rotation = Rotation::new(vec![item(1, 5), item(2, 5), item(3, 5)]);
        rotation.advance();
        rotation.advance();
        rotation.replace(vec![item(1, 5), item(2, 5)]);
        assert_eq!(rotation.index(), 0);

        rotation.advance();
        rotation.replace(vec![item(1, 5), item(2, 5), item(4, 5)]);
        assert_eq!(rotation.index(), 1);
    }

    #[test]
    fn test_failure_budget() {
        let mut rotation = Rotation::new(vec![item(1, 5)]);
        assert!(!rotation.record_failure(3));
        assert!(!rotation.record_failure(3));
        assert!(rotation.record_failure(3));
        rotation.advance();
        assert!(!rotation.record_failure(3));
    }

    #[test]
    fn test_skip_counter_spans_one_lap() {
        let mut rotation = Rotation::new(vec![item(1, 5), item(2, 5)]);
        assert!(!rotation.record_skip());
        rotation.record_success();
        assert!(!rotation.record_skip());
        assert!(rotation.record_skip());
        assert!(!rotation.record_skip());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_items_in_order_and_wraps() {
        let h = start(
            FakeDisplay::default(),
            FakeSource::default(),
            vec![item(1, 10), item(2, 10), item(3, 10)],
        );

        sleep(Duration::from_secs(35)).await;

        assert_eq!(h.display.shown(), vec!["m1", "m2", "m3", "m1"]);
        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_item_is_skipped_immediately() {
        let source = FakeSource {
            unreachable: ["m2".to_string()].into_iter().collect(),
        };
        let mut h = start(
            FakeDisplay::default(),
            source,
            vec![item(1, 10), item(2, 10), item(3, 10)],
        );

        sleep(Duration::from_secs(15)).await;

        assert_eq!(h.display.shown(), vec!["m1", "m3"]);
        assert_eq!(
            h.events_rx.recv().await,
            Some(RotationEvent::MediaError {
                media_id: Some(2),
                url: "m2".to_string(),
                error: "404".to_string(),
            })
        );
        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unplayable_playlist_backs_off_between_laps() {
        let source = FakeSource {
            unreachable: ["m1".to_string()].into_iter().collect(),
        };
        let mut h = start(FakeDisplay::default(), source, vec![item(1, 10)]);

        // One attempt per backoff: t=0, 3, 6 and 9.
        sleep(Duration::from_secs(10)).await;
        h.cancel.cancel();
        h.handle.await.unwrap();

        let mut errors = 0;
        while h.events_rx.try_recv().is_ok() {
            errors += 1;
        }
        assert_eq!(errors, 4);
        assert!(h.display.shown().is_empty());
        assert!(h
            .display
            .banners
            .lock()
            .unwrap()
            .contains(&Banner::Error("no playable media".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_error_retries_with_backoff() {
        let display = FakeDisplay::default();
        display.failures.lock().unwrap().insert("m1".to_string(), 2);
        let h = start(display, FakeSource::default(), vec![item(1, 10), item(2, 10)]);

        // Failures at t=0 and t=3, success at t=6, m2 at t=16.
        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.display.shown(), vec!["m1", "m1"]);
        assert!(h
            .display
            .banners
            .lock()
            .unwrap()
            .contains(&Banner::Error("media 1 unavailable".to_string())));

        sleep(Duration::from_secs(12)).await;
        assert_eq!(h.display.shown(), vec!["m1", "m1", "m1", "m2"]);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_is_skipped_after_budget() {
        let display = FakeDisplay::default();
        display.failures.lock().unwrap().insert("m1".to_string(), 100);
        let h = start(display, FakeSource::default(), vec![item(1, 10), item(2, 10)]);

        // Attempts at t=0, 3, 6; the third failure skips straight to m2.
        sleep(Duration::from_secs(7)).await;
        assert_eq!(h.display.shown(), vec!["m1", "m1", "m1", "m2"]);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_preserves_position() {
        let h = start(
            FakeDisplay::default(),
            FakeSource::default(),
            vec![item(1, 10), item(2, 10), item(3, 10)],
        );

        sleep(Duration::from_secs(15)).await;
        h.power_tx.send_replace(false);
        sleep(Duration::from_secs(100)).await;
        assert_eq!(h.display.shown(), vec!["m1", "m2"]);
        assert!(h.display.banners.lock().unwrap().contains(&Banner::Standby));

        h.power_tx.send_replace(true);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.display.shown(), vec!["m1", "m2", "m2"]);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_polls_until_content_arrives() {
        let mut h = start(FakeDisplay::default(), FakeSource::default(), vec![]);

        sleep(Duration::from_secs(11)).await;
        let mut polls = 0;
        while h.refresh_rx.try_recv().is_ok() {
            polls += 1;
        }
        assert_eq!(polls, 3);
        assert!(h.display.shown().is_empty());

        h.playlist_tx.send_replace(playlist(vec![item(7, 10)]));
        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.display.shown(), vec!["m7"]);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_lets_current_item_finish() {
        let h = start(
            FakeDisplay::default(),
            FakeSource::default(),
            vec![item(1, 10), item(2, 10)],
        );

        sleep(Duration::from_secs(5)).await;
        h.playlist_tx
            .send_replace(playlist(vec![item(1, 10), item(5, 10), item(2, 10)]));
        sleep(Duration::from_secs(4)).await;
        assert_eq!(h.display.shown(), vec!["m1"]);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.display.shown(), vec!["m1", "m5"]);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_display() {
        let h = start(FakeDisplay::default(), FakeSource::default(), vec![item(1, 10)]);

        sleep(Duration::from_secs(1)).await;
        h.cancel.cancel();
        h.handle.await.unwrap();

        assert!(*h.display.stops.lock().unwrap() >= 1);
    }
}
