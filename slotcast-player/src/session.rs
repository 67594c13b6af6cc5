//! Wires the terminal's tasks together and tears them down as one unit.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::display::Display;
use crate::heartbeat::{record_error, ErrorBuffer, HeartbeatInputs, HeartbeatManager};
use crate::media_cache::MediaCache;
use crate::playlist::{resolve, ResolvedPlaylist};
use crate::playlist_sync::PlaylistSync;
use crate::rotation::{
    PlaybackStatus, RotationChannels, RotationEvent, RotationLoop, RotationTiming,
};
use crate::schedule::{self, TerminalSettings};
use crate::websocket_client::{ClientChannels, TerminalMessage, WebSocketClient};

/// Restores what the last run left in the cache so playback can start offline.
fn restore(cache: &MediaCache) -> (Option<i32>, ResolvedPlaylist, Option<TerminalSettings>) {
    let (terminal_id, playlist) = match cache.load_snapshot() {
        Ok(Some(snapshot)) => {
            let resolved = resolve(&snapshot);
            tracing::info!(
                "Restored cached playlist {:?} with {} items",
                resolved.playlist_id,
                resolved.items.len()
            );
            (Some(snapshot.terminal_id), resolved)
        }
        Ok(None) => (None, ResolvedPlaylist::default()),
        Err(e) => {
            tracing::warn!("Ignoring unreadable playlist snapshot: {}", e);
            (None, ResolvedPlaylist::default())
        }
    };

    let settings = cache.load_settings().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable settings: {}", e);
        None
    });

    (terminal_id, playlist, settings)
}

/// Media errors go to the server right away and ride along on the next heartbeat.
async fn forward_events(
    mut events: UnboundedReceiver<RotationEvent>,
    outgoing: UnboundedSender<TerminalMessage>,
    errors: ErrorBuffer,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        match event {
            RotationEvent::MediaError {
                media_id,
                url,
                error,
            } => {
                record_error(&errors, format!("{}: {}", url, error));
                let _ = outgoing.send(TerminalMessage::MediaError {
                    media_id,
                    url,
                    error,
                });
            }
        }
    }
}

pub async fn run<D: Display + 'static>(
    config: Arc<Config>,
    display: Arc<D>,
    cache: Arc<MediaCache>,
    cancel: CancellationToken,
) -> Result<()> {
    let (terminal_id, playlist, settings) = restore(&cache);

    let (settings_tx, settings_rx) = watch::channel(settings);
    let (terminal_id_tx, terminal_id_rx) = watch::channel(terminal_id);
    let (playlist_tx, playlist_rx) = watch::channel(Arc::new(playlist));
    // Off until the schedule task has evaluated once
    let (power_tx, power_rx) = watch::channel(false);
    let (status_tx, status_rx) = watch::channel(PlaybackStatus::Idle);

    let (refresh_tx, refresh_rx) = unbounded_channel();
    let (beat_tx, beat_rx) = unbounded_channel();
    let (outgoing_tx, outgoing_rx) = unbounded_channel();
    let (events_tx, events_rx) = unbounded_channel();
    let errors: ErrorBuffer = Arc::default();

    let playlist_tx = Arc::new(playlist_tx);
    let power_tx = Arc::new(power_tx);

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    tasks.push(tokio::spawn(schedule::run(
        settings_rx.clone(),
        power_tx.clone(),
        beat_tx.clone(),
        config.schedule_tick_secs,
        cancel.clone(),
    )));

    let sync = PlaylistSync::new(
        &config.server_url,
        cache.clone(),
        terminal_id_rx,
        refresh_rx,
        playlist_tx.clone(),
        errors.clone(),
        config.playlist_poll_interval_secs,
        cancel.clone(),
    )?;
    tasks.push(tokio::spawn(sync.run()));

    let heartbeat = HeartbeatManager::new(
        HeartbeatInputs {
            powered: power_rx.clone(),
            settings: settings_rx,
            playlist: playlist_rx.clone(),
            status: status_rx,
            errors: errors.clone(),
        },
        outgoing_tx.clone(),
        beat_rx,
        config.heartbeat_interval_secs,
        cancel.clone(),
    );
    tasks.push(tokio::spawn(heartbeat.start()));

    let rotation = RotationLoop::new(
        display,
        cache.clone(),
        RotationChannels {
            playlist: playlist_rx,
            powered: power_rx,
            status: Arc::new(status_tx),
            refresh: refresh_tx.clone(),
            events: events_tx,
        },
        RotationTiming {
            idle_poll: Duration::from_secs(config.idle_poll_secs),
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            max_item_retries: config.max_item_retries,
        },
        cancel.clone(),
    );
    tasks.push(tokio::spawn(rotation.run()));

    tasks.push(tokio::spawn(forward_events(
        events_rx,
        outgoing_tx,
        errors,
        cancel.clone(),
    )));

    let client = WebSocketClient::new(
        config.clone(),
        cache,
        ClientChannels {
            settings: Arc::new(settings_tx),
            terminal_id: Arc::new(terminal_id_tx),
            refresh: refresh_tx,
            beat: beat_tx,
            outgoing: outgoing_rx,
        },
        cancel.clone(),
    );
    tasks.push(tokio::spawn(client.connect_and_run()));

    tracing::info!("Terminal {} running", config.terminal_name);
    cancel.cancelled().await;

    tracing::info!("Shutting down terminal tasks");
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Task ended abnormally: {}", e);
        }
    }

    Ok(())
}
