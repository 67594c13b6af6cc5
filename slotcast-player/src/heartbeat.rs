use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::playlist::ResolvedPlaylist;
use crate::rotation::PlaybackStatus;
use crate::schedule::TerminalSettings;
use crate::websocket_client::TerminalMessage;

const MAX_BUFFERED_ERRORS: usize = 50;

/// Errors collected between heartbeats; each beat drains it.
pub type ErrorBuffer = Arc<Mutex<Vec<String>>>;

pub fn record_error(buffer: &ErrorBuffer, error: impl Into<String>) {
    if let Ok(mut errors) = buffer.lock() {
        if errors.len() >= MAX_BUFFERED_ERRORS {
            errors.remove(0);
        }
        errors.push(error.into());
    }
}

fn drain_errors(buffer: &ErrorBuffer) -> Vec<String> {
    buffer
        .lock()
        .map(|mut errors| std::mem::take(&mut *errors))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: f64,
}

pub struct HeartbeatInputs {
    pub powered: watch::Receiver<bool>,
    pub settings: watch::Receiver<Option<TerminalSettings>>,
    pub playlist: watch::Receiver<Arc<ResolvedPlaylist>>,
    pub status: watch::Receiver<PlaybackStatus>,
    pub errors: ErrorBuffer,
}

/// Media and resource usage are only reported while the server has monitoring
/// switched on for this terminal.
pub fn build_heartbeat(
    powered: bool,
    settings: Option<&TerminalSettings>,
    playlist_id: Option<i32>,
    status: &PlaybackStatus,
    telemetry: Option<Telemetry>,
    errors: Vec<String>,
) -> TerminalMessage {
    let monitoring = settings.map(|s| s.is_monitoring).unwrap_or(false);
    let telemetry = telemetry.filter(|_| monitoring);

    TerminalMessage::Heartbeat {
        powered,
        playlist_id,
        current_media: if monitoring {
            status.current_media()
        } else {
            None
        },
        cpu_usage_percent: telemetry.map(|t| t.cpu_usage_percent),
        memory_usage_mb: telemetry.map(|t| t.memory_usage_mb),
        errors,
    }
}

pub struct HeartbeatManager {
    inputs: HeartbeatInputs,
    sender: UnboundedSender<TerminalMessage>,
    beat_rx: UnboundedReceiver<()>,
    interval: Duration,
    cancel: CancellationToken,
    sys: System,
}

impl HeartbeatManager {
    pub fn new(
        inputs: HeartbeatInputs,
        sender: UnboundedSender<TerminalMessage>,
        beat_rx: UnboundedReceiver<()>,
        interval_secs: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inputs,
            sender,
            beat_rx,
            interval: Duration::from_secs(interval_secs),
            cancel,
            sys: System::new(),
        }
    }

    pub async fn start(mut self) {
        let mut tick = interval(self.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                requested = self.beat_rx.recv() => {
                    if requested.is_none() {
                        break;
                    }
                    // Collapse bursts of requests into one beat
                    while self.beat_rx.try_recv().is_ok() {}
                    tick.reset();
                }
                _ = self.cancel.cancelled() => break,
            }

            let heartbeat = self.collect_heartbeat_data();

            if self.sender.send(heartbeat).is_err() {
                tracing::error!("Failed to send heartbeat");
                break;
            }
        }

        tracing::debug!("Heartbeat task stopped");
    }

    fn monitoring(&self) -> bool {
        self.inputs
            .settings
            .borrow()
            .as_ref()
            .map(|s| s.is_monitoring)
            .unwrap_or(false)
    }

    fn sample_telemetry(&mut self) -> Telemetry {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();

        // Average CPU usage across all cores
        let cpus = self.sys.cpus();
        let cpu_usage = if !cpus.is_empty() {
            cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
        } else {
            0.0
        } as f64;

        Telemetry {
            cpu_usage_percent: cpu_usage,
            memory_usage_mb: (self.sys.used_memory() as f64) / (1024.0 * 1024.0),
        }
    }

    fn collect_heartbeat_data(&mut self) -> TerminalMessage {
        let telemetry = if self.monitoring() {
            Some(self.sample_telemetry())
        } else {
            None
        };

        let powered = *self.inputs.powered.borrow();
        let playlist_id = self.inputs.playlist.borrow().playlist_id;
        let status = self.inputs.status.borrow().clone();
        let settings = self.inputs.settings.borrow().clone();

        build_heartbeat(
            powered,
            settings.as_ref(),
            playlist_id,
            &status,
            telemetry,
            drain_errors(&self.inputs.errors),
        )
    }
}
