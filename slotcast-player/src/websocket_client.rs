use anyhow::Result;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::media_cache::MediaCache;
use crate::schedule::TerminalSettings;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// Server → Terminal messages
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "auth_response")]
    AuthResponse {
        success: bool,
        message: String,
        #[serde(default)]
        terminal_id: Option<i32>,
    },
    #[serde(rename = "terminal_updated")]
    TerminalUpdated { settings: TerminalSettings },
    #[serde(rename = "playlist_changed")]
    PlaylistChanged {
        playlist_id: Option<i32>,
        timestamp: String,
    },
    #[serde(rename = "command")]
    Command { command: TerminalCommand },
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck { counter: i64 },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum TerminalCommand {
    #[serde(rename = "reload_playlist")]
    ReloadPlaylist,
    #[serde(rename = "request_heartbeat")]
    RequestHeartbeat,
    #[serde(rename = "shutdown")]
    Shutdown,
}

// Terminal → Server messages
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TerminalMessage {
    #[serde(rename = "authenticate")]
    Authenticate {
        terminal_name: String,
        secret_key: String,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat {
        powered: bool,
        playlist_id: Option<i32>,
        current_media: Option<String>,
        cpu_usage_percent: Option<f64>,
        memory_usage_mb: Option<f64>,
        errors: Vec<String>,
    },
    #[serde(rename = "media_error")]
    MediaError {
        media_id: Option<i32>,
        url: String,
        error: String,
    },
}

/// Exponential backoff capped at five minutes.
pub fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_RECONNECT_DELAY)
}

/// `ws://host:port/ws` -> `http://host:port`, used for the REST snapshot endpoint.
pub fn http_base(server_url: &str) -> String {
    let (scheme, rest) = match server_url.split_once("://") {
        Some(("wss", rest)) => ("https", rest),
        Some(("ws", rest)) => ("http", rest),
        Some((other, rest)) => (other, rest),
        None => ("http", server_url),
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    format!("{}://{}", scheme, authority)
}

async fn await_auth<S>(read: &mut S) -> Result<Option<i32>>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = read.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        if let Ok(ServerMessage::AuthResponse {
            success,
            message,
            terminal_id,
        }) = serde_json::from_str(&text)
        {
            if !success {
                tracing::error!("Authentication failed: {}", message);
                return Err(anyhow::anyhow!("Authentication failed"));
            }
            return Ok(terminal_id);
        }
    }

    Err(anyhow::anyhow!("Connection closed before authentication"))
}

pub struct ClientChannels {
    pub settings: Arc<watch::Sender<Option<TerminalSettings>>>,
    pub terminal_id: Arc<watch::Sender<Option<i32>>>,
    pub refresh: UnboundedSender<()>,
    pub beat: UnboundedSender<()>,
    pub outgoing: UnboundedReceiver<TerminalMessage>,
}

enum Flow {
    Continue,
    Shutdown,
}

pub struct WebSocketClient {
    config: Arc<Config>,
    cache: Arc<MediaCache>,
    channels: ClientChannels,
    cancel: CancellationToken,
}

impl WebSocketClient {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<MediaCache>,
        channels: ClientChannels,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            cache,
            channels,
            cancel,
        }
    }

    pub async fn connect_and_run(mut self) {
        let mut delay = INITIAL_RECONNECT_DELAY;

        loop {
            match self.connect().await {
                Ok(()) => {
                    delay = INITIAL_RECONNECT_DELAY; // Reset delay on successful connection
                }
                Err(e) => {
                    tracing::error!("Connection error: {}", e);
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }

            tracing::info!("Reconnecting in {:?}...", delay);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.cancel.cancelled() => break,
            }
            delay = next_delay(delay);
        }

        tracing::debug!("Command channel stopped");
    }

    async fn connect(&mut self) -> Result<()> {
        let url = &self.config.server_url;
        tracing::info!("Connecting to server: {}", url);

        let (ws_stream, _) = tokio::select! {
            connected = connect_async(url.as_str()) => connected?,
            _ = self.cancel.cancelled() => return Ok(()),
        };
        tracing::info!("WebSocket connection established");

        let (mut write, mut read) = ws_stream.split();

        let auth_msg = TerminalMessage::Authenticate {
            terminal_name: self.config.terminal_name.clone(),
            secret_key: self.config.secret_key.clone(),
        };
        write
            .send(Message::Text(serde_json::to_string(&auth_msg)?))
            .await?;

        let terminal_id = timeout(AUTH_TIMEOUT, await_auth(&mut read))
            .await
            .map_err(|_| anyhow::anyhow!("Timed out waiting for authentication"))??;

        tracing::info!("Authenticated successfully as terminal {:?}", terminal_id);
        if terminal_id.is_some() {
            self.channels.terminal_id.send_replace(terminal_id);
        }

        // Anything queued while offline is stale; the fresh beat below replaces it.
        let mut dropped = 0;
        while self.channels.outgoing.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!("Dropped {} messages queued while offline", dropped);
        }
        let _ = self.channels.beat.send(());
        let _ = self.channels.refresh.send(());

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(server_msg) => {
                                if let Flow::Shutdown = self.handle_server_message(server_msg) {
                                    let _ = write.send(Message::Close(None)).await;
                                    self.cancel.cancel();
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!("Ignoring unrecognised message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Server closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
                outgoing = self.channels.outgoing.recv() => match outgoing {
                    Some(msg) => {
                        write.send(Message::Text(serde_json::to_string(&msg)?)).await?;
                    }
                    None => break,
                },
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        Ok(())
    }

    fn handle_server_message(&self, msg: ServerMessage) -> Flow {
        match msg {
            ServerMessage::AuthResponse { success, message, .. } => {
                tracing::info!("Auth response: {} - {}", success, message);
            }
            ServerMessage::TerminalUpdated { settings } => {
                tracing::info!("Settings updated: {:?}", settings);
                if let Err(e) = self.cache.save_settings(&settings) {
                    tracing::warn!("Failed to persist settings: {}", e);
                }

                let assigned = settings.assigned_playlist_id;
                let previous = self.channels.settings.send_replace(Some(settings));
                if previous.map(|p| p.assigned_playlist_id) != Some(assigned) {
                    let _ = self.channels.refresh.send(());
                }
                let _ = self.channels.beat.send(());
            }
            ServerMessage::PlaylistChanged {
                playlist_id,
                timestamp,
            } => {
                tracing::info!("Playlist {:?} changed at {}", playlist_id, timestamp);
                let _ = self.channels.refresh.send(());
            }
            ServerMessage::Command { command } => {
                tracing::info!("Received command: {:?}", command);
                return self.handle_command(command);
            }
            ServerMessage::HeartbeatAck { counter } => {
                tracing::trace!("Heartbeat {} acknowledged", counter);
            }
        }

        Flow::Continue
    }

    fn handle_command(&self, command: TerminalCommand) -> Flow {
        match command {
            TerminalCommand::ReloadPlaylist => {
                let _ = self.channels.refresh.send(());
            }
            TerminalCommand::RequestHeartbeat => {
                let _ = self.channels.beat.send(());
            }
            TerminalCommand::Shutdown => {
                tracing::info!("Command: Shutdown");
                return Flow::Shutdown;
            }
        }

        Flow::Continue
    }
}
