use crate::models::{now, PowerMode, Terminal};
use crate::services::moderation::ChangeSet;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Remote-controlled part of a terminal, pushed whenever an operator edits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalSettings {
    pub power_mode: PowerMode,
    pub operating_start: String,
    pub operating_end: String,
    pub operating_days: Vec<u8>,
    pub assigned_playlist_id: Option<i32>,
    pub is_monitoring: bool,
}

impl From<&Terminal> for TerminalSettings {
    fn from(terminal: &Terminal) -> Self {
        let power_mode = terminal.power_mode.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "Terminal {} has unknown power mode '{}', using auto",
                terminal.id,
                terminal.power_mode
            );
            PowerMode::Auto
        });

        Self {
            power_mode,
            operating_start: terminal.operating_start.clone(),
            operating_end: terminal.operating_end.clone(),
            operating_days: terminal.operating_day_indices(),
            assigned_playlist_id: terminal.assigned_playlist_id,
            is_monitoring: terminal.is_monitoring,
        }
    }
}

// Server → Terminal messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "auth_response")]
    AuthResponse {
        success: bool,
        message: String,
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

#[derive(Debug, Clone, Serialize, Deserialize)]
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
        #[serde(default)]
        errors: Vec<String>,
    },
    #[serde(rename = "media_error")]
    MediaError {
        media_id: Option<i32>,
        url: String,
        error: String,
    },
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ServerMessage>();
    let registered_tx = tx.clone();

    let (id_tx, id_rx) = tokio::sync::oneshot::channel::<i32>();
    let state_clone = state.clone();

    // Forward queued messages to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        let mut terminal_id: Option<i32> = None;
        let mut id_tx = Some(id_tx);

        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let terminal_msg = match serde_json::from_str::<TerminalMessage>(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Ignoring malformed terminal message: {}", e);
                    continue;
                }
            };

            match terminal_msg {
                TerminalMessage::Authenticate {
                    terminal_name,
                    secret_key,
                } => match authenticate_terminal(&state_clone, &terminal_name, &secret_key) {
                    Ok(terminal) => {
                        terminal_id = Some(terminal.id);
                        if let Some(id_tx) = id_tx.take() {
                            let _ = id_tx.send(terminal.id);
                        }

                        let _ = tx.send(ServerMessage::AuthResponse {
                            success: true,
                            message: "Authenticated successfully".to_string(),
                            terminal_id: Some(terminal.id),
                        });
                        let _ = tx.send(ServerMessage::TerminalUpdated {
                            settings: TerminalSettings::from(&terminal),
                        });

                        tracing::info!("Terminal {} authenticated", terminal_name);

                        let mut terminals = state_clone.connected_terminals.write().await;
                        terminals.insert(terminal.id, tx.clone());
                    }
                    Err(e) => {
                        tracing::warn!("Terminal {} failed to authenticate: {}", terminal_name, e);
                        let _ = tx.send(ServerMessage::AuthResponse {
                            success: false,
                            message: e,
                            terminal_id: None,
                        });
                    }
                },
                TerminalMessage::Heartbeat {
                    powered,
                    playlist_id,
                    current_media,
                    cpu_usage_percent,
                    memory_usage_mb,
                    errors,
                } => {
                    let Some(id) = terminal_id else {
                        continue;
                    };

                    match record_heartbeat(&state_clone, id, current_media.as_deref()) {
                        Ok(counter) => {
                            let _ = tx.send(ServerMessage::HeartbeatAck { counter });
                        }
                        Err(e) => tracing::error!("Failed to record heartbeat: {}", e),
                    }

                    if !errors.is_empty() {
                        tracing::warn!("Terminal {} reports: {}", id, errors.join("; "));
                    }

                    tracing::debug!(
                        "Terminal {} heartbeat: powered={}, playlist={:?}, media={:?}, cpu={:?}, mem={:?}",
                        id,
                        powered,
                        playlist_id,
                        current_media,
                        cpu_usage_percent,
                        memory_usage_mb
                    );
                }
                TerminalMessage::MediaError {
                    media_id,
                    url,
                    error,
                } => {
                    if terminal_id.is_some() {
                        tracing::error!(
                            "Terminal {:?} media error: media_id={:?}, url={}, error={}",
                            terminal_id,
                            media_id,
                            url,
                            error
                        );
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    if let Ok(id) = id_rx.await {
        let mut terminals = state.connected_terminals.write().await;
        // A reconnect may already have replaced this session.
        if terminals
            .get(&id)
            .map(|current| current.same_channel(&registered_tx))
            .unwrap_or(false)
        {
            terminals.remove(&id);
        }
        tracing::info!("Terminal {} disconnected", id);
    }
}

fn authenticate_terminal(
    state: &AppState,
    terminal_name: &str,
    secret_key: &str,
) -> Result<Terminal, String> {
    use crate::schema::terminals::dsl;

    let mut conn = state
        .db
        .get()
        .map_err(|_| "Database connection error".to_string())?;

    dsl::terminals
        .filter(dsl::name.eq(terminal_name))
        .filter(dsl::secret_key.eq(secret_key))
        .select(Terminal::as_select())
        .first(&mut conn)
        .map_err(|_| "Invalid credentials".to_string())
}

fn record_heartbeat(
    state: &AppState,
    terminal_id: i32,
    current_media: Option<&str>,
) -> Result<i64, String> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| "Database connection error".to_string())?;

    store_heartbeat(&mut conn, terminal_id, current_media)
        .map_err(|e| format!("Failed to update terminal {}: {}", terminal_id, e))
}

/// Stamps `last_seen`, bumps the counter and returns its new value. A
/// heartbeat without media clears what the previous one reported.
fn store_heartbeat(
    conn: &mut SqliteConnection,
    terminal_id: i32,
    current_media: Option<&str>,
) -> QueryResult<i64> {
    use crate::schema::terminals::dsl;

    diesel::update(dsl::terminals.filter(dsl::id.eq(terminal_id)))
        .set((
            dsl::last_seen.eq(Some(now())),
            dsl::heartbeat_counter.eq(dsl::heartbeat_counter + 1),
            dsl::current_media.eq(current_media),
        ))
        .returning(dsl::heartbeat_counter)
        .get_result(conn)
}

/// Queues `msg` for one terminal; false when it is not connected.
pub async fn send_to_terminal(state: &AppState, terminal_id: i32, msg: ServerMessage) -> bool {
    let terminals = state.connected_terminals.read().await;
    match terminals.get(&terminal_id) {
        Some(tx) => tx.send(msg).is_ok(),
        None => false,
    }
}

pub async fn broadcast(state: &AppState, msg: ServerMessage) -> usize {
    let terminals = state.connected_terminals.read().await;
    terminals
        .values()
        .filter(|tx| tx.send(msg.clone()).is_ok())
        .count()
}

pub async fn push_settings(state: &AppState, terminal: &Terminal) {
    let delivered = send_to_terminal(
        state,
        terminal.id,
        ServerMessage::TerminalUpdated {
            settings: TerminalSettings::from(terminal),
        },
    )
    .await;

    if !delivered {
        tracing::debug!(
            "Terminal {} is offline, settings will apply on reconnect",
            terminal.name
        );
    }
}

/// Tells every terminal affected by `changes` to re-resolve its playlist.
pub async fn notify_changes(state: &AppState, changes: &ChangeSet) {
    let timestamp = Utc::now().to_rfc3339();

    if changes.everyone {
        let delivered = broadcast(
            state,
            ServerMessage::PlaylistChanged {
                playlist_id: None,
                timestamp,
            },
        )
        .await;
        tracing::info!("Notified {} terminals of a broadcast change", delivered);
        return;
    }

    if changes.playlists.is_empty() && changes.terminals.is_empty() {
        return;
    }

    let affected: Vec<(i32, Option<i32>)> = {
        use crate::schema::terminals::dsl;

        let mut conn = match state.db.get() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Cannot notify terminals, database unavailable: {}", e);
                return;
            }
        };

        match dsl::terminals
            .filter(
                dsl::assigned_playlist_id
                    .eq_any(changes.playlists.clone())
                    .or(dsl::id.eq_any(changes.terminals.clone())),
            )
            .select((dsl::id, dsl::assigned_playlist_id))
            .load(&mut conn)
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("Failed to look up affected terminals: {}", e);
                return;
            }
        }
    };

    let connected = state.connected_terminals.read().await;
    for (terminal_id, playlist_id) in affected {
        if let Some(tx) = connected.get(&terminal_id) {
            let _ = tx.send(ServerMessage::PlaylistChanged {
                playlist_id,
                timestamp: timestamp.clone(),
            });
        }
    }
}

pub type TerminalSender = UnboundedSender<ServerMessage>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_wire_format() {
        let msg = ServerMessage::Command {
            command: TerminalCommand::ReloadPlaylist,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["command"]["action"], "reload_playlist");

        let msg = ServerMessage::TerminalUpdated {
            settings: TerminalSettings {
                power_mode: PowerMode::Auto,
                operating_start: "22:00".to_string(),
                operating_end: "06:00".to_string(),
                operating_days: vec![1, 2, 3, 4, 5],
                assigned_playlist_id: Some(3),
                is_monitoring: true,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "terminal_updated");
        assert_eq!(json["settings"]["power_mode"], "auto");
    }

    #[test]
    fn test_heartbeat_without_media_clears_current_media() {
        use crate::schema::terminals::dsl;
        use crate::services::test_support::insert_terminal;

        let mut conn = crate::db::test_connection();
        let terminal = insert_terminal(&mut conn, "lobby", None);

        assert_eq!(
            store_heartbeat(&mut conn, terminal, Some("https://cdn.example.com/a.mp4")).unwrap(),
            1
        );
        assert_eq!(store_heartbeat(&mut conn, terminal, None).unwrap(), 2);

        let stored: Terminal = dsl::terminals
            .filter(dsl::id.eq(terminal))
            .select(Terminal::as_select())
            .first(&mut conn)
            .unwrap();
        assert_eq!(stored.current_media, None);
        assert_eq!(stored.heartbeat_counter, 2);
        assert!(stored.last_seen.is_some());
    }

    #[test]
    fn test_heartbeat_without_errors_field() {
        let text = r#"{"type":"heartbeat","powered":true,"playlist_id":null,"current_media":null,"cpu_usage_percent":null,"memory_usage_mb":null}"#;
        match serde_json::from_str::<TerminalMessage>(text).unwrap() {
            TerminalMessage::Heartbeat { powered, errors, .. } => {
                assert!(powered);
                assert!(errors.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
