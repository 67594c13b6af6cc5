use crate::models::{now, NewTerminal, PowerMode, Terminal, DEFAULT_OPERATING_DAYS};
use crate::services::playlist_snapshot::{self, PlaylistSnapshot};
use crate::websocket::{self, ServerMessage, TerminalCommand};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, NaiveTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
pub struct TerminalView {
    #[serde(flatten)]
    pub terminal: Terminal,
    pub online: bool,
    pub operating_weekdays: Vec<u8>,
}

#[derive(Deserialize)]
pub struct CreateTerminalRequest {
    pub name: String,
    pub group_name: Option<String>,
    pub power_mode: Option<PowerMode>,
    pub operating_start: Option<String>,
    pub operating_end: Option<String>,
    pub operating_days: Option<Vec<u8>>,
    pub assigned_playlist_id: Option<i32>,
}

#[derive(Serialize)]
pub struct CreateTerminalResponse {
    pub terminal: Terminal,
    pub secret_key: String,
}

#[derive(Deserialize)]
pub struct UpdateTerminalRequest {
    pub name: Option<String>,
    pub group_name: Option<String>,
    pub power_mode: Option<PowerMode>,
    pub operating_start: Option<String>,
    pub operating_end: Option<String>,
    pub operating_days: Option<Vec<u8>>,
    pub assigned_playlist_id: Option<i32>,
    #[serde(default)]
    pub unassign_playlist: bool,
    pub is_monitoring: Option<bool>,
}

#[derive(AsChangeset)]
#[diesel(table_name = crate::schema::terminals)]
struct TerminalChanges {
    name: Option<String>,
    group_name: Option<Option<String>>,
    power_mode: Option<String>,
    operating_start: Option<String>,
    operating_end: Option<String>,
    operating_days: Option<String>,
    assigned_playlist_id: Option<Option<i32>>,
    is_monitoring: Option<bool>,
    updated_at: NaiveDateTime,
}

fn is_clock_time(value: &str) -> bool {
    NaiveTime::parse_from_str(value, "%H:%M").is_ok()
}

/// Checks HH:MM bounds and weekday indices in 0..=6.
fn validate_schedule(
    start: Option<&str>,
    end: Option<&str>,
    days: Option<&[u8]>,
) -> Result<(), StatusCode> {
    if start.map(|s| !is_clock_time(s)).unwrap_or(false)
        || end.map(|e| !is_clock_time(e)).unwrap_or(false)
    {
        return Err(StatusCode::BAD_REQUEST);
    }
    if days.map(|d| d.iter().any(|day| *day > 6)).unwrap_or(false) {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(())
}

fn encode_days(days: &[u8]) -> Result<String, StatusCode> {
    let mut days = days.to_vec();
    days.sort_unstable();
    days.dedup();
    serde_json::to_string(&days).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn list_terminals(
    State(state): State<AppState>,
) -> Result<Json<Vec<TerminalView>>, StatusCode> {
    use crate::schema::terminals::dsl::*;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let results = terminals
        .order(name.asc())
        .select(Terminal::as_select())
        .load(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let threshold = state.config.liveness.threshold_secs;
    let at = now();
    let views = results
        .into_iter()
        .map(|terminal| TerminalView {
            online: terminal.is_online(at, threshold),
            operating_weekdays: terminal.operating_day_indices(),
            terminal,
        })
        .collect();

    Ok(Json(views))
}

pub async fn create_terminal(
    State(state): State<AppState>,
    Json(req): Json<CreateTerminalRequest>,
) -> Result<Json<CreateTerminalResponse>, StatusCode> {
    use crate::schema::terminals;

    validate_schedule(
        req.operating_start.as_deref(),
        req.operating_end.as_deref(),
        req.operating_days.as_deref(),
    )?;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    // Generate a secret key for the terminal
    let secret_key = Uuid::new_v4().to_string();

    let new_terminal = NewTerminal {
        name: req.name,
        secret_key: secret_key.clone(),
        group_name: req.group_name,
        power_mode: req.power_mode.unwrap_or(PowerMode::Auto).as_str().to_string(),
        operating_start: req.operating_start.unwrap_or_else(|| "08:00".to_string()),
        operating_end: req.operating_end.unwrap_or_else(|| "22:00".to_string()),
        operating_days: encode_days(
            req.operating_days
                .as_deref()
                .unwrap_or(&DEFAULT_OPERATING_DAYS),
        )?,
        assigned_playlist_id: req.assigned_playlist_id,
    };

    let terminal = diesel::insert_into(terminals::table)
        .values(&new_terminal)
        .returning(Terminal::as_select())
        .get_result(&mut conn)
        .map_err(|e| {
            tracing::warn!("Failed to create terminal: {}", e);
            StatusCode::CONFLICT
        })?;

    tracing::info!("Registered terminal {}", terminal.name);
    Ok(Json(CreateTerminalResponse {
        terminal,
        secret_key,
    }))
}

pub async fn update_terminal(
    State(state): State<AppState>,
    Path(terminal_id): Path<i32>,
    Json(req): Json<UpdateTerminalRequest>,
) -> Result<Json<Terminal>, StatusCode> {
    use crate::schema::terminals::dsl::*;

    validate_schedule(
        req.operating_start.as_deref(),
        req.operating_end.as_deref(),
        req.operating_days.as_deref(),
    )?;

    let playlist_change = if req.unassign_playlist {
        Some(None)
    } else {
        req.assigned_playlist_id.map(Some)
    };

    let changes = TerminalChanges {
        name: req.name,
        group_name: req.group_name.map(Some),
        power_mode: req.power_mode.map(|mode| mode.as_str().to_string()),
        operating_start: req.operating_start,
        operating_end: req.operating_end,
        operating_days: req.operating_days.as_deref().map(encode_days).transpose()?,
        assigned_playlist_id: playlist_change,
        is_monitoring: req.is_monitoring,
        updated_at: now(),
    };

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let terminal = diesel::update(terminals.filter(id.eq(terminal_id)))
        .set(&changes)
        .returning(Terminal::as_select())
        .get_result(&mut conn)
        .optional()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    websocket::push_settings(&state, &terminal).await;

    Ok(Json(terminal))
}

pub async fn delete_terminal(
    State(state): State<AppState>,
    Path(terminal_id): Path<i32>,
) -> Result<StatusCode, StatusCode> {
    use crate::schema::terminals::dsl::*;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let deleted = diesel::delete(terminals.filter(id.eq(terminal_id)))
        .execute(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if deleted == 0 {
        return Err(StatusCode::NOT_FOUND);
    }

    websocket::send_to_terminal(
        &state,
        terminal_id,
        ServerMessage::Command {
            command: TerminalCommand::Shutdown,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_command(
    State(state): State<AppState>,
    Path(terminal_id): Path<i32>,
    Json(command): Json<TerminalCommand>,
) -> Result<StatusCode, StatusCode> {
    let delivered =
        websocket::send_to_terminal(&state, terminal_id, ServerMessage::Command { command }).await;

    if delivered {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn get_playlist(
    State(state): State<AppState>,
    Path(terminal_id): Path<i32>,
) -> Result<Json<PlaylistSnapshot>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let snapshot = playlist_snapshot::build_snapshot(&mut conn, terminal_id)
        .map_err(|e| {
            tracing::error!("Failed to build playlist for terminal {}: {}", terminal_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_schedule() {
        assert!(validate_schedule(Some("22:00"), Some("06:00"), Some(&[0, 6])).is_ok());
        assert!(validate_schedule(None, None, None).is_ok());
        assert_eq!(
            validate_schedule(Some("25:00"), None, None),
            Err(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            validate_schedule(None, Some("8am"), None),
            Err(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            validate_schedule(None, None, Some(&[1, 7])),
            Err(StatusCode::BAD_REQUEST)
        );
    }

    #[test]
    fn test_encode_days_sorts_and_dedups() {
        assert_eq!(encode_days(&[5, 1, 1, 3]).unwrap(), "[1,3,5]");
        assert_eq!(encode_days(&[]).unwrap(), "[]");
    }
}
