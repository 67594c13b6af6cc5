use crate::api::engine_status;
use crate::models::{NewPlaylist, Playlist, PlaylistSlot, Terminal, SLOT_COUNT};
use crate::services::moderation::ChangeSet;
use crate::services::propagator::{self, BroadcastChannel};
use crate::websocket;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CreatePlaylistRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct BroadcastRequest {
    pub channel: BroadcastChannel,
    pub media_id: i32,
    /// Empties the channel's slot instead of filling it.
    #[serde(default)]
    pub withdraw: bool,
}

#[derive(Serialize)]
pub struct BroadcastResponse {
    pub updated_count: usize,
}

pub async fn list_playlists(
    State(state): State<AppState>,
) -> Result<Json<Vec<Playlist>>, StatusCode> {
    use crate::schema::playlists::dsl::*;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let results = playlists
        .order(id.asc())
        .select(Playlist::as_select())
        .load(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(results))
}

pub async fn create_playlist(
    State(state): State<AppState>,
    Json(req): Json<CreatePlaylistRequest>,
) -> Result<Json<Playlist>, StatusCode> {
    use crate::schema::playlists;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let playlist = diesel::insert_into(playlists::table)
        .values(&NewPlaylist {
            name: req.name,
            slot_count: SLOT_COUNT,
        })
        .returning(Playlist::as_select())
        .get_result(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(playlist))
}

pub async fn get_slots(
    State(state): State<AppState>,
    Path(playlist): Path<i32>,
) -> Result<Json<Vec<PlaylistSlot>>, StatusCode> {
    use crate::schema::playlist_slots::dsl::*;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let results = playlist_slots
        .filter(playlist_id.eq(playlist))
        .order(slot_index.asc())
        .select(PlaylistSlot::as_select())
        .load(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(results))
}

/// Detaches assigned terminals and drops the slots together with the playlist.
pub async fn delete_playlist(
    State(state): State<AppState>,
    Path(playlist): Path<i32>,
) -> Result<StatusCode, StatusCode> {
    use crate::schema::playlist_slots::dsl as s_dsl;
    use crate::schema::playlists::dsl as p_dsl;
    use crate::schema::terminals::dsl as t_dsl;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let detached = conn
        .immediate_transaction(|conn| {
            let detached: Vec<Terminal> =
                diesel::update(t_dsl::terminals.filter(t_dsl::assigned_playlist_id.eq(playlist)))
                    .set(t_dsl::assigned_playlist_id.eq(None::<i32>))
                    .returning(Terminal::as_returning())
                    .get_results(conn)?;

            diesel::delete(s_dsl::playlist_slots.filter(s_dsl::playlist_id.eq(playlist)))
                .execute(conn)?;
            let deleted =
                diesel::delete(p_dsl::playlists.filter(p_dsl::id.eq(playlist))).execute(conn)?;

            if deleted == 0 {
                return Err(diesel::result::Error::NotFound);
            }
            Ok(detached)
        })
        .map_err(|e| match e {
            diesel::result::Error::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

    for terminal in &detached {
        websocket::push_settings(&state, terminal).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Fills (or empties) the global or wildcard slot of every playlist.
pub async fn broadcast_media(
    State(state): State<AppState>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, StatusCode> {
    let updated_count = {
        let mut conn = state
            .db
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if req.withdraw {
            propagator::withdraw(&mut conn, req.channel, req.media_id)
                .map_err(engine_status)?
                .len()
        } else {
            propagator::propagate(&mut conn, req.channel, req.media_id).map_err(engine_status)?
        }
    };

    websocket::notify_changes(
        &state,
        &ChangeSet {
            everyone: true,
            ..Default::default()
        },
    )
    .await;

    Ok(Json(BroadcastResponse { updated_count }))
}
