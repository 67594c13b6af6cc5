//! Broadcasts one media reference into a reserved slot of every playlist.

use crate::error::EngineError;
use crate::models::{Media, GLOBAL_SLOT_INDEX, WILDCARD_SLOT_INDEX};
use crate::services::slot_store;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastChannel {
    Global,
    Wildcard,
}

impl BroadcastChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastChannel::Global => "global",
            BroadcastChannel::Wildcard => "wildcard",
        }
    }

    pub fn slot_index(&self) -> i32 {
        match self {
            BroadcastChannel::Global => GLOBAL_SLOT_INDEX,
            BroadcastChannel::Wildcard => WILDCARD_SLOT_INDEX,
        }
    }
}

pub fn propagate_global(conn: &mut SqliteConnection, media: i32) -> Result<usize, EngineError> {
    propagate(conn, BroadcastChannel::Global, media)
}

pub fn propagate_wildcard(conn: &mut SqliteConnection, media: i32) -> Result<usize, EngineError> {
    propagate(conn, BroadcastChannel::Wildcard, media)
}

/// Upserts the channel's slot on every playlist. The returned count is rows
/// touched, so repeating a call yields the same number.
pub fn propagate(
    conn: &mut SqliteConnection,
    channel: BroadcastChannel,
    media: i32,
) -> Result<usize, EngineError> {
    let updated = conn.immediate_transaction(|conn| fill_channel(conn, channel, media))?;

    tracing::info!(
        "Propagated media {} to {:?} slot {} on {} playlists",
        media,
        channel,
        channel.slot_index(),
        updated
    );

    Ok(updated)
}

/// Same as [`propagate`] for callers already inside a transaction.
pub fn fill_channel(
    conn: &mut SqliteConnection,
    channel: BroadcastChannel,
    media: i32,
) -> Result<usize, EngineError> {
    use crate::schema::playlists::dsl;

    let duration = {
        use crate::schema::media::dsl;

        dsl::media
            .filter(dsl::id.eq(media))
            .select(Media::as_select())
            .first(conn)
            .optional()?
            .ok_or(EngineError::MediaNotFound(media))?
            .slot_duration()
    };

    let playlist_ids: Vec<i32> = dsl::playlists.select(dsl::id).load(conn)?;

    let mut touched = 0;
    for playlist_id in &playlist_ids {
        touched += slot_store::upsert_slot(
            conn,
            *playlist_id,
            channel.slot_index(),
            Some(media),
            None,
            duration,
        )?;
    }

    slot_store::bump_versions(conn, &playlist_ids)?;
    Ok(touched)
}

/// Empties the channel's slot wherever it still holds `media`.
pub fn withdraw(
    conn: &mut SqliteConnection,
    channel: BroadcastChannel,
    media: i32,
) -> Result<Vec<i32>, EngineError> {
    conn.immediate_transaction(|conn| clear_channel_media(conn, channel, media))
}

/// Same as [`withdraw`] for callers already inside a transaction.
pub fn clear_channel_media(
    conn: &mut SqliteConnection,
    channel: BroadcastChannel,
    media: i32,
) -> Result<Vec<i32>, EngineError> {
    use crate::schema::playlist_slots::dsl;

    let playlist_ids: Vec<i32> = dsl::playlist_slots
        .filter(dsl::slot_index.eq(channel.slot_index()))
        .filter(dsl::media_id.eq(media))
        .select(dsl::playlist_id)
        .load(conn)?;

    diesel::update(
        dsl::playlist_slots
            .filter(dsl::slot_index.eq(channel.slot_index()))
            .filter(dsl::media_id.eq(media)),
    )
    .set((
        dsl::media_id.eq(None::<i32>),
        dsl::updated_at.eq(crate::models::now()),
    ))
    .execute(conn)?;

    slot_store::bump_versions(conn, &playlist_ids)?;
    Ok(playlist_ids)
}
