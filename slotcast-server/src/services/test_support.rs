//! Fixtures shared by the engine tests.

use crate::models::{
    Campaign, NewCampaign, NewMedia, NewPlaylist, NewTerminal, PlaylistSlot, SLOT_COUNT,
};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

pub fn insert_media(conn: &mut SqliteConnection, url: &str, duration: Option<i32>) -> i32 {
    use crate::schema::media::dsl;

    diesel::insert_into(dsl::media)
        .values(&NewMedia {
            url: url.to_string(),
            media_type: "image".to_string(),
            duration_secs: duration,
        })
        .returning(dsl::id)
        .get_result(conn)
        .unwrap()
}

pub fn insert_playlist(conn: &mut SqliteConnection, name: &str) -> i32 {
    use crate::schema::playlists::dsl;

    diesel::insert_into(dsl::playlists)
        .values(&NewPlaylist {
            name: name.to_string(),
            slot_count: SLOT_COUNT,
        })
        .returning(dsl::id)
        .get_result(conn)
        .unwrap()
}

pub fn insert_terminal(conn: &mut SqliteConnection, name: &str, playlist: Option<i32>) -> i32 {
    use crate::schema::terminals::dsl;

    diesel::insert_into(dsl::terminals)
        .values(&NewTerminal {
            name: name.to_string(),
            secret_key: format!("{}-secret", name),
            group_name: None,
            power_mode: "auto".to_string(),
            operating_start: "08:00".to_string(),
            operating_end: "18:00".to_string(),
            operating_days: "[1,2,3,4,5]".to_string(),
            assigned_playlist_id: playlist,
        })
        .returning(dsl::id)
        .get_result(conn)
        .unwrap()
}

pub fn insert_campaign(
    conn: &mut SqliteConnection,
    name: &str,
    media: i32,
    targets: &[i32],
    is_global: bool,
) -> i32 {
    use crate::schema::campaigns::dsl;

    diesel::insert_into(dsl::campaigns)
        .values(&NewCampaign {
            name: name.to_string(),
            moderation_status: "pending".to_string(),
            is_global,
            is_wildcard: false,
            is_active: true,
            target_terminals: serde_json::to_string(targets).unwrap(),
            v_media_id: Some(media),
            ends_at: None,
        })
        .returning(dsl::id)
        .get_result(conn)
        .unwrap()
}

pub fn load_campaign(conn: &mut SqliteConnection, campaign: i32) -> Campaign {
    use crate::schema::campaigns::dsl;

    dsl::campaigns
        .filter(dsl::id.eq(campaign))
        .select(Campaign::as_select())
        .first(conn)
        .unwrap()
}

pub fn slots_of(conn: &mut SqliteConnection, playlist: i32) -> Vec<PlaylistSlot> {
    use crate::schema::playlist_slots::dsl;

    dsl::playlist_slots
        .filter(dsl::playlist_id.eq(playlist))
        .order(dsl::slot_index.asc())
        .select(PlaylistSlot::as_select())
        .load(conn)
        .unwrap()
}

/// Fill the given local indices with placeholder media.
pub fn occupy(conn: &mut SqliteConnection, playlist: i32, indices: &[i32]) {
    let filler = insert_media(conn, "https://cdn.example.com/filler.png", None);
    for idx in indices {
        crate::services::slot_store::upsert_slot(conn, playlist, *idx, Some(filler), None, 15)
            .unwrap();
    }
}
