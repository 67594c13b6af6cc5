use crate::error::EngineError;
use crate::models::{now, NewPlaylistSlot, SlotType};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// Insert or overwrite the slot at `(playlist_id, slot_index)`.
/// Returns the number of rows touched (always 1 on success).
pub fn upsert_slot(
    conn: &mut SqliteConnection,
    target_playlist_id: i32,
    target_index: i32,
    new_media_id: Option<i32>,
    new_campaign_id: Option<i32>,
    new_duration: i32,
) -> Result<usize, EngineError> {
    use crate::schema::playlist_slots::dsl;

    let kind = SlotType::for_index(target_index)
        .ok_or(EngineError::InvalidSlotIndex(target_index))?
        .as_str();
    let timestamp = now();

    let touched = diesel::insert_into(dsl::playlist_slots)
        .values(&NewPlaylistSlot {
            playlist_id: target_playlist_id,
            slot_index: target_index,
            slot_type: kind.to_string(),
            media_id: new_media_id,
            campaign_id: new_campaign_id,
            duration_secs: new_duration,
            updated_at: timestamp,
        })
        .on_conflict((dsl::playlist_id, dsl::slot_index))
        .do_update()
        .set((
            dsl::slot_type.eq(kind),
            dsl::media_id.eq(new_media_id),
            dsl::campaign_id.eq(new_campaign_id),
            dsl::duration_secs.eq(new_duration),
            dsl::updated_at.eq(timestamp),
        ))
        .execute(conn)?;

    Ok(touched)
}

pub fn playlist_version(
    conn: &mut SqliteConnection,
    target_playlist_id: i32,
) -> Result<Option<i32>, EngineError> {
    use crate::schema::playlists::dsl;

    Ok(dsl::playlists
        .filter(dsl::id.eq(target_playlist_id))
        .select(dsl::version)
        .first::<i32>(conn)
        .optional()?)
}

/// Compare-and-bump of the playlist version. Fails when another writer got
/// there first so the caller's transaction rolls back.
pub fn bump_version(
    conn: &mut SqliteConnection,
    target_playlist_id: i32,
    expected: i32,
) -> Result<(), EngineError> {
    use crate::schema::playlists::dsl;

    let updated = diesel::update(
        dsl::playlists
            .filter(dsl::id.eq(target_playlist_id))
            .filter(dsl::version.eq(expected)),
    )
    .set((dsl::version.eq(expected + 1), dsl::updated_at.eq(now())))
    .execute(conn)?;

    if updated == 0 {
        return Err(EngineError::VersionConflict {
            playlist_id: target_playlist_id,
            expected,
        });
    }

    Ok(())
}

/// Empty every slot that points at `target_campaign_id`, keeping the rows.
/// Returns the affected playlist ids.
pub fn clear_campaign_slots(
    conn: &mut SqliteConnection,
    target_campaign_id: i32,
) -> Result<Vec<i32>, EngineError> {
    use crate::schema::playlist_slots::dsl;

    let playlist_ids: Vec<i32> = dsl::playlist_slots
        .filter(dsl::campaign_id.eq(target_campaign_id))
        .select(dsl::playlist_id)
        .distinct()
        .load(conn)?;

    diesel::update(dsl::playlist_slots.filter(dsl::campaign_id.eq(target_campaign_id)))
        .set((
            dsl::media_id.eq(None::<i32>),
            dsl::campaign_id.eq(None::<i32>),
            dsl::updated_at.eq(now()),
        ))
        .execute(conn)?;

    bump_versions(conn, &playlist_ids)?;
    Ok(playlist_ids)
}

/// Unconditional version bump for writes that already hold the write lock.
pub fn bump_versions(conn: &mut SqliteConnection, playlist_ids: &[i32]) -> Result<(), EngineError> {
    use crate::schema::playlists::dsl;

    if playlist_ids.is_empty() {
        return Ok(());
    }

    diesel::update(dsl::playlists.filter(dsl::id.eq_any(playlist_ids)))
        .set((dsl::version.eq(dsl::version + 1), dsl::updated_at.eq(now())))
        .execute(conn)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;

    #[test]
    fn test_upsert_slot_overwrites_in_place() {
        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "Lobby");
        let first = insert_media(&mut conn, "https://cdn.example.com/1.png", Some(10));
        let second = insert_media(&mut conn, "https://cdn.example.com/2.png", Some(20));

        assert_eq!(upsert_slot(&mut conn, playlist, 3, Some(first), None, 10).unwrap(), 1);
        assert_eq!(upsert_slot(&mut conn, playlist, 3, Some(second), None, 20).unwrap(), 1);

        let rows = slots_of(&mut conn, playlist);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].media_id, Some(second));
        assert_eq!(rows[0].duration_secs, 20);
        assert_eq!(rows[0].slot_type, "local");
    }

    #[test]
    fn test_upsert_slot_rejects_out_of_grid_index() {
        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "Lobby");

        let err = upsert_slot(&mut conn, playlist, 13, None, None, 15).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSlotIndex(13)));
    }

    #[test]
    fn test_bump_version_detects_stale_writer() {
        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "Lobby");

        bump_version(&mut conn, playlist, 0).unwrap();
        assert_eq!(playlist_version(&mut conn, playlist).unwrap(), Some(1));

        let err = bump_version(&mut conn, playlist, 0).unwrap_err();
        assert!(matches!(err, EngineError::VersionConflict { expected: 0, .. }));
    }
}
