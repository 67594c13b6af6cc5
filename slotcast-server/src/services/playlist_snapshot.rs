use crate::models::{now, Campaign, Media, ModerationStatus, PlaylistSlot, Terminal};
use anyhow::Result;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::BTreeSet;

/// Everything a terminal needs to resolve its rotation locally.
#[derive(Debug, Serialize)]
pub struct PlaylistSnapshot {
    pub terminal_id: i32,
    pub playlist_id: Option<i32>,
    pub version: Option<i32>,
    pub slots: Vec<SnapshotSlot>,
    pub campaigns: Vec<SnapshotCampaign>,
    pub media: Vec<SnapshotMedia>,
    /// Only filled when no playlist is assigned.
    pub fallback_campaign_ids: Vec<i32>,
    pub generated_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct SnapshotSlot {
    pub slot_index: i32,
    pub slot_type: String,
    pub media_id: Option<i32>,
    pub campaign_id: Option<i32>,
    pub duration_secs: i32,
}

#[derive(Debug, Serialize)]
pub struct SnapshotCampaign {
    pub id: i32,
    pub moderation_status: String,
    pub is_active: bool,
    pub v_media_id: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotMedia {
    pub id: i32,
    pub url: String,
    pub media_type: String,
    pub duration_secs: Option<i32>,
}

impl From<PlaylistSlot> for SnapshotSlot {
    fn from(slot: PlaylistSlot) -> Self {
        Self {
            slot_index: slot.slot_index,
            slot_type: slot.slot_type,
            media_id: slot.media_id,
            campaign_id: slot.campaign_id,
            duration_secs: slot.duration_secs,
        }
    }
}

impl From<Campaign> for SnapshotCampaign {
    fn from(campaign: Campaign) -> Self {
        Self {
            id: campaign.id,
            moderation_status: campaign.moderation_status,
            is_active: campaign.is_active,
            v_media_id: campaign.v_media_id,
        }
    }
}

impl From<Media> for SnapshotMedia {
    fn from(media: Media) -> Self {
        Self {
            id: media.id,
            url: media.url,
            media_type: media.media_type,
            duration_secs: media.duration_secs,
        }
    }
}

pub fn build_snapshot(
    conn: &mut SqliteConnection,
    terminal_id: i32,
) -> Result<Option<PlaylistSnapshot>> {
    use crate::schema::campaigns::dsl as c_dsl;
    use crate::schema::media::dsl as m_dsl;
    use crate::schema::playlist_slots::dsl as s_dsl;
    use crate::schema::playlists::dsl as p_dsl;
    use crate::schema::terminals::dsl as t_dsl;

    let Some(terminal) = t_dsl::terminals
        .filter(t_dsl::id.eq(terminal_id))
        .select(Terminal::as_select())
        .first(conn)
        .optional()?
    else {
        return Ok(None);
    };

    let version = match terminal.assigned_playlist_id {
        Some(pid) => p_dsl::playlists
            .filter(p_dsl::id.eq(pid))
            .select(p_dsl::version)
            .first::<i32>(conn)
            .optional()?,
        None => None,
    };
    // A dangling assignment behaves like no assignment.
    let playlist_id = version.and(terminal.assigned_playlist_id);

    let mut slots = Vec::new();
    let campaigns: Vec<Campaign>;
    let mut fallback_campaign_ids = Vec::new();

    if let Some(pid) = playlist_id {
        slots = s_dsl::playlist_slots
            .filter(s_dsl::playlist_id.eq(pid))
            .order(s_dsl::slot_index.asc())
            .select(PlaylistSlot::as_select())
            .load(conn)?;

        let campaign_ids: BTreeSet<i32> = slots.iter().filter_map(|s| s.campaign_id).collect();
        campaigns = c_dsl::campaigns
            .filter(c_dsl::id.eq_any(campaign_ids.into_iter().collect::<Vec<_>>()))
            .select(Campaign::as_select())
            .load(conn)?;
    } else {
        let candidates: Vec<Campaign> = c_dsl::campaigns
            .filter(c_dsl::is_active.eq(true))
            .filter(c_dsl::moderation_status.eq(ModerationStatus::Approved.as_str()))
            .order(c_dsl::id.asc())
            .select(Campaign::as_select())
            .load(conn)?;

        campaigns = candidates
            .into_iter()
            .filter(|c| c.is_global || c.targets_terminal(terminal.id))
            .collect();
        fallback_campaign_ids = campaigns.iter().map(|c| c.id).collect();
    }

    let media_ids: BTreeSet<i32> = slots
        .iter()
        .filter_map(|s| s.media_id)
        .chain(campaigns.iter().filter_map(|c| c.v_media_id))
        .collect();
    let media: Vec<Media> = m_dsl::media
        .filter(m_dsl::id.eq_any(media_ids.into_iter().collect::<Vec<_>>()))
        .select(Media::as_select())
        .load(conn)?;

    Ok(Some(PlaylistSnapshot {
        terminal_id: terminal.id,
        playlist_id,
        version,
        slots: slots.into_iter().map(Into::into).collect(),
        campaigns: campaigns.into_iter().map(Into::into).collect(),
        media: media.into_iter().map(Into::into).collect(),
        fallback_campaign_ids,
        generated_at: now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::moderation;
    use crate::services::test_support::*;

    #[test]
    fn test_snapshot_for_assigned_playlist() {
        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "p");
        let terminal = insert_terminal(&mut conn, "t1", Some(playlist));
        let media = insert_media(&mut conn, "https://cdn.example.com/a.png", Some(12));
        let campaign = insert_campaign(&mut conn, "c", media, &[terminal], false);
        moderation::approve_campaign(&mut conn, campaign).unwrap();

        let snapshot = build_snapshot(&mut conn, terminal).unwrap().unwrap();

        assert_eq!(snapshot.playlist_id, Some(playlist));
        assert_eq!(snapshot.version, Some(1));
        assert_eq!(snapshot.slots.len(), 1);
        assert_eq!(snapshot.slots[0].campaign_id, Some(campaign));
        assert_eq!(snapshot.campaigns.len(), 1);
        assert_eq!(snapshot.campaigns[0].moderation_status, "approved");
        assert_eq!(snapshot.media.len(), 1);
        assert_eq!(snapshot.media[0].url, "https://cdn.example.com/a.png");
        assert!(snapshot.fallback_campaign_ids.is_empty());
    }

    #[test]
    fn test_fallback_snapshot_filters_campaigns() {
        use crate::schema::campaigns::dsl;

        let mut conn = crate::db::test_connection();
        let terminal = insert_terminal(&mut conn, "loose", None);
        let other = insert_terminal(&mut conn, "other", None);
        let media = insert_media(&mut conn, "https://cdn.example.com/a.png", None);

        let targeted = insert_campaign(&mut conn, "targeted", media, &[terminal], false);
        let global = insert_campaign(&mut conn, "global", media, &[], true);
        let elsewhere = insert_campaign(&mut conn, "elsewhere", media, &[other], false);
        let paused = insert_campaign(&mut conn, "paused", media, &[terminal], false);
        let pending = insert_campaign(&mut conn, "pending", media, &[terminal], false);

        diesel::update(dsl::campaigns.filter(dsl::id.eq_any(vec![targeted, global, elsewhere, paused])))
            .set(dsl::moderation_status.eq("approved"))
            .execute(&mut conn)
            .unwrap();
        diesel::update(dsl::campaigns.filter(dsl::id.eq(paused)))
            .set(dsl::is_active.eq(false))
            .execute(&mut conn)
            .unwrap();

        let snapshot = build_snapshot(&mut conn, terminal).unwrap().unwrap();

        assert_eq!(snapshot.playlist_id, None);
        assert_eq!(snapshot.fallback_campaign_ids, vec![targeted, global]);
        assert!(!snapshot.fallback_campaign_ids.contains(&pending));
        assert_eq!(snapshot.media.len(), 1);
    }

    #[test]
    fn test_unknown_terminal_has_no_snapshot() {
        let mut conn = crate::db::test_connection();
        assert!(build_snapshot(&mut conn, 42).unwrap().is_none());
    }
}
