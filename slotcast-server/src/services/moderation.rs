//! Campaign lifecycle triggers: approval, rejection, resubmission, media swap,
//! expiry and deletion. Approval is the only path into the allocator and the
//! propagator and fires at most once per submission.

use crate::error::EngineError;
use crate::models::{now, Campaign, Media, ModerationStatus};
use crate::services::propagator::{self, BroadcastChannel};
use crate::services::slot_allocator::{self, AllocationReport};
use crate::services::slot_store;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;

/// What terminals need to hear about after a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub playlists: Vec<i32>,
    pub terminals: Vec<i32>,
    /// Broadcast slots or fallback-visible campaigns changed: tell everyone.
    pub everyone: bool,
}

impl ChangeSet {
    pub fn for_campaign(campaign: &Campaign, mut playlists: Vec<i32>) -> Self {
        playlists.sort_unstable();
        playlists.dedup();
        Self {
            playlists,
            terminals: campaign.target_terminal_ids(),
            everyone: campaign.is_broadcast(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "placement", rename_all = "snake_case")]
pub enum Placement {
    Allocated(AllocationReport),
    Propagated {
        channel: &'static str,
        updated_count: usize,
    },
}

#[derive(Debug, Serialize)]
pub struct ApprovalResult {
    pub campaign_id: i32,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(skip)]
    pub changes: ChangeSet,
}

pub fn load_campaign(conn: &mut SqliteConnection, campaign_id: i32) -> Result<Campaign, EngineError> {
    use crate::schema::campaigns::dsl;

    dsl::campaigns
        .filter(dsl::id.eq(campaign_id))
        .select(Campaign::as_select())
        .first(conn)
        .optional()?
        .ok_or(EngineError::CampaignNotFound(campaign_id))
}

pub fn load_media(conn: &mut SqliteConnection, media_id: i32) -> Result<Media, EngineError> {
    use crate::schema::media::dsl;

    dsl::media
        .filter(dsl::id.eq(media_id))
        .select(Media::as_select())
        .first(conn)
        .optional()?
        .ok_or(EngineError::MediaNotFound(media_id))
}

/// Moves `campaign_id` from one of `from` to `to`; the conditional update is
/// what makes each transition fire once.
fn transition(
    conn: &mut SqliteConnection,
    campaign: &Campaign,
    from: &[ModerationStatus],
    to: ModerationStatus,
    expected: &'static str,
    reason: Option<String>,
) -> Result<(), EngineError> {
    use crate::schema::campaigns::dsl;

    let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let updated = diesel::update(
        dsl::campaigns
            .filter(dsl::id.eq(campaign.id))
            .filter(dsl::moderation_status.eq_any(from)),
    )
    .set((
        dsl::moderation_status.eq(to.as_str()),
        dsl::rejection_reason.eq(reason),
        dsl::updated_at.eq(now()),
    ))
    .execute(conn)?;

    if updated == 0 {
        return Err(EngineError::InvalidTransition {
            id: campaign.id,
            status: campaign.moderation_status.clone(),
            expected,
        });
    }

    tracing::info!(
        "Campaign {} moved from {} to {}",
        campaign.id,
        campaign.moderation_status,
        to
    );
    Ok(())
}

pub fn approve_campaign(
    conn: &mut SqliteConnection,
    campaign_id: i32,
) -> Result<ApprovalResult, EngineError> {
    let campaign = load_campaign(conn, campaign_id)?;
    let media_id = campaign
        .v_media_id
        .ok_or(EngineError::CampaignWithoutMedia(campaign_id))?;
    load_media(conn, media_id)?;

    transition(
        conn,
        &campaign,
        &[ModerationStatus::Pending],
        ModerationStatus::Approved,
        "pending",
        None,
    )?;

    let (placement, playlists) = match place(conn, &campaign, media_id) {
        Ok(placed) => placed,
        Err(e) => {
            tracing::error!(
                "Placement of campaign {} failed, returning it to pending: {}",
                campaign_id,
                e
            );
            if let Err(undo) = undo_approval(conn, &campaign) {
                tracing::error!(
                    "Failed to return campaign {} to pending: {}",
                    campaign_id,
                    undo
                );
            }
            return Err(e);
        }
    };

    Ok(ApprovalResult {
        campaign_id,
        placement,
        changes: ChangeSet::for_campaign(&campaign, playlists),
    })
}

fn place(
    conn: &mut SqliteConnection,
    campaign: &Campaign,
    media_id: i32,
) -> Result<(Placement, Vec<i32>), EngineError> {
    if let (Some(channel), false) = (placement_channel(campaign), campaign.is_active) {
        tracing::info!(
            "Campaign {} is paused, {:?} slot is filled on resume",
            campaign.id,
            channel
        );
        return Ok((
            Placement::Propagated {
                channel: channel.as_str(),
                updated_count: 0,
            },
            Vec::new(),
        ));
    }

    if campaign.is_global {
        let updated_count = propagator::propagate_global(conn, media_id)?;
        Ok((
            Placement::Propagated {
                channel: "global",
                updated_count,
            },
            Vec::new(),
        ))
    } else if campaign.is_wildcard {
        let updated_count = propagator::propagate_wildcard(conn, media_id)?;
        Ok((
            Placement::Propagated {
                channel: "wildcard",
                updated_count,
            },
            Vec::new(),
        ))
    } else {
        let report = slot_allocator::allocate(
            conn,
            campaign.id,
            media_id,
            &campaign.target_terminal_ids(),
        )?;
        let playlists = report.touched_playlists();
        Ok((Placement::Allocated(report), playlists))
    }
}

/// Gives back whatever a failed placement managed to write and reopens the
/// pending cycle so the approval can be retried.
fn undo_approval(conn: &mut SqliteConnection, campaign: &Campaign) -> Result<(), EngineError> {
    use crate::schema::campaigns::dsl;

    conn.immediate_transaction(|conn| {
        release_placements(conn, campaign)?;
        diesel::update(
            dsl::campaigns
                .filter(dsl::id.eq(campaign.id))
                .filter(dsl::moderation_status.eq(ModerationStatus::Approved.as_str())),
        )
        .set((
            dsl::moderation_status.eq(ModerationStatus::Pending.as_str()),
            dsl::updated_at.eq(now()),
        ))
        .execute(conn)?;
        Ok(())
    })
}

/// Rejection is allowed before and after approval; an approved campaign
/// gives its slots back.
pub fn reject_campaign(
    conn: &mut SqliteConnection,
    campaign_id: i32,
    reason: Option<String>,
) -> Result<ChangeSet, EngineError> {
    let campaign = load_campaign(conn, campaign_id)?;

    let playlists = conn.immediate_transaction(|conn| {
        transition(
            conn,
            &campaign,
            &[ModerationStatus::Pending, ModerationStatus::Approved],
            ModerationStatus::Rejected,
            "pending or approved",
            reason,
        )?;
        if campaign.is_approved() {
            release_placements(conn, &campaign)
        } else {
            Ok(Vec::new())
        }
    })?;

    Ok(ChangeSet::for_campaign(&campaign, playlists))
}

/// Pausing takes an approved broadcast campaign off its reserved slot and
/// resuming puts it back. Local slots stay allocated; the player skips
/// inactive campaigns.
pub fn set_active(
    conn: &mut SqliteConnection,
    campaign_id: i32,
    active: bool,
) -> Result<(Campaign, ChangeSet), EngineError> {
    use crate::schema::campaigns::dsl as c_dsl;
    use crate::schema::playlist_slots::dsl as s_dsl;

    let (campaign, playlists) = conn.immediate_transaction(|conn| {
        let campaign = diesel::update(c_dsl::campaigns.filter(c_dsl::id.eq(campaign_id)))
            .set((c_dsl::is_active.eq(active), c_dsl::updated_at.eq(now())))
            .returning(Campaign::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or(EngineError::CampaignNotFound(campaign_id))?;

        let mut playlists: Vec<i32> = s_dsl::playlist_slots
            .filter(s_dsl::campaign_id.eq(campaign_id))
            .select(s_dsl::playlist_id)
            .load(conn)?;

        if let (true, Some(channel), Some(media_id)) = (
            campaign.is_approved(),
            placement_channel(&campaign),
            campaign.v_media_id,
        ) {
            if active {
                propagator::fill_channel(conn, channel, media_id)?;
            } else {
                playlists.extend(propagator::clear_channel_media(conn, channel, media_id)?);
            }
        }

        Ok::<_, EngineError>((campaign, playlists))
    })?;

    tracing::info!(
        "Campaign {} {}",
        campaign_id,
        if active { "resumed" } else { "paused" }
    );
    let changes = ChangeSet::for_campaign(&campaign, playlists);
    Ok((campaign, changes))
}

/// Opens a new pending cycle after rejection or expiry.
pub fn resubmit_campaign(conn: &mut SqliteConnection, campaign_id: i32) -> Result<(), EngineError> {
    let campaign = load_campaign(conn, campaign_id)?;
    transition(
        conn,
        &campaign,
        &[ModerationStatus::Rejected, ModerationStatus::Expired],
        ModerationStatus::Pending,
        "rejected or expired",
        None,
    )
}

pub fn request_swap(
    conn: &mut SqliteConnection,
    campaign_id: i32,
    new_media_id: i32,
) -> Result<Campaign, EngineError> {
    use crate::schema::campaigns::dsl;

    load_campaign(conn, campaign_id)?;
    load_media(conn, new_media_id)?;

    let campaign = diesel::update(dsl::campaigns.filter(dsl::id.eq(campaign_id)))
        .set((
            dsl::pending_swap_media_id.eq(Some(new_media_id)),
            dsl::updated_at.eq(now()),
        ))
        .returning(Campaign::as_returning())
        .get_result(conn)?;

    tracing::info!(
        "Campaign {} requested swap to media {}",
        campaign_id,
        new_media_id
    );
    Ok(campaign)
}

/// Replaces the media on every slot the campaign already holds. Positions are
/// kept; the allocator is not involved.
pub fn approve_swap(conn: &mut SqliteConnection, campaign_id: i32) -> Result<ChangeSet, EngineError> {
    let campaign = load_campaign(conn, campaign_id)?;
    let new_media_id = campaign
        .pending_swap_media_id
        .ok_or(EngineError::NoPendingSwap(campaign_id))?;
    let new_media = load_media(conn, new_media_id)?;

    let playlists = conn.immediate_transaction(|conn| {
        use crate::schema::campaigns::dsl as c_dsl;
        use crate::schema::playlist_slots::dsl as s_dsl;

        let mut playlists: Vec<i32> = s_dsl::playlist_slots
            .filter(s_dsl::campaign_id.eq(campaign.id))
            .select(s_dsl::playlist_id)
            .load(conn)?;

        diesel::update(s_dsl::playlist_slots.filter(s_dsl::campaign_id.eq(campaign.id)))
            .set((
                s_dsl::media_id.eq(Some(new_media.id)),
                s_dsl::duration_secs.eq(new_media.slot_duration()),
                s_dsl::updated_at.eq(now()),
            ))
            .execute(conn)?;

        if let Some(old_media_id) = campaign.v_media_id {
            for channel in broadcast_channels(&campaign) {
                let broadcast_filter = s_dsl::playlist_slots
                    .filter(s_dsl::slot_index.eq(channel.slot_index()))
                    .filter(s_dsl::media_id.eq(old_media_id));

                playlists.extend(
                    broadcast_filter
                        .clone()
                        .select(s_dsl::playlist_id)
                        .load::<i32>(conn)?,
                );

                diesel::update(broadcast_filter)
                    .set((
                        s_dsl::media_id.eq(Some(new_media.id)),
                        s_dsl::duration_secs.eq(new_media.slot_duration()),
                        s_dsl::updated_at.eq(now()),
                    ))
                    .execute(conn)?;
            }
        }

        diesel::update(c_dsl::campaigns.filter(c_dsl::id.eq(campaign.id)))
            .set((
                c_dsl::v_media_id.eq(Some(new_media.id)),
                c_dsl::pending_swap_media_id.eq(None::<i32>),
                c_dsl::swap_count.eq(c_dsl::swap_count + 1),
                c_dsl::updated_at.eq(now()),
            ))
            .execute(conn)?;

        playlists.sort_unstable();
        playlists.dedup();
        slot_store::bump_versions(conn, &playlists)?;
        Ok::<_, EngineError>(playlists)
    })?;

    tracing::info!(
        "Campaign {} swapped to media {} on {} playlists",
        campaign.id,
        new_media_id,
        playlists.len()
    );
    Ok(ChangeSet::for_campaign(&campaign, playlists))
}

/// Clears every slot referencing the campaign before the row goes away.
pub fn delete_campaign(conn: &mut SqliteConnection, campaign_id: i32) -> Result<ChangeSet, EngineError> {
    use crate::schema::campaigns::dsl;

    let campaign = load_campaign(conn, campaign_id)?;

    let playlists = conn.immediate_transaction(|conn| {
        let playlists = release_placements(conn, &campaign)?;
        diesel::delete(dsl::campaigns.filter(dsl::id.eq(campaign_id))).execute(conn)?;
        Ok::<_, EngineError>(playlists)
    })?;

    tracing::info!(
        "Deleted campaign {} and cleared {} playlists",
        campaign_id,
        playlists.len()
    );
    Ok(ChangeSet::for_campaign(&campaign, playlists))
}

/// Marks approved campaigns past `ends_at` as expired and frees their slots.
pub fn expire_due(conn: &mut SqliteConnection, at: NaiveDateTime) -> Result<ChangeSet, EngineError> {
    use crate::schema::campaigns::dsl;

    let due: Vec<Campaign> = dsl::campaigns
        .filter(dsl::moderation_status.eq(ModerationStatus::Approved.as_str()))
        .filter(dsl::ends_at.le(at))
        .select(Campaign::as_select())
        .load(conn)?;

    let mut changes = ChangeSet::default();
    for campaign in due {
        let playlists = conn.immediate_transaction(|conn| {
            transition(
                conn,
                &campaign,
                &[ModerationStatus::Approved],
                ModerationStatus::Expired,
                "approved",
                None,
            )?;
            release_placements(conn, &campaign)
        })?;

        let effect = ChangeSet::for_campaign(&campaign, playlists);
        changes.playlists.extend(effect.playlists);
        changes.terminals.extend(effect.terminals);
        changes.everyone |= effect.everyone;
    }

    changes.playlists.sort_unstable();
    changes.playlists.dedup();
    changes.terminals.sort_unstable();
    changes.terminals.dedup();
    Ok(changes)
}

/// The reserved slot approval writes to; global wins when both flags are set.
fn placement_channel(campaign: &Campaign) -> Option<BroadcastChannel> {
    if campaign.is_global {
        Some(BroadcastChannel::Global)
    } else if campaign.is_wildcard {
        Some(BroadcastChannel::Wildcard)
    } else {
        None
    }
}

fn broadcast_channels(campaign: &Campaign) -> Vec<BroadcastChannel> {
    let mut channels = Vec::new();
    if campaign.is_global {
        channels.push(BroadcastChannel::Global);
    }
    if campaign.is_wildcard {
        channels.push(BroadcastChannel::Wildcard);
    }
    channels
}

fn release_placements(
    conn: &mut SqliteConnection,
    campaign: &Campaign,
) -> Result<Vec<i32>, EngineError> {
    let mut playlists = slot_store::clear_campaign_slots(conn, campaign.id)?;

    if let Some(media_id) = campaign.v_media_id {
        for channel in broadcast_channels(campaign) {
            playlists.extend(propagator::clear_channel_media(conn, channel, media_id)?);
        }
    }

    Ok(playlists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{
        insert_campaign, insert_media, insert_playlist, insert_terminal, occupy, slots_of,
    };
    use chrono::Duration;

    #[test]
    fn test_approval_allocates_once() {
        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "p");
        let terminal = insert_terminal(&mut conn, "t1", Some(playlist));
        let media = insert_media(&mut conn, "https://cdn.example.com/a.png", None);
        let campaign = insert_campaign(&mut conn, "c", media, &[terminal], false);

        let result = approve_campaign(&mut conn, campaign).unwrap();
        match &result.placement {
            Placement::Allocated(report) => {
                assert_eq!(report.allocations.len(), 1);
                assert_eq!(report.allocations[0].slot_index, 2);
            }
            other => panic!("unexpected placement {:?}", other),
        }
        assert_eq!(result.changes.playlists, vec![playlist]);
        assert!(!result.changes.everyone);

        let again = approve_campaign(&mut conn, campaign).unwrap_err();
        assert!(matches!(again, EngineError::InvalidTransition { .. }));
        assert_eq!(load_campaign(&mut conn, campaign).unwrap().moderation_status, "approved");
    }

    #[test]
    fn test_global_approval_propagates() {
        let mut conn = crate::db::test_connection();
        let a = insert_playlist(&mut conn, "a");
        insert_playlist(&mut conn, "b");
        let media = insert_media(&mut conn, "https://cdn.example.com/g.png", None);
        let campaign = insert_campaign(&mut conn, "g", media, &[], true);

        let result = approve_campaign(&mut conn, campaign).unwrap();

        assert!(matches!(
            result.placement,
            Placement::Propagated {
                channel: "global",
                updated_count: 2
            }
        ));
        assert!(result.changes.everyone);
        assert_eq!(slots_of(&mut conn, a)[0].media_id, Some(media));
    }

    #[test]
    fn test_missing_media_leaves_campaign_pending() {
        let mut conn = crate::db::test_connection();
        let media = insert_media(&mut conn, "https://cdn.example.com/a.png", None);
        let campaign = insert_campaign(&mut conn, "c", media, &[], false);
        {
            use crate::schema::media::dsl;
            diesel::delete(dsl::media.filter(dsl::id.eq(media)))
                .execute(&mut conn)
                .unwrap();
        }

        let err = approve_campaign(&mut conn, campaign).unwrap_err();
        assert!(matches!(err, EngineError::MediaNotFound(_)));
        assert_eq!(load_campaign(&mut conn, campaign).unwrap().moderation_status, "pending");
    }

    #[test]
    fn test_failed_propagation_returns_campaign_to_pending() {
        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "a");
        let media = insert_media(&mut conn, "https://cdn.example.com/g.png", None);
        let campaign = insert_campaign(&mut conn, "g", media, &[], true);

        diesel::sql_query(
            "CREATE TRIGGER block_slot_inserts BEFORE INSERT ON playlist_slots \
             BEGIN SELECT RAISE(ABORT, 'slot writes blocked'); END",
        )
        .execute(&mut conn)
        .unwrap();

        let err = approve_campaign(&mut conn, campaign).unwrap_err();
        assert!(matches!(err, EngineError::Database(_)));
        assert_eq!(load_campaign(&mut conn, campaign).unwrap().moderation_status, "pending");
        assert!(slots_of(&mut conn, playlist).is_empty());

        diesel::sql_query("DROP TRIGGER block_slot_inserts")
            .execute(&mut conn)
            .unwrap();

        let result = approve_campaign(&mut conn, campaign).unwrap();
        assert!(matches!(
            result.placement,
            Placement::Propagated {
                channel: "global",
                updated_count: 1
            }
        ));
        assert_eq!(slots_of(&mut conn, playlist)[0].media_id, Some(media));
        assert_eq!(load_campaign(&mut conn, campaign).unwrap().moderation_status, "approved");
    }

    #[test]
    fn test_pausing_global_campaign_clears_and_resume_restores_slot() {
        let mut conn = crate::db::test_connection();
        let a = insert_playlist(&mut conn, "a");
        let b = insert_playlist(&mut conn, "b");
        let media = insert_media(&mut conn, "https://cdn.example.com/g.png", None);
        let campaign = insert_campaign(&mut conn, "g", media, &[], true);
        approve_campaign(&mut conn, campaign).unwrap();

        let (paused, changes) = set_active(&mut conn, campaign, false).unwrap();
        assert!(!paused.is_active);
        assert!(changes.everyone);
        assert_eq!(changes.playlists, vec![a, b]);
        assert_eq!(slots_of(&mut conn, a)[0].media_id, None);
        assert_eq!(slots_of(&mut conn, b)[0].media_id, None);

        let (resumed, _) = set_active(&mut conn, campaign, true).unwrap();
        assert!(resumed.is_active);
        assert_eq!(slots_of(&mut conn, a)[0].media_id, Some(media));
        assert_eq!(slots_of(&mut conn, b)[0].media_id, Some(media));
    }

    #[test]
    fn test_paused_global_campaign_approval_waits_for_resume() {
        let mut conn = crate::db::test_connection();
        let a = insert_playlist(&mut conn, "a");
        let media = insert_media(&mut conn, "https://cdn.example.com/g.png", None);
        let campaign = insert_campaign(&mut conn, "g", media, &[], true);
        set_active(&mut conn, campaign, false).unwrap();

        let result = approve_campaign(&mut conn, campaign).unwrap();
        assert!(matches!(
            result.placement,
            Placement::Propagated {
                channel: "global",
                updated_count: 0
            }
        ));
        assert!(slots_of(&mut conn, a).is_empty());

        set_active(&mut conn, campaign, true).unwrap();
        assert_eq!(slots_of(&mut conn, a)[0].media_id, Some(media));
    }

    #[test]
    fn test_set_active_unknown_campaign() {
        let mut conn = crate::db::test_connection();
        let err = set_active(&mut conn, 404, false).unwrap_err();
        assert!(matches!(err, EngineError::CampaignNotFound(404)));
    }

    #[test]
    fn test_swap_preserves_slot_position() {
        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "p");
        occupy(&mut conn, playlist, &[2, 3, 4]);
        let terminal = insert_terminal(&mut conn, "t1", Some(playlist));
        let media = insert_media(&mut conn, "https://cdn.example.com/a.png", Some(10));
        let replacement = insert_media(&mut conn, "https://cdn.example.com/b.mp4", Some(25));
        let campaign = insert_campaign(&mut conn, "c", media, &[terminal], false);
        approve_campaign(&mut conn, campaign).unwrap();

        assert!(matches!(
            approve_swap(&mut conn, campaign).unwrap_err(),
            EngineError::NoPendingSwap(_)
        ));

        request_swap(&mut conn, campaign, replacement).unwrap();
        let changes = approve_swap(&mut conn, campaign).unwrap();

        assert_eq!(changes.playlists, vec![playlist]);
        let slot = slots_of(&mut conn, playlist)
            .into_iter()
            .find(|s| s.campaign_id == Some(campaign))
            .unwrap();
        assert_eq!(slot.slot_index, 5);
        assert_eq!(slot.media_id, Some(replacement));
        assert_eq!(slot.duration_secs, 25);

        let updated = load_campaign(&mut conn, campaign).unwrap();
        assert_eq!(updated.v_media_id, Some(replacement));
        assert_eq!(updated.pending_swap_media_id, None);
        assert_eq!(updated.swap_count, 1);
    }

    #[test]
    fn test_delete_clears_referencing_slots() {
        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "p");
        let terminal = insert_terminal(&mut conn, "t1", Some(playlist));
        let media = insert_media(&mut conn, "https://cdn.example.com/a.png", None);
        let campaign = insert_campaign(&mut conn, "c", media, &[terminal], false);
        approve_campaign(&mut conn, campaign).unwrap();

        let changes = delete_campaign(&mut conn, campaign).unwrap();

        assert_eq!(changes.playlists, vec![playlist]);
        let slots = slots_of(&mut conn, playlist);
        assert!(slots.iter().all(|s| s.campaign_id.is_none() && s.media_id.is_none()));
        assert!(matches!(
            load_campaign(&mut conn, campaign).unwrap_err(),
            EngineError::CampaignNotFound(_)
        ));
    }

    #[test]
    fn test_rejection_after_approval_frees_slot_and_allows_resubmit() {
        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "p");
        let terminal = insert_terminal(&mut conn, "t1", Some(playlist));
        let media = insert_media(&mut conn, "https://cdn.example.com/a.png", None);
        let campaign = insert_campaign(&mut conn, "c", media, &[terminal], false);
        approve_campaign(&mut conn, campaign).unwrap();

        reject_campaign(&mut conn, campaign, Some("policy".to_string())).unwrap();
        let rejected = load_campaign(&mut conn, campaign).unwrap();
        assert_eq!(rejected.moderation_status, "rejected");
        assert_eq!(rejected.rejection_reason.as_deref(), Some("policy"));
        assert!(slots_of(&mut conn, playlist)
            .iter()
            .all(|s| s.media_id.is_none()));

        resubmit_campaign(&mut conn, campaign).unwrap();
        assert_eq!(load_campaign(&mut conn, campaign).unwrap().moderation_status, "pending");
        assert_eq!(load_campaign(&mut conn, campaign).unwrap().rejection_reason, None);
    }

    #[test]
    fn test_expire_due_only_touches_past_campaigns() {
        use crate::schema::campaigns::dsl;

        let mut conn = crate::db::test_connection();
        let playlist = insert_playlist(&mut conn, "p");
        let terminal = insert_terminal(&mut conn, "t1", Some(playlist));
        let media = insert_media(&mut conn, "https://cdn.example.com/a.png", None);
        let past = insert_campaign(&mut conn, "past", media, &[terminal], false);
        let future = insert_campaign(&mut conn, "future", media, &[terminal], false);
        approve_campaign(&mut conn, past).unwrap();
        approve_campaign(&mut conn, future).unwrap();

        let at = now();
        diesel::update(dsl::campaigns.filter(dsl::id.eq(past)))
            .set(dsl::ends_at.eq(Some(at - Duration::minutes(5))))
            .execute(&mut conn)
            .unwrap();
        diesel::update(dsl::campaigns.filter(dsl::id.eq(future)))
            .set(dsl::ends_at.eq(Some(at + Duration::days(1))))
            .execute(&mut conn)
            .unwrap();

        let changes = expire_due(&mut conn, at).unwrap();

        assert_eq!(changes.playlists, vec![playlist]);
        assert_eq!(changes.terminals, vec![terminal]);
        assert_eq!(load_campaign(&mut conn, past).unwrap().moderation_status, "expired");
        assert_eq!(load_campaign(&mut conn, future).unwrap().moderation_status, "approved");
        let remaining: Vec<_> = slots_of(&mut conn, playlist)
            .into_iter()
            .filter(|s| s.media_id.is_some())
            .collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].campaign_id, Some(future));
    }
}
