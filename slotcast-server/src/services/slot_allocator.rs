//! Places a campaign into the first free local slot of each target terminal.
//!
//! Allocation is greedy and per-terminal independent: terminals are walked in
//! the order given, each one gets the lowest free index of
//! [`LOCAL_SLOT_PRIORITY`], and a terminal with no room is reported in
//! `full_terminals` without affecting the others. The slot is chosen from a
//! plain read of the playlist and claimed in a write transaction that
//! compare-and-bumps the version that read saw. When another approval got
//! there first the claim rolls back and the terminal is planned again.

use crate::error::EngineError;
use crate::models::{Media, PlaylistSlot, SlotType, Terminal, LOCAL_SLOT_PRIORITY};
use crate::services::slot_store;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::HashSet;

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub terminal_id: i32,
    pub terminal_name: String,
    pub slot_index: i32,
    pub playlist_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullTerminal {
    pub terminal_id: i32,
    pub terminal_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminalFailure {
    pub terminal_id: i32,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocationReport {
    pub allocations: Vec<Allocation>,
    pub full_terminals: Vec<FullTerminal>,
    /// Terminals without a playlist (or no longer existing). Not a failure.
    pub skipped_terminals: Vec<i32>,
    pub failed_terminals: Vec<TerminalFailure>,
}

impl AllocationReport {
    pub fn touched_playlists(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.allocations.iter().map(|a| a.playlist_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

enum TerminalOutcome {
    Allocated(Allocation),
    Full(FullTerminal),
    Skipped,
}

enum Choice {
    /// A free slot as of playlist `version`.
    Claim { allocation: Allocation, version: i32 },
    Settled(TerminalOutcome),
}

/// First index of the priority order that is not occupied.
pub fn first_free_local_slot(occupied: &HashSet<i32>) -> Option<i32> {
    LOCAL_SLOT_PRIORITY
        .iter()
        .copied()
        .find(|idx| !occupied.contains(idx))
}

pub fn allocate(
    conn: &mut SqliteConnection,
    campaign: i32,
    media: i32,
    terminal_ids: &[i32],
) -> Result<AllocationReport, EngineError> {
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

    let mut report = AllocationReport::default();
    let mut seen = HashSet::new();

    for &terminal_id in terminal_ids {
        if !seen.insert(terminal_id) {
            continue;
        }

        match allocate_with_retry(conn, campaign, media, duration, terminal_id) {
            Ok(TerminalOutcome::Allocated(allocation)) => {
                tracing::info!(
                    "Campaign {} allocated to terminal {} slot {} (playlist {})",
                    campaign,
                    allocation.terminal_name,
                    allocation.slot_index,
                    allocation.playlist_id
                );
                report.allocations.push(allocation);
            }
            Ok(TerminalOutcome::Full(full)) => {
                tracing::warn!(
                    "Terminal {} has no free local slot for campaign {}",
                    full.terminal_name,
                    campaign
                );
                report.full_terminals.push(full);
            }
            Ok(TerminalOutcome::Skipped) => {
                tracing::debug!(
                    "Terminal {} has no playlist, skipping campaign {}",
                    terminal_id,
                    campaign
                );
                report.skipped_terminals.push(terminal_id);
            }
            Err(e) => {
                tracing::error!(
                    "Allocation of campaign {} to terminal {} failed: {}",
                    campaign,
                    terminal_id,
                    e
                );
                report.failed_terminals.push(TerminalFailure {
                    terminal_id,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

fn allocate_with_retry(
    conn: &mut SqliteConnection,
    campaign: i32,
    media: i32,
    duration: i32,
    terminal_id: i32,
) -> Result<TerminalOutcome, EngineError> {
    let mut attempt = 1;
    loop {
        let (allocation, version) = match choose_slot(conn, campaign, terminal_id)? {
            Choice::Claim {
                allocation,
                version,
            } => (allocation, version),
            Choice::Settled(outcome) => return Ok(outcome),
        };

        match claim_slot(conn, campaign, media, duration, &allocation, version) {
            Ok(()) => return Ok(TerminalOutcome::Allocated(allocation)),
            Err(EngineError::VersionConflict { playlist_id, .. }) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    "Playlist {} changed during allocation (attempt {}), retrying",
                    playlist_id,
                    attempt
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reads the terminal's playlist and picks a slot without taking the write
/// lock. The version is read before the slots.
fn choose_slot(
    conn: &mut SqliteConnection,
    campaign: i32,
    terminal_id: i32,
) -> Result<Choice, EngineError> {
    use crate::schema::playlist_slots::dsl as s_dsl;
    use crate::schema::terminals::dsl as t_dsl;

    let terminal = t_dsl::terminals
        .filter(t_dsl::id.eq(terminal_id))
        .select(Terminal::as_select())
        .first(conn)
        .optional()?;

    let Some(terminal) = terminal else {
        return Ok(Choice::Settled(TerminalOutcome::Skipped));
    };
    let Some(playlist_id) = terminal.assigned_playlist_id else {
        return Ok(Choice::Settled(TerminalOutcome::Skipped));
    };
    let Some(version) = slot_store::playlist_version(conn, playlist_id)? else {
        tracing::warn!(
            "Terminal {} points at missing playlist {}",
            terminal.name,
            playlist_id
        );
        return Ok(Choice::Settled(TerminalOutcome::Skipped));
    };

    let local_slots: Vec<PlaylistSlot> = s_dsl::playlist_slots
        .filter(s_dsl::playlist_id.eq(playlist_id))
        .filter(s_dsl::slot_type.eq(SlotType::Local.as_str()))
        .select(PlaylistSlot::as_select())
        .load(conn)?;

    if let Some(existing) = local_slots
        .iter()
        .find(|slot| slot.campaign_id == Some(campaign) && slot.media_id.is_some())
    {
        return Ok(Choice::Settled(TerminalOutcome::Allocated(Allocation {
            terminal_id: terminal.id,
            terminal_name: terminal.name,
            slot_index: existing.slot_index,
            playlist_id,
        })));
    }

    let occupied: HashSet<i32> = local_slots
        .iter()
        .filter(|slot| slot.media_id.is_some())
        .map(|slot| slot.slot_index)
        .collect();

    let Some(slot_index) = first_free_local_slot(&occupied) else {
        return Ok(Choice::Settled(TerminalOutcome::Full(FullTerminal {
            terminal_id: terminal.id,
            terminal_name: terminal.name,
        })));
    };

    Ok(Choice::Claim {
        allocation: Allocation {
            terminal_id: terminal.id,
            terminal_name: terminal.name,
            slot_index,
            playlist_id,
        },
        version,
    })
}

/// Writes the chosen slot; fails with `VersionConflict` and writes nothing
/// when the playlist moved past `version`.
fn claim_slot(
    conn: &mut SqliteConnection,
    campaign: i32,
    media: i32,
    duration: i32,
    allocation: &Allocation,
    version: i32,
) -> Result<(), EngineError> {
    conn.immediate_transaction(|conn| {
        slot_store::upsert_slot(
            conn,
            allocation.playlist_id,
            allocation.slot_index,
            Some(media),
            Some(campaign),
            duration,
        )?;
        slot_store::bump_version(conn, allocation.playlist_id, version)
    })
}
