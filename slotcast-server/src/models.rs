use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Slot grid layout
pub const SLOT_COUNT: i32 = 13;
pub const GLOBAL_SLOT_INDEX: i32 = 0;
pub const PARTNER_SLOT_INDEX: i32 = 1;
pub const WILDCARD_SLOT_INDEX: i32 = 7;
/// Order in which the allocator fills local slots.
pub const LOCAL_SLOT_PRIORITY: [i32; 10] = [2, 3, 4, 5, 6, 8, 9, 10, 11, 12];
pub const DEFAULT_SLOT_DURATION_SECS: i32 = 15;
pub const DEFAULT_OPERATING_DAYS: [u8; 5] = [1, 2, 3, 4, 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    Global,
    Partner,
    Local,
    Wildcard,
}

impl SlotType {
    pub fn for_index(slot_index: i32) -> Option<SlotType> {
        match slot_index {
            GLOBAL_SLOT_INDEX => Some(SlotType::Global),
            PARTNER_SLOT_INDEX => Some(SlotType::Partner),
            WILDCARD_SLOT_INDEX => Some(SlotType::Wildcard),
            2..=6 | 8..=12 => Some(SlotType::Local),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotType::Global => "global",
            SlotType::Partner => "partner",
            SlotType::Local => "local",
            SlotType::Wildcard => "wildcard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    On,
    Off,
    Auto,
}

impl PowerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerMode::On => "on",
            PowerMode::Off => "off",
            PowerMode::Auto => "auto",
        }
    }
}

impl FromStr for PowerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(PowerMode::On),
            "off" => Ok(PowerMode::Off),
            "auto" => Ok(PowerMode::Auto),
            other => Err(anyhow::anyhow!("Unknown power mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
            ModerationStatus::Expired => "expired",
        }
    }
}

impl FromStr for ModerationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ModerationStatus::Pending),
            "approved" => Ok(ModerationStatus::Approved),
            "rejected" => Ok(ModerationStatus::Rejected),
            "expired" => Ok(ModerationStatus::Expired),
            other => Err(anyhow::anyhow!("Unknown moderation status: {}", other)),
        }
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

// Terminal models
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::terminals)]
pub struct Terminal {
    pub id: i32,
    pub name: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub group_name: Option<String>,
    pub power_mode: String,
    pub operating_start: String,
    pub operating_end: String,
    pub operating_days: String,
    pub assigned_playlist_id: Option<i32>,
    pub last_seen: Option<NaiveDateTime>,
    pub heartbeat_counter: i64,
    pub is_monitoring: bool,
    pub current_media: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Terminal {
    /// Stored as a JSON array of weekday indices (0 = Sunday).
    pub fn operating_day_indices(&self) -> Vec<u8> {
        serde_json::from_str(&self.operating_days).unwrap_or_else(|_| {
            tracing::warn!(
                "Terminal {} has malformed operating_days '{}', using Mon-Fri",
                self.id,
                self.operating_days
            );
            DEFAULT_OPERATING_DAYS.to_vec()
        })
    }

    pub fn is_online(&self, now: NaiveDateTime, threshold_secs: i64) -> bool {
        is_online(self.last_seen, now, threshold_secs)
    }
}

/// A terminal is live while its last heartbeat is younger than the threshold.
pub fn is_online(last_seen: Option<NaiveDateTime>, now: NaiveDateTime, threshold_secs: i64) -> bool {
    match last_seen {
        Some(seen) => (now - seen).num_seconds() < threshold_secs,
        None => false,
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::terminals)]
pub struct NewTerminal {
    pub name: String,
    pub secret_key: String,
    pub group_name: Option<String>,
    pub power_mode: String,
    pub operating_start: String,
    pub operating_end: String,
    pub operating_days: String,
    pub assigned_playlist_id: Option<i32>,
}

// Playlist models
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::playlists)]
pub struct Playlist {
    pub id: i32,
    pub name: String,
    pub slot_count: i32,
    pub version: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = crate::schema::playlists)]
pub struct NewPlaylist {
    pub name: String,
    pub slot_count: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::playlist_slots)]
pub struct PlaylistSlot {
    pub id: i32,
    pub playlist_id: i32,
    pub slot_index: i32,
    pub slot_type: String,
    pub media_id: Option<i32>,
    pub campaign_id: Option<i32>,
    pub duration_secs: i32,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::playlist_slots)]
pub struct NewPlaylistSlot {
    pub playlist_id: i32,
    pub slot_index: i32,
    pub slot_type: String,
    pub media_id: Option<i32>,
    pub campaign_id: Option<i32>,
    pub duration_secs: i32,
    pub updated_at: NaiveDateTime,
}

// Campaign models
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::campaigns)]
pub struct Campaign {
    pub id: i32,
    pub name: String,
    pub moderation_status: String,
    pub is_global: bool,
    pub is_wildcard: bool,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub target_terminals: String,
    pub v_media_id: Option<i32>,
    pub pending_swap_media_id: Option<i32>,
    pub swap_count: i32,
    pub rejection_reason: Option<String>,
    pub ends_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Campaign {
    pub fn status(&self) -> Option<ModerationStatus> {
        self.moderation_status.parse().ok()
    }

    pub fn is_approved(&self) -> bool {
        self.status() == Some(ModerationStatus::Approved)
    }

    /// Broadcast campaigns go through the propagator instead of the allocator.
    pub fn is_broadcast(&self) -> bool {
        self.is_global || self.is_wildcard
    }

    pub fn target_terminal_ids(&self) -> Vec<i32> {
        serde_json::from_str(&self.target_terminals).unwrap_or_else(|_| {
            tracing::warn!(
                "Campaign {} has malformed target_terminals '{}'",
                self.id,
                self.target_terminals
            );
            Vec::new()
        })
    }

    pub fn targets_terminal(&self, terminal_id: i32) -> bool {
        self.target_terminal_ids().contains(&terminal_id)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::campaigns)]
pub struct NewCampaign {
    pub name: String,
    pub moderation_status: String,
    pub is_global: bool,
    pub is_wildcard: bool,
    pub is_active: bool,
    pub target_terminals: String,
    pub v_media_id: Option<i32>,
    pub ends_at: Option<NaiveDateTime>,
}

// Media models
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::media)]
pub struct Media {
    pub id: i32,
    pub url: String,
    pub media_type: String,
    pub duration_secs: Option<i32>,
    pub created_at: NaiveDateTime,
}

impl Media {
    pub fn slot_duration(&self) -> i32 {
        match self.duration_secs {
            Some(secs) if secs > 0 => secs,
            _ => DEFAULT_SLOT_DURATION_SECS,
        }
    }
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = crate::schema::media)]
pub struct NewMedia {
    pub url: String,
    pub media_type: String,
    pub duration_secs: Option<i32>,
}

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
