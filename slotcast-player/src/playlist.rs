//! Turns a server playlist snapshot into the ordered rotation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_ITEM_DURATION_SECS: u64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub terminal_id: i32,
    pub playlist_id: Option<i32>,
    pub version: Option<i32>,
    pub slots: Vec<SnapshotSlot>,
    pub campaigns: Vec<SnapshotCampaign>,
    pub media: Vec<SnapshotMedia>,
    #[serde(default)]
    pub fallback_campaign_ids: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSlot {
    pub slot_index: i32,
    pub slot_type: String,
    pub media_id: Option<i32>,
    pub campaign_id: Option<i32>,
    pub duration_secs: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCampaign {
    pub id: i32,
    pub moderation_status: String,
    pub is_active: bool,
    pub v_media_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMedia {
    pub id: i32,
    pub url: String,
    pub media_type: String,
    pub duration_secs: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn parse(value: &str) -> Self {
        match value {
            "video" => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub id: i32,
    pub url: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistItem {
    /// None for fallback items, which are not slot-backed.
    pub slot_index: Option<i32>,
    pub campaign_id: Option<i32>,
    pub media_id: i32,
    /// None when the snapshot does not carry the media row.
    pub media: Option<MediaRef>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPlaylist {
    pub playlist_id: Option<i32>,
    pub version: Option<i32>,
    pub items: Vec<PlaylistItem>,
}

fn seconds_or_default(secs: Option<i32>) -> Duration {
    match secs {
        Some(s) if s > 0 => Duration::from_secs(s as u64),
        _ => Duration::from_secs(DEFAULT_ITEM_DURATION_SECS),
    }
}

fn is_playable(campaign: &SnapshotCampaign) -> bool {
    campaign.moderation_status == "approved" && campaign.is_active
}

pub fn resolve(snapshot: &PlaylistSnapshot) -> ResolvedPlaylist {
    let media: HashMap<i32, &SnapshotMedia> = snapshot.media.iter().map(|m| (m.id, m)).collect();
    let campaigns: HashMap<i32, &SnapshotCampaign> =
        snapshot.campaigns.iter().map(|c| (c.id, c)).collect();

    let media_ref = |id: i32| {
        media.get(&id).map(|m| MediaRef {
            id: m.id,
            url: m.url.clone(),
            kind: MediaKind::parse(&m.media_type),
        })
    };

    let items = if snapshot.playlist_id.is_some() {
        let mut slots: Vec<&SnapshotSlot> = snapshot.slots.iter().collect();
        slots.sort_by_key(|s| s.slot_index);

        slots
            .into_iter()
            .filter_map(|slot| {
                let media_id = slot.media_id?;
                if let Some(campaign_id) = slot.campaign_id {
                    match campaigns.get(&campaign_id) {
                        Some(c) if is_playable(c) => {}
                        _ => {
                            tracing::debug!(
                                "Dropping slot {} of campaign {}: not approved or paused",
                                slot.slot_index,
                                campaign_id
                            );
                            return None;
                        }
                    }
                }

                Some(PlaylistItem {
                    slot_index: Some(slot.slot_index),
                    campaign_id: slot.campaign_id,
                    media_id,
                    media: media_ref(media_id),
                    duration: seconds_or_default(Some(slot.duration_secs)),
                })
            })
            .collect()
    } else {
        snapshot
            .fallback_campaign_ids
            .iter()
            .filter_map(|id| campaigns.get(id))
            .filter(|c| is_playable(c))
            .filter_map(|c| {
                let media_id = c.v_media_id?;
                Some(PlaylistItem {
                    slot_index: None,
                    campaign_id: Some(c.id),
                    media_id,
                    media: media_ref(media_id),
                    duration: seconds_or_default(
                        media.get(&media_id).and_then(|m| m.duration_secs),
                    ),
                })
            })
            .collect()
    };

    ResolvedPlaylist {
        playlist_id: snapshot.playlist_id,
        version: snapshot.version,
        items,
    }
}
