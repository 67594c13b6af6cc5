use thiserror::Error;

/// Failures of the allocation, propagation and moderation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Campaign {0} not found")]
    CampaignNotFound(i32),

    #[error("Media {0} not found")]
    MediaNotFound(i32),

    #[error("Campaign {0} has no media attached")]
    CampaignWithoutMedia(i32),

    #[error("Campaign {id} is {status}, expected {expected}")]
    InvalidTransition {
        id: i32,
        status: String,
        expected: &'static str,
    },

    #[error("Slot index {0} is outside the 13-slot grid")]
    InvalidSlotIndex(i32),

    #[error("Campaign {0} has no pending swap")]
    NoPendingSwap(i32),

    #[error("Playlist {playlist_id} changed concurrently (expected version {expected})")]
    VersionConflict { playlist_id: i32, expected: i32 },

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
}
