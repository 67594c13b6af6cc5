pub mod campaigns_api;
pub mod media_api;
pub mod playlists_api;
pub mod terminals_api;

use crate::error::EngineError;
use crate::AppState;
use axum::{
    http::StatusCode,
    routing::{delete, get, post, put},
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        // Terminals
        .route("/terminals", get(terminals_api::list_terminals))
        .route("/terminals", post(terminals_api::create_terminal))
        .route(
            "/terminals/:id",
            delete(terminals_api::delete_terminal).put(terminals_api::update_terminal),
        )
        .route("/terminals/:id/command", post(terminals_api::send_command))
        .route("/terminals/:id/playlist", get(terminals_api::get_playlist))
        // Playlists
        .route("/playlists", get(playlists_api::list_playlists))
        .route("/playlists", post(playlists_api::create_playlist))
        .route("/playlists/:id", delete(playlists_api::delete_playlist))
        .route("/playlists/:id/slots", get(playlists_api::get_slots))
        .route("/playlists/broadcast", post(playlists_api::broadcast_media))
        // Media
        .route("/media", get(media_api::list_media))
        .route("/media", post(media_api::create_media))
        .route("/media/:id", delete(media_api::delete_media))
        // Campaigns
        .route("/campaigns", get(campaigns_api::list_campaigns))
        .route("/campaigns", post(campaigns_api::create_campaign))
        .route("/campaigns/:id", delete(campaigns_api::delete_campaign))
        .route("/campaigns/:id/active", put(campaigns_api::set_active))
        .route("/campaigns/:id/approve", post(campaigns_api::approve_campaign))
        .route("/campaigns/:id/reject", post(campaigns_api::reject_campaign))
        .route(
            "/campaigns/:id/resubmit",
            post(campaigns_api::resubmit_campaign),
        )
        .route("/campaigns/:id/swap", post(campaigns_api::request_swap))
        .route("/campaigns/:id/swap/approve", post(campaigns_api::approve_swap))
}

pub(crate) fn engine_status(e: EngineError) -> StatusCode {
    let status = match &e {
        EngineError::CampaignNotFound(_) | EngineError::MediaNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::CampaignWithoutMedia(_)
        | EngineError::InvalidSlotIndex(_)
        | EngineError::NoPendingSwap(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::InvalidTransition { .. } | EngineError::VersionConflict { .. } => {
            StatusCode::CONFLICT
        }
        EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!("{}", e);
    } else {
        tracing::warn!("{}", e);
    }
    status
}
