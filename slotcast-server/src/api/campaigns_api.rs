use crate::api::engine_status;
use crate::models::{Campaign, ModerationStatus, NewCampaign};
use crate::services::moderation::{self, ApprovalResult};
use crate::websocket;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct CampaignView {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub target_terminals: Vec<i32>,
}

impl From<Campaign> for CampaignView {
    fn from(campaign: Campaign) -> Self {
        Self {
            target_terminals: campaign.target_terminal_ids(),
            campaign,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub is_wildcard: bool,
    #[serde(default)]
    pub target_terminals: Vec<i32>,
    pub v_media_id: Option<i32>,
    pub ends_at: Option<NaiveDateTime>,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct SwapRequest {
    pub media_id: i32,
}

#[derive(Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

pub async fn list_campaigns(
    State(state): State<AppState>,
) -> Result<Json<Vec<CampaignView>>, StatusCode> {
    use crate::schema::campaigns::dsl::*;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let results = campaigns
        .order(id.asc())
        .select(Campaign::as_select())
        .load(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(results.into_iter().map(CampaignView::from).collect()))
}

pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<Json<CampaignView>, StatusCode> {
    use crate::schema::campaigns;

    if req.is_global && req.is_wildcard {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Some(media_id) = req.v_media_id {
        moderation::load_media(&mut conn, media_id).map_err(engine_status)?;
    }

    // Broadcast campaigns reach every playlist; targets would be ignored.
    let mut targets = if req.is_global || req.is_wildcard {
        Vec::new()
    } else {
        req.target_terminals
    };
    targets.sort_unstable();
    targets.dedup();

    let target_json =
        serde_json::to_string(&targets).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let campaign = diesel::insert_into(campaigns::table)
        .values(&NewCampaign {
            name: req.name,
            moderation_status: ModerationStatus::Pending.as_str().to_string(),
            is_global: req.is_global,
            is_wildcard: req.is_wildcard,
            is_active: true,
            target_terminals: target_json,
            v_media_id: req.v_media_id,
            ends_at: req.ends_at,
        })
        .returning(Campaign::as_select())
        .get_result(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!("Campaign {} submitted for moderation", campaign.id);
    Ok(Json(campaign.into()))
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<i32>,
) -> Result<StatusCode, StatusCode> {
    let changes = {
        let mut conn = state
            .db
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        moderation::delete_campaign(&mut conn, campaign_id).map_err(engine_status)?
    };

    websocket::notify_changes(&state, &changes).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Advertiser-side pause. Local slots stay allocated and terminals drop the
/// campaign from rotation; broadcast slots are emptied until resume.
pub async fn set_active(
    State(state): State<AppState>,
    Path(campaign_id): Path<i32>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<CampaignView>, StatusCode> {
    let (campaign, changes) = {
        let mut conn = state
            .db
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        moderation::set_active(&mut conn, campaign_id, req.is_active).map_err(engine_status)?
    };

    websocket::notify_changes(&state, &changes).await;

    Ok(Json(campaign.into()))
}

pub async fn approve_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<i32>,
) -> Result<Json<ApprovalResult>, StatusCode> {
    let result = {
        let mut conn = state
            .db
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        moderation::approve_campaign(&mut conn, campaign_id).map_err(engine_status)?
    };

    websocket::notify_changes(&state, &result.changes).await;
    Ok(Json(result))
}

pub async fn reject_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<i32>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<CampaignView>, StatusCode> {
    let (campaign, changes) = {
        let mut conn = state
            .db
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let changes = moderation::reject_campaign(&mut conn, campaign_id, req.reason)
            .map_err(engine_status)?;
        let campaign = moderation::load_campaign(&mut conn, campaign_id).map_err(engine_status)?;
        (campaign, changes)
    };

    websocket::notify_changes(&state, &changes).await;
    Ok(Json(campaign.into()))
}

pub async fn resubmit_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<i32>,
) -> Result<Json<CampaignView>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    moderation::resubmit_campaign(&mut conn, campaign_id).map_err(engine_status)?;
    let campaign = moderation::load_campaign(&mut conn, campaign_id).map_err(engine_status)?;

    Ok(Json(campaign.into()))
}

pub async fn request_swap(
    State(state): State<AppState>,
    Path(campaign_id): Path<i32>,
    Json(req): Json<SwapRequest>,
) -> Result<Json<CampaignView>, StatusCode> {
    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let campaign =
        moderation::request_swap(&mut conn, campaign_id, req.media_id).map_err(engine_status)?;

    Ok(Json(campaign.into()))
}

pub async fn approve_swap(
    State(state): State<AppState>,
    Path(campaign_id): Path<i32>,
) -> Result<Json<CampaignView>, StatusCode> {
    let (campaign, changes) = {
        let mut conn = state
            .db
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let changes = moderation::approve_swap(&mut conn, campaign_id).map_err(engine_status)?;
        let campaign = moderation::load_campaign(&mut conn, campaign_id).map_err(engine_status)?;
        (campaign, changes)
    };

    websocket::notify_changes(&state, &changes).await;
    Ok(Json(campaign.into()))
}
