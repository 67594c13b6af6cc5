use crate::models::{Media, MediaType, NewMedia};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CreateMediaRequest {
    pub url: String,
    pub media_type: MediaType,
    pub duration_secs: Option<i32>,
}

pub async fn list_media(State(state): State<AppState>) -> Result<Json<Vec<Media>>, StatusCode> {
    use crate::schema::media::dsl::*;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let results = media
        .select(Media::as_select())
        .load(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(results))
}

pub async fn create_media(
    State(state): State<AppState>,
    Json(req): Json<CreateMediaRequest>,
) -> Result<Json<Media>, StatusCode> {
    use crate::schema::media;

    if req.url.trim().is_empty() || req.duration_secs.map(|d| d < 0).unwrap_or(false) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let item = diesel::insert_into(media::table)
        .values(&NewMedia {
            url: req.url,
            media_type: req.media_type.as_str().to_string(),
            duration_secs: req.duration_secs,
        })
        .returning(Media::as_select())
        .get_result(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(item))
}

/// Refuses while any slot or campaign still references the media.
pub async fn delete_media(
    State(state): State<AppState>,
    Path(media): Path<i32>,
) -> Result<StatusCode, StatusCode> {
    use crate::schema::campaigns::dsl as c_dsl;
    use crate::schema::media::dsl as m_dsl;
    use crate::schema::playlist_slots::dsl as s_dsl;

    let mut conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let slot_refs: i64 = s_dsl::playlist_slots
        .filter(s_dsl::media_id.eq(media))
        .count()
        .get_result(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let campaign_refs: i64 = c_dsl::campaigns
        .filter(
            c_dsl::v_media_id
                .eq(media)
                .or(c_dsl::pending_swap_media_id.eq(media)),
        )
        .count()
        .get_result(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if slot_refs > 0 || campaign_refs > 0 {
        return Err(StatusCode::CONFLICT);
    }

    let deleted = diesel::delete(m_dsl::media.filter(m_dsl::id.eq(media)))
        .execute(&mut conn)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if deleted == 0 {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}
