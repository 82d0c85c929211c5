//! Scene handlers.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::location::parse_coordinates;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::geo;
use crate::scene::{PRESENCE_RADIUS_METERS, Scene, SceneWithPersona};

/// Presence announcement.
#[derive(Debug, Deserialize)]
pub struct StartSceneRequest {
    pub persona_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Nearby listing query.
#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
}

/// Announce presence: extends the caller's active scene or starts a fresh
/// one.
///
/// POST /api/v1/scenes/start
pub async fn start_scene(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<StartSceneRequest>,
) -> ApiResult<(StatusCode, Json<Scene>)> {
    // One persona per user; its id is the user id.
    if request.persona_id != user.id() {
        return Err(ApiError::forbidden("Persona does not belong to you"));
    }
    if state.personas.get(&request.persona_id).await?.is_none() {
        return Err(ApiError::not_found("Persona not found"));
    }

    let location = parse_coordinates(request.latitude, request.longitude)?;
    let scene = state.scenes.start_or_extend(&request.persona_id, location).await?;

    Ok((StatusCode::CREATED, Json(scene)))
}

/// End the caller's presence.
///
/// POST /api/v1/scenes/stop
pub async fn stop_scene(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Value>> {
    let scene = state.scenes.stop(user.id()).await?;

    Ok(Json(json!({
        "message": "Scene stopped",
        "scene_id": scene.id,
    })))
}

/// The caller's active scene, if any.
///
/// GET /api/v1/scenes/active
pub async fn active_scene(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Value>> {
    match state.scenes.active_for_persona(user.id()).await? {
        Some(scene) => Ok(Json(json!({"active": true, "scene": scene}))),
        None => Ok(Json(json!({"active": false}))),
    }
}

/// Live scenes of other users within the presence radius of the given
/// coordinate.
///
/// GET /api/v1/scenes/nearby
pub async fn nearby_scenes(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<NearbyQuery>,
) -> ApiResult<Json<Vec<SceneWithPersona>>> {
    let origin = parse_coordinates(query.latitude, query.longitude)?;

    let scenes = state
        .scenes
        .nearby_for_user(user.id())
        .await?
        .into_iter()
        .filter(|s| {
            geo::distance_meters(s.scene.coordinates(), origin) <= PRESENCE_RADIUS_METERS
        })
        .collect();

    Ok(Json(scenes))
}
