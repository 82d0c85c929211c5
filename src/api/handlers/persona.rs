//! Persona handlers.

use axum::{Json, extract::State};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::persona::Persona;

/// Persona profile payload.
#[derive(Debug, Deserialize)]
pub struct UpsertPersonaRequest {
    pub name: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub description: String,
}

/// Create the caller's persona, or update its profile.
///
/// POST /api/v1/personas
pub async fn upsert_persona(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<UpsertPersonaRequest>,
) -> ApiResult<Json<Persona>> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Persona name is required"));
    }

    let persona = state
        .personas
        .upsert(user.id(), name, &request.avatar_url, &request.description)
        .await?;

    Ok(Json(persona))
}

/// List the caller's personas.
///
/// GET /api/v1/personas
pub async fn list_personas(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Persona>>> {
    Ok(Json(state.personas.list_for_user(user.id()).await?))
}
