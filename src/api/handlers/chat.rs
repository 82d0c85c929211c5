//! Chat handlers.
//!
//! Every operation here acts on behalf of the caller's active scene; a
//! caller without one cannot participate in chat at all.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::chat::{ChatMessage, ChatRequest, ChatRequestWithPersona, ChatSessionSummary};
use crate::scene::Scene;

/// Chat proposal.
#[derive(Debug, Deserialize)]
pub struct ProposeChatRequest {
    pub to_scene_id: String,
    pub message: Option<String>,
}

/// Message payload.
#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub request_id: String,
    pub content: String,
}

/// Resolve the caller's active scene; chat operations require one.
async fn require_scene(state: &AppState, user: &CurrentUser) -> ApiResult<Scene> {
    state
        .scenes
        .active_for_persona(user.id())
        .await?
        .ok_or_else(|| ApiError::bad_request("No active scene found. Start a scene first."))
}

/// Propose a chat to another scene.
///
/// POST /api/v1/chat/requests
pub async fn propose(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ProposeChatRequest>,
) -> ApiResult<(StatusCode, Json<ChatRequest>)> {
    let scene = require_scene(&state, &user).await?;
    let created = state
        .chats
        .propose(&scene.id, &request.to_scene_id, request.message)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Pending requests addressed to the caller's scene.
///
/// GET /api/v1/chat/requests/inbox
pub async fn inbox(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<ChatRequestWithPersona>>> {
    let Some(scene) = state.scenes.active_for_persona(user.id()).await? else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(state.chats.inbox(&scene.id).await?))
}

/// Pending requests sent by the caller's scene.
///
/// GET /api/v1/chat/requests/sent
pub async fn sent(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<ChatRequestWithPersona>>> {
    let Some(scene) = state.scenes.active_for_persona(user.id()).await? else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(state.chats.sent(&scene.id).await?))
}

/// Accept a pending request, opening the messaging window.
///
/// POST /api/v1/chat/requests/{id}/accept
pub async fn accept(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(request_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let scene = require_scene(&state, &user).await?;
    let accepted = state.chats.accept(&request_id, &scene.id).await?;

    Ok(Json(json!({
        "message": "Chat request accepted",
        "request_id": accepted.id,
        "expires_at": accepted.expires_at,
    })))
}

/// Reject a pending request.
///
/// POST /api/v1/chat/requests/{id}/reject
pub async fn reject(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(request_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let scene = require_scene(&state, &user).await?;
    state.chats.reject(&request_id, &scene.id).await?;

    Ok(Json(json!({"message": "Chat request rejected"})))
}

/// Withdraw a pending request the caller sent.
///
/// POST /api/v1/chat/requests/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(request_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let scene = require_scene(&state, &user).await?;
    state.chats.cancel(&request_id, &scene.id).await?;

    Ok(Json(json!({"message": "Chat request canceled"})))
}

/// Post a message in an accepted chat.
///
/// POST /api/v1/chat/messages
pub async fn post_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let scene = require_scene(&state, &user).await?;
    let message = state
        .chats
        .post_message(&request.request_id, &scene.id, request.content)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Messages of a chat the caller participates in.
///
/// GET /api/v1/chat/requests/{id}/messages
pub async fn messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(request_id): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let scene = require_scene(&state, &user).await?;
    Ok(Json(state.chats.messages(&request_id, &scene.id).await?))
}

/// The caller's active chats.
///
/// GET /api/v1/chat/sessions
pub async fn sessions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<ChatSessionSummary>>> {
    let Some(scene) = state.scenes.active_for_persona(user.id()).await? else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(state.chats.active_sessions(&scene.id).await?))
}
