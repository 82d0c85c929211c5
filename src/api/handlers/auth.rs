//! Authentication handlers: one-time-code login.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::AuthError;

/// Request for a login code.
#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub email: String,
}

/// Code verification request.
#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub code: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub user_id: String,
    pub email: String,
}

/// Generate and store a 6-digit login code for an email address.
///
/// POST /api/v1/auth/send-otp
pub async fn send_otp(
    State(state): State<AppState>,
    Json(request): Json<SendOtpRequest>,
) -> ApiResult<Json<Value>> {
    let email = request.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::bad_request("Invalid email address"));
    }

    let otp = state.otps.create(&email, state.auth.otp_ttl()).await?;

    // No mail collaborator in this deployment; the code goes to the log and,
    // for development convenience, into the response.
    info!(email = %otp.email, code = %otp.code, "login code issued");

    Ok(Json(json!({
        "message": "Code sent",
        "email": otp.email,
        "code": otp.code,
    })))
}

/// Verify a login code and issue an access token. Creates the account on
/// first login.
///
/// POST /api/v1/auth/verify-otp
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(request): Json<VerifyOtpRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let email = request.email.trim().to_lowercase();

    if !state.otps.consume(&email, request.code.trim()).await? {
        return Err(AuthError::InvalidCode.into());
    }

    let user = state.users.get_or_create_by_email(&email).await?;
    let token = state.auth.issue_token(&user.id, &user.email)?;
    info!(user_id = %user.id, "user logged in");

    Ok(Json(TokenResponse {
        access_token: token,
        user_id: user.id,
        email: user.email,
    }))
}
