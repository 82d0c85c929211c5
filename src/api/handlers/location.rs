//! Location handlers.

use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::geo::Coordinates;

/// Location report.
#[derive(Debug, Deserialize)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

/// Validate a reported coordinate pair.
pub fn parse_coordinates(latitude: f64, longitude: f64) -> ApiResult<Coordinates> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(ApiError::bad_request("latitude must be within -90..90"));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(ApiError::bad_request("longitude must be within -180..180"));
    }
    Ok(Coordinates::new(latitude, longitude))
}

/// Update the caller's last-known location and append a history sample.
///
/// POST /api/v1/location/update
pub async fn update_location(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<UpdateLocationRequest>,
) -> ApiResult<Json<Value>> {
    let location = parse_coordinates(request.latitude, request.longitude)?;

    state.users.set_last_location(user.id(), location).await?;
    state
        .locations
        .record(user.id(), location, request.accuracy)
        .await?;

    Ok(Json(json!({
        "message": "Location updated",
        "location": {
            "latitude": location.latitude,
            "longitude": location.longitude,
            "accuracy": request.accuracy,
        },
    })))
}

/// The caller's last-known location.
///
/// GET /api/v1/location/current
pub async fn current_location(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Value>> {
    let record = state
        .users
        .get(user.id())
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let (Some(latitude), Some(longitude)) = (record.last_latitude, record.last_longitude) else {
        return Err(ApiError::not_found("No location data available"));
    };

    Ok(Json(json!({
        "latitude": latitude,
        "longitude": longitude,
        "updated_at": record.last_location_updated_at,
    })))
}
