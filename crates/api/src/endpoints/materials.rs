//! Protected material access.

use axum::{Json, Router, extract::State, routing::post};
use edugate_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Access check request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    #[validate(length(min = 1, max = 255))]
    pub fingerprint: String,
}

/// Access check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResponse {
    pub allowed: bool,
}

/// Gate for protected materials: only the primary device passes.
async fn access(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<AccessRequest>,
) -> AppResult<ApiResponse<AccessResponse>> {
    req.validate()?;

    let allowed = state
        .device_access
        .check_device_access(&user.id, &req.fingerprint)
        .await?;

    if !allowed {
        return Err(AppError::Forbidden(
            "Materials are only available on your primary device".to_string(),
        ));
    }

    Ok(ApiResponse::ok(AccessResponse { allowed }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/access", post(access))
}
