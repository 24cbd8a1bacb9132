//! Device endpoints for the signed-in user.

use axum::{Json, Router, extract::State, routing::post};
use edugate_common::AppResult;
use edugate_core::FingerprintPayload;
use edugate_db::entities::user_device;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Device response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub id: String,
    pub user_id: String,
    pub fingerprint: String,
    pub browser_name: String,
    pub browser_version: String,
    pub os_name: String,
    pub os_version: String,
    pub hardware_info: Option<Value>,
    pub is_primary: bool,
    pub is_active: bool,
    pub last_used: String,
    pub created_at: String,
    /// Unset until the device is first modified.
    pub updated_at: Option<String>,
}

impl From<user_device::Model> for DeviceResponse {
    fn from(device: user_device::Model) -> Self {
        Self {
            id: device.id,
            user_id: device.user_id,
            fingerprint: device.fingerprint,
            browser_name: device.browser_name,
            browser_version: device.browser_version,
            os_name: device.os_name,
            os_version: device.os_version,
            hardware_info: device.hardware_info,
            is_primary: device.is_primary,
            is_active: device.is_active,
            last_used: device.last_used.to_rfc3339(),
            created_at: device.created_at.to_rfc3339(),
            updated_at: device.updated_at.map(|at| at.to_rfc3339()),
        }
    }
}

/// Set primary device request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SetPrimaryRequest {
    #[validate(length(min = 1, max = 32))]
    pub device_id: String,
}

/// Register (or re-identify) the device the request comes from.
async fn register(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<FingerprintPayload>,
) -> AppResult<ApiResponse<DeviceResponse>> {
    let device = state
        .device_registry
        .register_from_payload(&user.id, &payload)
        .await?;

    Ok(ApiResponse::ok(device.into()))
}

/// List the caller's active devices.
async fn list(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<DeviceResponse>>> {
    let devices = state.device_registry.list_devices(&user.id).await?;

    Ok(ApiResponse::ok(
        devices.into_iter().map(DeviceResponse::from).collect(),
    ))
}

/// Make one of the caller's own devices primary.
async fn set_primary(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<SetPrimaryRequest>,
) -> AppResult<ApiResponse<DeviceResponse>> {
    req.validate()?;

    let device = state
        .primary_guard
        .promote_to_primary(&user.id, &req.device_id)
        .await?;

    Ok(ApiResponse::ok(device.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/list", post(list))
        .route("/set-primary", post(set_primary))
}
