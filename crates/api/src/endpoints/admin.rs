//! Admin device management endpoints.

use axum::{Json, Router, extract::State, routing::post};
use edugate_common::AppResult;
use edugate_core::ReconcileOutcome;
use serde::Deserialize;
use validator::Validate;

use super::devices::DeviceResponse;
use crate::{extractors::AdminUser, middleware::AppState, response::ApiResponse};

/// Request naming a user.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserDevicesRequest {
    #[validate(length(min = 1, max = 32))]
    pub user_id: String,
}

/// Request naming one device of a user.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserDeviceRequest {
    #[validate(length(min = 1, max = 32))]
    pub user_id: String,
    #[validate(length(min = 1, max = 32))]
    pub device_id: String,
}

/// Reconcile request. Without `userId`, every affected user is repaired.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub user_id: Option<String>,
}

/// List the active devices of any user.
async fn list_devices(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(req): Json<UserDevicesRequest>,
) -> AppResult<ApiResponse<Vec<DeviceResponse>>> {
    req.validate()?;

    let devices = state.device_registry.list_devices(&req.user_id).await?;

    Ok(ApiResponse::ok(
        devices.into_iter().map(DeviceResponse::from).collect(),
    ))
}

/// Make a device primary on behalf of its owner.
async fn set_primary(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(req): Json<UserDeviceRequest>,
) -> AppResult<ApiResponse<DeviceResponse>> {
    req.validate()?;

    let device = state
        .primary_guard
        .promote_to_primary(&req.user_id, &req.device_id)
        .await?;

    tracing::info!(
        admin_id = %admin.id,
        user_id = %req.user_id,
        device_id = %req.device_id,
        "Admin changed primary device"
    );

    Ok(ApiResponse::ok(device.into()))
}

/// Deactivate a device.
async fn deactivate(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(req): Json<UserDeviceRequest>,
) -> AppResult<ApiResponse<DeviceResponse>> {
    req.validate()?;

    let device = state
        .primary_guard
        .deactivate_device(&req.user_id, &req.device_id)
        .await?;

    tracing::info!(
        admin_id = %admin.id,
        user_id = %req.user_id,
        device_id = %req.device_id,
        "Admin deactivated device"
    );

    Ok(ApiResponse::ok(device.into()))
}

/// Repair users holding more than one primary device.
async fn reconcile(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(req): Json<ReconcileRequest>,
) -> AppResult<ApiResponse<Vec<ReconcileOutcome>>> {
    req.validate()?;

    let outcomes = match req.user_id {
        Some(user_id) => vec![state.primary_guard.reconcile_user(&user_id).await?],
        None => state.primary_guard.reconcile_all().await?,
    };

    Ok(ApiResponse::ok(outcomes))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/devices/list", post(list_devices))
        .route("/devices/set-primary", post(set_primary))
        .route("/devices/deactivate", post(deactivate))
        .route("/devices/reconcile", post(reconcile))
}
