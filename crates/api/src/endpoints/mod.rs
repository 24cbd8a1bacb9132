//! API endpoints.

mod admin;
mod devices;
mod materials;

use axum::Router;

use crate::middleware::AppState;

pub use devices::DeviceResponse;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/devices", devices::router())
        .nest("/materials", materials::router())
        .nest("/admin", admin::router())
}
