//! HTTP API layer for edugate.
//!
//! JSON endpoints, all `POST`, mounted under `/api` by the
//! server:
//!
//! - **Devices**: registration and self-service primary selection
//! - **Materials**: the access check used when serving protected content
//! - **Admin**: device management and primary reconciliation
//!
//! Built on Axum 0.8. Authentication is a bearer token resolved by
//! [`middleware::auth_middleware`].

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use endpoints::router;
