//! Edugate server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use edugate_api::{middleware::AppState, router as api_router};
use edugate_common::{AppError, Config};
use edugate_core::{DeviceAccessService, DeviceRegistry, PrimaryAssignmentGuard, UserService};
use edugate_db::repositories::{UserDeviceRepository, UserRepository};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edugate=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting edugate server...");

    // Load configuration
    let config = Config::load().map_err(AppError::from)?;

    // Connect to database
    let db = edugate_db::init(&config).await?;
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    edugate_db::migrate(&db).await?;
    info!("Migrations completed");

    let db = Arc::new(db);

    // Initialize repositories
    let user_repo = UserRepository::new(Arc::clone(&db));
    let device_repo = UserDeviceRepository::new(Arc::clone(&db), config.database.lock_timeout());

    // Initialize services
    let primary_guard = PrimaryAssignmentGuard::new(device_repo.clone(), user_repo.clone());
    let device_registry =
        DeviceRegistry::new(device_repo.clone(), user_repo.clone(), primary_guard.clone());
    let device_access = DeviceAccessService::new(device_repo);
    let user_service = UserService::new(user_repo);

    // Repair anything written before the single-primary index existed
    match primary_guard.reconcile_all().await {
        Ok(outcomes) if !outcomes.is_empty() => {
            warn!(users = outcomes.len(), "Repaired users with multiple primary devices");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Startup reconciliation failed"),
    }

    let state = AppState {
        user_service,
        device_registry,
        primary_guard,
        device_access,
    };

    let app = Router::new()
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            edugate_api::middleware::auth_middleware,
        ))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
