pub mod auth;
pub mod error;
pub mod registry;
pub mod state;

use anyhow::Result;
use axum::{middleware, routing::get, Json, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::settings::Settings;
pub use state::AppState;

/// Run the HTTP server with the configured registry provider
pub async fn run_server(settings: Settings) -> Result<()> {
    let provider = registry::providers::connect(&settings.provider).await?;
    let state = AppState::new(provider, settings.auth_token.clone());
    let app = build_router(state);

    let addr = format!("{}:{}", settings.listen_host, settings.listen_port);
    info!("HTTP server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Build the route table once at startup.
///
/// `/health` is public; everything else passes the bearer-token gate first.
/// Unmatched paths and mismatched methods both answer 404 with a `null` body.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = registry::routes::routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_bearer_token,
    ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(registry::handlers::not_found)
        .method_not_allowed_fallback(registry::handlers::not_found)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": state.version,
    }))
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
