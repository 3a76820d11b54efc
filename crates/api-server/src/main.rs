//! API server for Kontext
//!
//! Single-process HTTP surface: batched action ingestion with usage
//! metering, confirmation tasks, anomaly screening, trust scoring, and
//! billing webhook mediation.

mod billing;
mod config;
mod rate_limit;
mod routes;
mod state;
mod usage;

use std::net::SocketAddr;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        "Loaded {} API key(s) and {} plan assignment(s)",
        config.valid_api_keys.len(),
        config.plan_assignments.len()
    );
    if config.dev_mode {
        tracing::info!("Development mode: local CORS origins enabled");
    }

    let cors = cors_layer(&config);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config);

    // Only these routes sit behind the per-IP rate limiter; the billing
    // surface and the root/health endpoints bypass it.
    let protected = Router::new()
        .merge(routes::actions::router())
        .merge(routes::tasks::router())
        .merge(routes::audit::router())
        .merge(routes::trust::router())
        .merge(routes::usage::router())
        .merge(routes::anomalies::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            routes::enforce_rate_limit,
        ));

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::billing::router())
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Kontext API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-project-id"),
            HeaderName::from_static("stripe-signature"),
        ])
        .max_age(std::time::Duration::from_secs(24 * 60 * 60))
}
