//! Web server module

mod error;
mod middleware;
mod params;
mod routes;

use anyhow::Result;
use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::analytics::Analytics;
use crate::config::Config;
use crate::db::Database;
use crate::tracking::Tracker;
use middleware::BearerAuthLayer;

pub struct AppState {
    pub config: Config,
    pub tracker: Tracker,
    pub analytics: Analytics,
}

pub fn router(state: Arc<AppState>) -> Router {
    let tracking = Router::new()
        .route("/api/analytics/track", post(routes::track))
        .route_layer(BearerAuthLayer::new(state.config.analytics_secret()));

    let dashboard = Router::new()
        .route("/api/analytics/overview", get(routes::overview))
        .route("/api/analytics/geographic", get(routes::geographic))
        .route("/api/analytics/timeseries", get(routes::timeseries))
        .route("/api/analytics/top-papers", get(routes::top_papers))
        .route("/api/analytics/session", get(routes::session))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods([Method::GET]));

    tracking
        .merge(dashboard)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Analytics API listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Start the periodic sweep of expired geolocation cache entries
pub fn start_background_tasks(db: Database, cleanup_interval_secs: u64) {
    if cleanup_interval_secs == 0 {
        info!("Geolocation cache sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            match db.purge_expired_geolocations(Utc::now()).await {
                Ok(0) => debug!("No expired geolocation entries"),
                Ok(n) => info!("Purged {} expired geolocation entries", n),
                Err(e) => warn!("Geolocation cache sweep failed: {}", e),
            }
        }
    });
}
