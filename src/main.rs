//! paperstats - engagement analytics for a research-paper repository
//!
//! Records views and downloads with privacy-preserving metadata:
//! - IP addresses are hashed before storage
//! - Geolocation is cached per IP hash for a bounded time
//! - Dashboard endpoints serve overview, geographic, time-series and top-paper reports

mod analytics;
mod config;
mod db;
mod geoip;
mod privacy;
mod tracking;
mod web;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let config = config::Config::load()?;
    init_logging(&config.logging.level);

    info!("Starting paperstats...");
    if config.analytics_secret().is_none() {
        warn!("auth.analytics_secret is not set, every tracking request will be rejected");
    }

    // Initialize database
    let db = db::Database::new(&config.database).await?;
    db.run_migrations().await?;
    info!("Database initialized ({} events recorded)", db.get_total_count().await?);

    // Geolocation provider behind the 30-day cache
    let provider = Arc::new(geoip::IpApiProvider::new(&config.geoip)?);
    let geo = geoip::GeoResolver::new(db.clone(), provider, &config.geoip);
    info!("GeoIP lookups via {}", config.geoip.api_url);

    let state = Arc::new(web::AppState {
        tracker: tracking::Tracker::new(db.clone(), geo),
        analytics: analytics::Analytics::new(db.clone()),
        config: config.clone(),
    });

    web::start_background_tasks(db, config.geoip.cleanup_interval_secs);

    // Start web server (blocking)
    web::start_server(state).await?;

    Ok(())
}

/// `RUST_LOG` wins over the configured level. Use LOG_FORMAT=gcp for structured GCP Cloud Logging.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
