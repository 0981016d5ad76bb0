//! Database module

mod events;
mod geo_cache;
mod papers;
mod schema;
mod stats;

pub use geo_cache::CachedGeolocation;
pub use stats::{DailyRow, EventCounts, EventFilter};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::geoip::GeoLocation;

/// Kind of engagement recorded against a paper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    View,
    Download,
    Citation,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Download => "download",
            EventType::Citation => "citation",
        }
    }

    /// Column alias used for this type's count in aggregate queries
    pub(crate) fn count_column(self) -> &'static str {
        match self {
            EventType::View => "views",
            EventType::Download => "downloads",
            EventType::Citation => "citations",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(EventType::View),
            "download" => Ok(EventType::Download),
            "citation" => Ok(EventType::Citation),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}

/// One engagement action. Append-only, never updated.
#[derive(Debug, Clone)]
pub struct AnalyticsEvent {
    pub id: Uuid,
    pub paper_id: Uuid,
    pub event_type: EventType,
    pub ip_hash: String,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(paper_id: Uuid, event_type: EventType, ip_hash: String, session_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            paper_id,
            event_type,
            ip_hash,
            country_code: None,
            country_name: None,
            city: None,
            latitude: None,
            longitude: None,
            user_agent: None,
            referrer: None,
            session_id,
            timestamp: Utc::now(),
        }
    }

    pub fn with_geo(mut self, geo: &GeoLocation) -> Self {
        self.country_code = geo.country_code.clone();
        self.country_name = geo.country_name.clone();
        self.city = geo.city.clone();
        self.latitude = geo.latitude.map(round_coordinate);
        self.longitude = geo.longitude.map(round_coordinate);
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_referrer(mut self, referrer: Option<String>) -> Self {
        self.referrer = referrer;
        self
    }

    #[cfg(test)]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Coordinates are kept to 7 decimal places (~1cm)
pub(crate) fn round_coordinate(value: f64) -> f64 {
    (value * 1e7).round() / 1e7
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&format!("sqlite:{}?mode=rwc", config.url))
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        // Enable WAL mode for better concurrency
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        for statement in schema::MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl Database {
    /// Isolated in-memory database. A single connection keeps every query on the same memory DB.
    pub async fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let db = Self { pool };
        db.run_migrations().await.expect("migrations");
        db
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
