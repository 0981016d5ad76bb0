//! Event log: dedup lookups and append-only inserts

use anyhow::Result;
use uuid::Uuid;

use super::{AnalyticsEvent, Database, EventType};

impl Database {
    /// True if an event with this exact (session, paper, type) key is already stored
    pub async fn event_exists(&self, session_id: &str, paper_id: Uuid, event_type: EventType) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM analytics_events
            WHERE session_id = ? AND paper_id = ? AND event_type = ?
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .bind(paper_id.to_string())
        .bind(event_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Append one event. Returns false when the dedup index already held the key,
    /// i.e. a concurrent request recorded it between the check and this insert.
    pub async fn record_event(&self, event: &AnalyticsEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO analytics_events (id, paper_id, event_type, ip_hash, country_code, country_name, city, latitude, longitude, user_agent, referrer, session_id, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (session_id, paper_id, event_type) DO NOTHING
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.paper_id.to_string())
        .bind(event.event_type.as_str())
        .bind(&event.ip_hash)
        .bind(&event.country_code)
        .bind(&event.country_name)
        .bind(&event.city)
        .bind(event.latitude)
        .bind(event.longitude)
        .bind(&event.user_agent)
        .bind(&event.referrer)
        .bind(&event.session_id)
        .bind(event.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_total_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analytics_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}
