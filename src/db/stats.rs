//! Aggregate queries over the event log

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use super::{Database, EventType};

/// Row filter shared by the aggregate queries. Both time bounds are inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub paper_id: Option<Uuid>,
    pub event_type: Option<EventType>,
}

impl EventFilter {
    pub fn between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            start,
            end,
            ..Self::default()
        }
    }

    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(start) = self.start {
            qb.push(" AND timestamp >= ").push_bind(start.timestamp_millis());
        }
        if let Some(end) = self.end {
            qb.push(" AND timestamp <= ").push_bind(end.timestamp_millis());
        }
        if let Some(paper_id) = self.paper_id {
            qb.push(" AND paper_id = ").push_bind(paper_id.to_string());
        }
        if let Some(event_type) = self.event_type {
            qb.push(" AND event_type = ").push_bind(event_type.as_str());
        }
    }
}

// Per-type counters, shared by every grouped query
const TYPE_COUNTS: &str = r#"
    COALESCE(SUM(CASE WHEN event_type = 'view' THEN 1 ELSE 0 END), 0) AS views,
    COALESCE(SUM(CASE WHEN event_type = 'download' THEN 1 ELSE 0 END), 0) AS downloads,
    COALESCE(SUM(CASE WHEN event_type = 'citation' THEN 1 ELSE 0 END), 0) AS citations
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub views: i64,
    pub downloads: i64,
    pub citations: i64,
    pub countries: i64,
}

/// Events grouped by country, unknown locations folded under `XX`
#[derive(Debug, Clone, PartialEq)]
pub struct CountryRow {
    pub code: String,
    pub name: String,
    pub count: i64,
    pub avg_latitude: Option<f64>,
    pub avg_longitude: Option<f64>,
}

/// Event counts for one UTC calendar day (`YYYY-MM-DD`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRow {
    pub day: String,
    pub views: i64,
    pub downloads: i64,
    pub citations: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperCountRow {
    pub paper_id: String,
    pub counts: EventCounts,
}

impl Database {
    /// Totals per event type plus distinct countries among matching events
    pub async fn get_event_counts(&self, filter: &EventFilter) -> Result<EventCounts> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT");
        qb.push(TYPE_COUNTS);
        qb.push(", COUNT(DISTINCT country_code) AS countries FROM analytics_events");
        filter.push_where(&mut qb);

        let (views, downloads, citations, countries): (i64, i64, i64, i64) =
            qb.build_query_as().fetch_one(&self.pool).await?;

        Ok(EventCounts {
            views,
            downloads,
            citations,
            countries,
        })
    }

    pub async fn get_country_stats(&self, filter: &EventFilter) -> Result<Vec<CountryRow>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT
                COALESCE(country_code, 'XX') AS code,
                COALESCE(country_name, 'Unknown') AS name,
                COUNT(*) AS count,
                AVG(latitude) AS avg_lat,
                AVG(longitude) AS avg_lng
            FROM analytics_events
            "#,
        );
        filter.push_where(&mut qb);
        qb.push(" GROUP BY code, name ORDER BY count DESC, code ASC");

        let rows: Vec<(String, String, i64, Option<f64>, Option<f64>)> =
            qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(code, name, count, avg_latitude, avg_longitude)| CountryRow {
                code,
                name,
                count,
                avg_latitude,
                avg_longitude,
            })
            .collect())
    }

    /// Counts bucketed by UTC calendar day, ascending. Days without events are absent.
    pub async fn get_daily_counts(&self, filter: &EventFilter) -> Result<Vec<DailyRow>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT date(timestamp / 1000, 'unixepoch') AS day,");
        qb.push(TYPE_COUNTS);
        qb.push(" FROM analytics_events");
        filter.push_where(&mut qb);
        qb.push(" GROUP BY day ORDER BY day ASC");

        let rows: Vec<(String, i64, i64, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(day, views, downloads, citations)| DailyRow {
                day,
                views,
                downloads,
                citations,
            })
            .collect())
    }

    /// Per-paper counts ordered by `sort_by` descending, truncated to `limit`
    pub async fn get_paper_stats(&self, filter: &EventFilter, sort_by: EventType, limit: i64) -> Result<Vec<PaperCountRow>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT paper_id,");
        qb.push(TYPE_COUNTS);
        qb.push(", COUNT(DISTINCT country_code) AS countries FROM analytics_events");
        filter.push_where(&mut qb);
        qb.push(" GROUP BY paper_id ORDER BY ");
        qb.push(sort_by.count_column());
        qb.push(" DESC, COUNT(*) DESC, paper_id ASC LIMIT ");
        qb.push_bind(limit);

        let rows: Vec<(String, i64, i64, i64, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(paper_id, views, downloads, citations, countries)| PaperCountRow {
                paper_id,
                counts: EventCounts {
                    views,
                    downloads,
                    citations,
                    countries,
                },
            })
            .collect())
    }
}
