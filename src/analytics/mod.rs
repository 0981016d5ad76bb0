//! Dashboard aggregations over the event log
//!
//! Four independent read-side queries, each returning an explicit result type:
//! - overview totals with prior-period growth
//! - geographic distribution
//! - gap-filled daily time series
//! - ranked top papers joined with paper metadata

mod geographic;
mod overview;
mod timeseries;
mod top_papers;

pub use geographic::GeographicData;
pub use overview::OverviewMetrics;
pub use timeseries::{SeriesRequest, TimeRange, TimeSeries, TimeWindow};
pub use top_papers::{SortBy, TopPapers, DEFAULT_LIMIT, MAX_LIMIT};

use crate::db::Database;

#[derive(Clone)]
pub struct Analytics {
    db: Database,
}

impl Analytics {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use crate::db::{AnalyticsEvent, Database, EventType};
    use crate::geoip::GeoLocation;

    /// Insert an event with a unique session so the dedup key never collides
    pub async fn seed(db: &Database, paper: Uuid, event_type: EventType, at: DateTime<Utc>, country: Option<(&str, f64, f64)>) {
        let mut event = AnalyticsEvent::new(paper, event_type, "hash".to_string(), Uuid::new_v4().to_string()).at(at);
        if let Some((code, lat, lng)) = country {
            event = event.with_geo(&GeoLocation {
                country_code: Some(code.to_string()),
                country_name: Some(format!("{} name", code)),
                city: None,
                latitude: Some(lat),
                longitude: Some(lng),
            });
        }
        assert!(db.record_event(&event).await.unwrap());
    }
}
