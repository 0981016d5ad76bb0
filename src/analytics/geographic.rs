use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Analytics;
use crate::db::{EventFilter, EventType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeographicData {
    pub countries: Vec<CountryShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryShare {
    pub code: String,
    pub name: String,
    pub count: i64,
    /// Share of all matching events, 0-100
    pub percentage: f64,
    /// `[longitude, latitude]`, mean of the country's events. `[0, 0]` when none had coordinates.
    pub coordinates: [f64; 2],
}

impl Analytics {
    pub async fn geographic(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        event_type: Option<EventType>,
    ) -> Result<GeographicData> {
        let filter = EventFilter {
            event_type,
            ..EventFilter::between(start, end)
        };
        let rows = self.db.get_country_stats(&filter).await?;
        let total: i64 = rows.iter().map(|r| r.count).sum();

        let countries = rows
            .into_iter()
            .map(|row| CountryShare {
                percentage: if total > 0 { (row.count as f64 / total as f64) * 100.0 } else { 0.0 },
                coordinates: [row.avg_longitude.unwrap_or(0.0), row.avg_latitude.unwrap_or(0.0)],
                code: row.code,
                name: row.name,
                count: row.count,
            })
            .collect();

        Ok(GeographicData { countries })
    }
}
