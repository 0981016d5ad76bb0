use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Analytics;
use crate::db::{EventCounts, EventFilter};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewMetrics {
    pub total_views: i64,
    pub total_downloads: i64,
    pub total_citations: i64,
    pub unique_countries: i64,
    pub growth_rate: GrowthRate,
}

/// Percentage change against the preceding window of equal length
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GrowthRate {
    pub views: f64,
    pub downloads: f64,
    pub citations: f64,
}

impl Analytics {
    pub async fn overview(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        paper_id: Option<Uuid>,
    ) -> Result<OverviewMetrics> {
        let filter = EventFilter {
            start,
            end,
            paper_id,
            event_type: None,
        };
        let current = self.db.get_event_counts(&filter).await?;

        let growth_rate = match prior_period(start, end) {
            Some((prior_start, prior_end)) => {
                let prior_filter = EventFilter {
                    start: Some(prior_start),
                    end: Some(prior_end),
                    ..filter
                };
                let prior = self.db.get_event_counts(&prior_filter).await?;
                GrowthRate::between(&current, &prior)
            }
            None => GrowthRate::default(),
        };

        Ok(OverviewMetrics {
            total_views: current.views,
            total_downloads: current.downloads,
            total_citations: current.citations,
            unique_countries: current.countries,
            growth_rate,
        })
    }
}

impl GrowthRate {
    fn between(current: &EventCounts, prior: &EventCounts) -> Self {
        Self {
            views: growth(current.views, prior.views),
            downloads: growth(current.downloads, prior.downloads),
            citations: growth(current.citations, prior.citations),
        }
    }
}

/// Window of the same length ending 1ms before `start`. Needs both bounds.
fn prior_period(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (start, end) = (start?, end?);
    if end < start {
        return None;
    }
    let prior_end = start - Duration::milliseconds(1);
    Some((prior_end - (end - start), prior_end))
}

/// No baseline, no growth
fn growth(current: i64, prior: i64) -> f64 {
    if prior == 0 {
        return 0.0;
    }
    let pct = (current - prior) as f64 / prior as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testing::seed;
    use crate::db::{Database, EventType};
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_counts_views_downloads_citations() {
        let db = Database::in_memory().await;
        let analytics = Analytics::new(db.clone());
        let paper = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();

        for _ in 0..3 {
            seed(&db, paper, EventType::View, at, Some(("TZ", -6.0, 35.0))).await;
        }
        seed(&db, paper, EventType::Download, at, Some(("UG", 0.3, 32.5))).await;
        seed(&db, Uuid::new_v4(), EventType::View, at, None).await;

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 31, 23, 59, 59).unwrap();
        let metrics = analytics.overview(Some(start), Some(end), Some(paper)).await.unwrap();

        assert_eq!(metrics.total_views, 3);
        assert_eq!(metrics.total_downloads, 1);
        assert_eq!(metrics.total_citations, 0);
        assert_eq!(metrics.unique_countries, 2);
    }

    #[tokio::test]
    async fn test_growth_against_preceding_window() {
        let db = Database::in_memory().await;
        let analytics = Analytics::new(db.clone());
        let paper = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2024, 5, 11, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 20, 23, 59, 59).unwrap();

        // prior window: 2 views, 1 download, no citations
        seed(&db, paper, EventType::View, start - Duration::days(2), None).await;
        seed(&db, paper, EventType::View, start - Duration::days(9), None).await;
        seed(&db, paper, EventType::Download, start - Duration::hours(1), None).await;
        // too old for the prior window
        seed(&db, paper, EventType::View, start - Duration::days(15), None).await;

        // current window: 3 views, 1 download, 1 citation
        for day in [0, 4, 9] {
            seed(&db, paper, EventType::View, start + Duration::days(day), None).await;
        }
        seed(&db, paper, EventType::Download, start, None).await;
        seed(&db, paper, EventType::Citation, start, None).await;

        let metrics = analytics.overview(Some(start), Some(end), None).await.unwrap();
        assert_eq!(
            metrics.growth_rate,
            GrowthRate {
                views: 50.0,
                downloads: 0.0,
                citations: 0.0,
            }
        );
    }

    #[tokio::test]
    async fn test_open_ended_range_has_no_growth() {
        let db = Database::in_memory().await;
        let analytics = Analytics::new(db.clone());
        seed(&db, Uuid::new_v4(), EventType::View, Utc::now(), None).await;

        let metrics = analytics.overview(Some(Utc::now() - Duration::days(7)), None, None).await.unwrap();
        assert_eq!(metrics.total_views, 1);
        assert_eq!(metrics.growth_rate, GrowthRate::default());
    }

    #[test]
    fn test_prior_period_has_equal_length_and_touches_start() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        let (prior_start, prior_end) = prior_period(Some(start), Some(end)).unwrap();

        assert_eq!(prior_end, start - Duration::milliseconds(1));
        assert_eq!(prior_end - prior_start, end - start);
        assert_eq!(prior_period(None, Some(end)), None);
        assert_eq!(prior_period(Some(end), Some(start)), None);
    }

    #[test]
    fn test_growth_rounding_and_decline() {
        assert_eq!(growth(3, 2), 50.0);
        assert_eq!(growth(1, 3), -66.67);
        assert_eq!(growth(5, 0), 0.0);
    }
}
