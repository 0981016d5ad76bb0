use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use super::Analytics;
use crate::db::{DailyRow, EventFilter};

/// Longest window a series may cover. Matches `all`, plus leap-day slack.
pub const MAX_WINDOW_DAYS: i64 = 3660;

/// Named lookback, counted in whole UTC days ending today
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeRange {
    Week,
    #[default]
    Month,
    Quarter,
    Year,
    /// Everything, capped at ten years
    All,
}

impl TimeRange {
    pub fn days(self) -> u64 {
        match self {
            TimeRange::Week => 7,
            TimeRange::Month => 30,
            TimeRange::Quarter => 90,
            TimeRange::Year => 365,
            TimeRange::All => 3650,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
            TimeRange::Quarter => "90d",
            TimeRange::Year => "1y",
            TimeRange::All => "all",
        }
    }

    /// From 00:00 UTC `days - 1` days ago through `now`
    pub fn window(self, now: DateTime<Utc>) -> TimeWindow {
        let first_day = now
            .date_naive()
            .checked_sub_days(Days::new(self.days() - 1))
            .unwrap_or(NaiveDate::MIN);
        TimeWindow {
            start: first_day.and_time(NaiveTime::MIN).and_utc(),
            end: now,
        }
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            "90d" => Ok(TimeRange::Quarter),
            "1y" => Ok(TimeRange::Year),
            "all" => Ok(TimeRange::All),
            other => Err(format!("unknown range '{}', expected one of 7d, 30d, 90d, 1y, all", other)),
        }
    }
}

/// Inclusive time window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, String> {
        if start > end {
            return Err("start must not be after end".to_string());
        }
        if (end.date_naive() - start.date_naive()).num_days() >= MAX_WINDOW_DAYS {
            return Err(format!("window may span at most {} days", MAX_WINDOW_DAYS));
        }
        Ok(Self { start, end })
    }

    /// Every calendar day touched by the window, ascending
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.end.date_naive();
        self.start.date_naive().iter_days().take_while(move |day| *day <= last)
    }
}

/// What a series request covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesRequest {
    Range(TimeRange),
    Window(TimeWindow),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSeriesPoint {
    pub date: String,
    pub views: i64,
    pub downloads: i64,
    pub citations: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub time_series: Vec<TimeSeriesPoint>,
    /// Named range, or `custom` for an explicit window
    pub range: &'static str,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Analytics {
    pub async fn time_series(&self, request: SeriesRequest, now: DateTime<Utc>) -> Result<TimeSeries> {
        let (range, window) = match request {
            SeriesRequest::Range(range) => (range.as_str(), range.window(now)),
            SeriesRequest::Window(window) => ("custom", window),
        };

        let rows = self
            .db
            .get_daily_counts(&EventFilter::between(Some(window.start), Some(window.end)))
            .await?;

        Ok(TimeSeries {
            time_series: gap_fill(&window, rows),
            range,
            start_date: window.start,
            end_date: window.end,
        })
    }
}

/// One point per day of the window, zeros where the store had nothing
fn gap_fill(window: &TimeWindow, rows: Vec<DailyRow>) -> Vec<TimeSeriesPoint> {
    let mut by_day: HashMap<String, DailyRow> = rows.into_iter().map(|r| (r.day.clone(), r)).collect();

    window
        .days()
        .map(|day| {
            let date = day.format("%Y-%m-%d").to_string();
            match by_day.remove(&date) {
                Some(row) => TimeSeriesPoint {
                    date,
                    views: row.views,
                    downloads: row.downloads,
                    citations: row.citations,
                },
                None => TimeSeriesPoint {
                    date,
                    views: 0,
                    downloads: 0,
                    citations: 0,
                },
            }
        })
        .collect()
}
