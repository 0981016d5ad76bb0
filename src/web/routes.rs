//! HTTP handlers for tracking and the dashboard queries

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::error::{ApiError, FieldError};
use super::params::ParamErrors;
use super::AppState;
use crate::analytics::{
    GeographicData, OverviewMetrics, SeriesRequest, SortBy, TimeRange, TimeSeries, TimeWindow, TopPapers,
    DEFAULT_LIMIT, MAX_LIMIT,
};
use crate::db::EventType;
use crate::privacy;
use crate::tracking::{TrackEvent, TrackOutcome, TrackableEvent};

pub const SESSION_COOKIE: &str = "session_id";

/// Body of `POST /api/analytics/track`
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackPayload {
    #[serde(default)]
    #[validate(custom(function = "validate_paper_id"))]
    pub paper_id: String,
    #[serde(default)]
    #[validate(custom(function = "validate_event_type"))]
    pub event_type: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "sessionId must be 1 to 255 characters"))]
    pub session_id: String,
    #[serde(default)]
    #[validate(
        length(min = 1, max = 45, message = "ip must be 1 to 45 characters"),
        custom(function = "validate_ip")
    )]
    pub ip: String,
    #[validate(length(max = 500, message = "userAgent must be at most 500 characters"))]
    pub user_agent: Option<String>,
    #[validate(length(max = 500, message = "referrer must be at most 500 characters"))]
    pub referrer: Option<String>,
}

fn validate_paper_id(value: &str) -> Result<(), ValidationError> {
    Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("uuid").with_message("paperId must be a UUID".into()))
}

fn validate_event_type(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<TrackableEvent>()
        .map(|_| ())
        .map_err(|e| ValidationError::new("event_type").with_message(e.into()))
}

fn validate_ip(value: &str) -> Result<(), ValidationError> {
    // the length rule reports empty values
    if value.is_empty() || value.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    Err(ValidationError::new("ip").with_message("ip must be an IPv4 or IPv6 address".into()))
}

impl TrackPayload {
    fn into_event(self) -> Result<TrackEvent, ApiError> {
        self.validate()?;

        let paper_id = Uuid::parse_str(&self.paper_id)
            .map_err(|_| ApiError::InvalidRequest(vec![FieldError::new("paperId", "paperId must be a UUID")]))?;
        let event_type: TrackableEvent = self
            .event_type
            .parse()
            .map_err(|e: String| ApiError::InvalidRequest(vec![FieldError::new("eventType", e)]))?;

        Ok(TrackEvent {
            paper_id,
            event_type: event_type.into(),
            session_id: self.session_id,
            ip: self.ip,
            user_agent: self.user_agent,
            referrer: self.referrer,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

/// Record a view or download. Authentication happens in the layer in front of this.
pub async fn track(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TrackPayload>, JsonRejection>,
) -> Result<Json<TrackResponse>, ApiError> {
    let Json(payload) =
        payload.map_err(|rejection| ApiError::InvalidRequest(vec![FieldError::new("body", rejection.body_text())]))?;
    let event = payload.into_event()?;

    let outcome = state.tracker.track(event).await?;

    Ok(Json(TrackResponse {
        success: true,
        duplicate: (outcome == TrackOutcome::Duplicate).then_some(true),
    }))
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| ApiError::InvalidQuery(vec![FieldError::new("query", rejection.body_text())]))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub paper_id: Option<String>,
}

pub async fn overview(
    State(state): State<Arc<AppState>>,
    params: Result<Query<OverviewQuery>, QueryRejection>,
) -> Result<Json<OverviewMetrics>, ApiError> {
    let params = query(params)?;
    let mut errors = ParamErrors::new();
    let (start, end) = errors.date_range(params.start_date.as_deref(), params.end_date.as_deref());
    let paper_id: Option<Uuid> = errors.parse("paperId", params.paper_id.as_deref());
    errors.finish()?;

    Ok(Json(state.analytics.overview(start, end, paper_id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeographicQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub event_type: Option<String>,
}

pub async fn geographic(
    State(state): State<Arc<AppState>>,
    params: Result<Query<GeographicQuery>, QueryRejection>,
) -> Result<Json<GeographicData>, ApiError> {
    let params = query(params)?;
    let mut errors = ParamErrors::new();
    let (start, end) = errors.date_range(params.start_date.as_deref(), params.end_date.as_deref());
    let event_type: Option<EventType> = errors.parse("eventType", params.event_type.as_deref());
    errors.finish()?;

    Ok(Json(state.analytics.geographic(start, end, event_type).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesQuery {
    pub range: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Daily counts for a named range, or for an explicit window when both dates are given
pub async fn timeseries(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TimeSeriesQuery>, QueryRejection>,
) -> Result<Json<TimeSeries>, ApiError> {
    let params = query(params)?;
    let mut errors = ParamErrors::new();
    let range: TimeRange = errors.parse("range", params.range.as_deref()).unwrap_or_default();
    let request = match errors.date_range(params.start_date.as_deref(), params.end_date.as_deref()) {
        (None, None) => Some(SeriesRequest::Range(range)),
        (Some(start), Some(end)) if start <= end => match TimeWindow::new(start, end) {
            Ok(window) => Some(SeriesRequest::Window(window)),
            Err(e) => {
                errors.push("startDate", e);
                None
            }
        },
        // reversed bounds were already reported
        (Some(_), Some(_)) => None,
        (Some(_), None) => {
            errors.push("endDate", "endDate is required when startDate is given");
            None
        }
        (None, Some(_)) => {
            errors.push("startDate", "startDate is required when endDate is given");
            None
        }
    };
    errors.finish()?;

    let request = request.unwrap_or(SeriesRequest::Range(range));
    Ok(Json(state.analytics.time_series(request, Utc::now()).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPapersQuery {
    pub limit: Option<String>,
    pub sort_by: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

pub async fn top_papers(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TopPapersQuery>, QueryRejection>,
) -> Result<Json<TopPapers>, ApiError> {
    let params = query(params)?;
    let mut errors = ParamErrors::new();
    let limit: u32 = errors.parse("limit", params.limit.as_deref()).unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        errors.push("limit", format!("limit must be between 1 and {}", MAX_LIMIT));
    }
    let sort_by: SortBy = errors.parse("sortBy", params.sort_by.as_deref()).unwrap_or_default();
    let (start, end) = errors.date_range(params.start_date.as_deref(), params.end_date.as_deref());
    errors.finish()?;

    Ok(Json(state.analytics.top_papers(limit, sort_by, start, end).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
}

/// Echo the visitor's session cookie, issuing a new one on first visit
pub async fn session(jar: CookieJar) -> (CookieJar, Json<SessionResponse>) {
    let existing = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.trim().is_empty());
    let session_id = privacy::session_id(existing.as_deref());

    let jar = match existing {
        Some(_) => jar,
        None => jar.add(
            Cookie::build((SESSION_COOKIE, session_id.clone()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax),
        ),
    };
    (jar, Json(SessionResponse { session_id }))
}
