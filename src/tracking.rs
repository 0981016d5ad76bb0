//! Tracking pipeline: dedup, geolocate, record

use std::str::FromStr;

use anyhow::Result;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{AnalyticsEvent, Database, EventType};
use crate::geoip::GeoResolver;
use crate::privacy::hash_ip;

/// Event types clients may submit. Citations are recorded by other means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackableEvent {
    View,
    Download,
}

impl FromStr for TrackableEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(TrackableEvent::View),
            "download" => Ok(TrackableEvent::Download),
            other => Err(format!("unsupported event type '{}', expected view or download", other)),
        }
    }
}

impl From<TrackableEvent> for EventType {
    fn from(event: TrackableEvent) -> Self {
        match event {
            TrackableEvent::View => EventType::View,
            TrackableEvent::Download => EventType::Download,
        }
    }
}

/// A validated tracking request
#[derive(Debug, Clone)]
pub struct TrackEvent {
    pub paper_id: Uuid,
    pub event_type: EventType,
    pub session_id: String,
    pub ip: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Recorded,
    Duplicate,
}

#[derive(Clone)]
pub struct Tracker {
    db: Database,
    geo: GeoResolver,
}

impl Tracker {
    pub fn new(db: Database, geo: GeoResolver) -> Self {
        Self { db, geo }
    }

    /// Record the event unless its (session, paper, type) key was already seen.
    /// Duplicates return before any geolocation lookup.
    pub async fn track(&self, req: TrackEvent) -> Result<TrackOutcome> {
        if self.db.event_exists(&req.session_id, req.paper_id, req.event_type).await? {
            debug!("Duplicate {} for paper {} in session", req.event_type, req.paper_id);
            return Ok(TrackOutcome::Duplicate);
        }

        let geo = self.geo.resolve(&req.ip).await;

        let mut event = AnalyticsEvent::new(req.paper_id, req.event_type, hash_ip(&req.ip), req.session_id)
            .with_user_agent(req.user_agent)
            .with_referrer(req.referrer);
        if let Some(ref location) = geo {
            event = event.with_geo(location);
        }

        if !self.db.record_event(&event).await? {
            debug!("Concurrent duplicate {} for paper {} dropped", event.event_type, event.paper_id);
            return Ok(TrackOutcome::Duplicate);
        }

        info!(
            "Tracked {} for paper {} from {}",
            event.event_type,
            event.paper_id,
            event.country_code.as_deref().unwrap_or("unknown location")
        );
        Ok(TrackOutcome::Recorded)
    }
}
