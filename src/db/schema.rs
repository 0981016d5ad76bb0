//! Database schema definitions

pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS analytics_events (
    id TEXT PRIMARY KEY,
    paper_id TEXT NOT NULL,
    event_type TEXT NOT NULL CHECK (event_type IN ('view', 'download', 'citation')),
    ip_hash TEXT NOT NULL,              -- SHA-256 hex, never the raw address
    country_code TEXT,                  -- ISO 3166-1 alpha-2
    country_name TEXT,
    city TEXT,
    latitude REAL,
    longitude REAL,
    user_agent TEXT,
    referrer TEXT,
    session_id TEXT NOT NULL,
    timestamp BIGINT NOT NULL           -- Unix millis, UTC
)
"#;

pub const CREATE_GEOLOCATION_CACHE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS geolocation_cache (
    ip_hash TEXT PRIMARY KEY,
    country_code TEXT,
    country_name TEXT,
    city TEXT,
    latitude REAL,
    longitude REAL,
    cached_at BIGINT NOT NULL,
    expires_at BIGINT NOT NULL,
    CHECK (expires_at > cached_at)
)
"#;

// Owned by the content-management side, analytics only reads it
pub const CREATE_PAPERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS papers (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    abstract TEXT NOT NULL DEFAULT '',
    authors TEXT NOT NULL DEFAULT '[]',   -- JSON array, ordered
    keywords TEXT NOT NULL DEFAULT '[]',  -- JSON array
    publication_date TEXT,
    journal_name TEXT NOT NULL DEFAULT '',
    doi TEXT UNIQUE,
    category TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'published', 'archived')),
    uploaded_by TEXT,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
)
"#;

// Dedup key. Duplicates are filtered before insert, the index only catches races.
pub const CREATE_INDEX_SESSION_DEDUPE: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_session_dedupe ON analytics_events(session_id, paper_id, event_type)";

// For per-paper overview and top papers
pub const CREATE_INDEX_PAPER_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_paper_ts ON analytics_events(paper_id, timestamp)";

// For event type filtered geographic queries
pub const CREATE_INDEX_EVENT_TYPE_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_type_ts ON analytics_events(event_type, timestamp)";

pub const CREATE_INDEX_COUNTRY: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_country ON analytics_events(country_code)";

// For time series bucketing
pub const CREATE_INDEX_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_ts ON analytics_events(timestamp)";

// For the expired-entry sweep
pub const CREATE_INDEX_GEO_EXPIRES: &str =
    "CREATE INDEX IF NOT EXISTS idx_geo_expires ON geolocation_cache(expires_at)";

/// Statements applied in order by `Database::run_migrations`
pub const MIGRATIONS: &[&str] = &[
    CREATE_EVENTS_TABLE,
    CREATE_GEOLOCATION_CACHE_TABLE,
    CREATE_PAPERS_TABLE,
    CREATE_INDEX_SESSION_DEDUPE,
    CREATE_INDEX_PAPER_TIMESTAMP,
    CREATE_INDEX_EVENT_TYPE_TIMESTAMP,
    CREATE_INDEX_COUNTRY,
    CREATE_INDEX_TIMESTAMP,
    CREATE_INDEX_GEO_EXPIRES,
];
