//! IP geolocation: external lookup API behind a persistent, TTL-bound cache

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GeoIpConfig;
use crate::db::{round_coordinate, CachedGeolocation, Database};
use crate::privacy::hash_ip;

/// GeoIP lookup result, exactly as reported by the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoLocation {
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Error)]
pub enum GeoLookupError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider answered with HTTP {0}")]
    Status(u16),
    #[error("provider reported an error: {0}")]
    Provider(String),
    #[error("lookup timed out")]
    Timeout,
    #[error("address is not publicly routable")]
    NotRoutable,
}

/// A service that can place an IP address on the map
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoLookupError>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

/// ipapi.co style JSON API. Failures come back as `{"error": true, "reason": "..."}`.
pub struct IpApiProvider {
    client: reqwest::Client,
    url_template: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    country_code: Option<String>,
    country_name: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    error: bool,
    reason: Option<String>,
}

impl IpApiProvider {
    pub fn new(config: &GeoIpConfig) -> Result<Self, GeoLookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("paperstats/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url_template: config.api_url.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn request_for(&self, ip: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(self.url_template.replace("{ip}", ip));
        match &self.api_key {
            Some(key) => request.query(&[("key", key)]),
            None => request,
        }
    }
}

#[async_trait]
impl GeoLookup for IpApiProvider {
    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoLookupError> {
        let ip_addr: IpAddr = ip.parse().map_err(|_| GeoLookupError::NotRoutable)?;
        if is_private_ip(&ip_addr) {
            return Err(GeoLookupError::NotRoutable);
        }

        let response = self.request_for(ip).send().await?;
        if !response.status().is_success() {
            return Err(GeoLookupError::Status(response.status().as_u16()));
        }

        let body: IpApiResponse = response.json().await?;
        if body.error {
            return Err(GeoLookupError::Provider(body.reason.unwrap_or_else(|| "unspecified".to_string())));
        }

        Ok(body.into_location())
    }

    fn name(&self) -> &'static str {
        "ipapi"
    }
}

impl IpApiResponse {
    fn into_location(self) -> GeoLocation {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        let non_zero = |v: Option<f64>| v.filter(|n| *n != 0.0);

        GeoLocation {
            country_code: non_empty(self.country_code),
            country_name: non_empty(self.country_name),
            city: non_empty(self.city),
            latitude: non_zero(self.latitude),
            longitude: non_zero(self.longitude),
        }
    }
}

/// Check if an IP address is private/local
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private()
                || ipv4.is_loopback()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_documentation()
                || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || (ipv6.segments()[0] & 0xfe00) == 0xfc00
                || (ipv6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Cache-or-lookup resolution. Never fails: any provider or store problem
/// degrades to "no location".
#[derive(Clone)]
pub struct GeoResolver {
    db: Database,
    provider: Arc<dyn GeoLookup>,
    ttl: chrono::Duration,
    timeout: Duration,
}

impl GeoResolver {
    pub fn new(db: Database, provider: Arc<dyn GeoLookup>, config: &GeoIpConfig) -> Self {
        Self {
            db,
            provider,
            ttl: chrono::Duration::days(config.cache_ttl_days),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub async fn resolve(&self, ip: &str) -> Option<GeoLocation> {
        self.resolve_at(ip, Utc::now()).await
    }

    pub(crate) async fn resolve_at(&self, ip: &str, now: DateTime<Utc>) -> Option<GeoLocation> {
        let ip_hash = hash_ip(ip);

        match self.db.get_cached_geolocation(&ip_hash).await {
            Ok(Some(entry)) if !entry.is_expired(now) => {
                debug!("GeoIP cache hit for {}", ip_hash);
                return Some(entry.location);
            }
            Ok(Some(_)) => {
                debug!("GeoIP cache entry for {} expired", ip_hash);
                if let Err(e) = self.db.delete_cached_geolocation(&ip_hash).await {
                    warn!("Failed to delete expired GeoIP cache entry: {}", e);
                }
            }
            Ok(None) => debug!("GeoIP cache miss for {}", ip_hash),
            Err(e) => warn!("GeoIP cache read failed, falling back to {}: {}", self.provider.name(), e),
        }

        let location = match tokio::time::timeout(self.timeout, self.provider.lookup(ip)).await {
            Ok(Ok(location)) => location,
            Ok(Err(GeoLookupError::NotRoutable)) => {
                debug!("Skipping GeoIP lookup for non-routable address");
                return None;
            }
            Ok(Err(e)) => {
                warn!("GeoIP lookup via {} failed: {}", self.provider.name(), e);
                return None;
            }
            Err(_) => {
                warn!("GeoIP lookup via {} failed: {}", self.provider.name(), GeoLookupError::Timeout);
                return None;
            }
        };

        // a miss returns exactly what later hits will read back
        let location = GeoLocation {
            latitude: location.latitude.map(round_coordinate),
            longitude: location.longitude.map(round_coordinate),
            ..location
        };
        let entry = CachedGeolocation {
            location,
            cached_at: now,
            expires_at: now + self.ttl,
        };
        if let Err(e) = self.db.store_cached_geolocation(&ip_hash, &entry).await {
            warn!("Failed to cache geolocation: {}", e);
        }

        Some(entry.location)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{dar_es_salaam, FakeLookup};
    use super::*;
    use crate::config::Config;

    async fn resolver_with(provider: Arc<FakeLookup>) -> (GeoResolver, Database) {
        let db = Database::in_memory().await;
        let resolver = GeoResolver::new(db.clone(), provider, &Config::for_tests().geoip);
        (resolver, db)
    }

    #[tokio::test]
    async fn test_second_resolve_within_ttl_hits_cache() {
        let provider = FakeLookup::found(dar_es_salaam());
        let (resolver, _db) = resolver_with(provider.clone()).await;
        let now = Utc::now();

        let first = resolver.resolve_at("41.59.1.1", now).await;
        let second = resolver.resolve_at("41.59.1.1", now + chrono::Duration::days(29)).await;

        assert_eq!(first, Some(dar_es_salaam()));
        assert_eq!(first, second);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_miss_and_hit_return_identical_coordinates() {
        let precise = GeoLocation {
            latitude: Some(-6.792354123456),
            longitude: Some(39.208328999999),
            ..dar_es_salaam()
        };
        let provider = FakeLookup::found(precise);
        let (resolver, _db) = resolver_with(provider.clone()).await;

        let first = resolver.resolve("41.59.1.1").await.unwrap();
        let second = resolver.resolve("41.59.1.1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.latitude, Some(-6.7923541));
        assert_eq!(first.longitude, Some(39.208329));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_fresh_lookup_and_overwrite() {
        let provider = FakeLookup::found(dar_es_salaam());
        let (resolver, db) = resolver_with(provider.clone()).await;
        let now = Utc::now();

        resolver.resolve_at("41.59.1.1", now).await;
        let later = now + chrono::Duration::days(31);
        let refreshed = resolver.resolve_at("41.59.1.1", later).await;

        assert_eq!(refreshed, Some(dar_es_salaam()));
        assert_eq!(provider.call_count(), 2);

        let entry = db.get_cached_geolocation(&hash_ip("41.59.1.1")).await.unwrap().unwrap();
        assert_eq!(entry.expires_at.timestamp_millis(), (later + chrono::Duration::days(30)).timestamp_millis());
    }

    #[tokio::test]
    async fn test_failed_lookup_is_not_cached() {
        let provider = FakeLookup::failing();
        let (resolver, db) = resolver_with(provider.clone()).await;

        assert_eq!(resolver.resolve("41.59.1.1").await, None);
        assert_eq!(resolver.resolve("41.59.1.1").await, None);

        assert_eq!(provider.call_count(), 2);
        assert!(db.get_cached_geolocation(&hash_ip("41.59.1.1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_still_returns_location() {
        let provider = FakeLookup::found(dar_es_salaam());
        let (resolver, db) = resolver_with(provider.clone()).await;
        db.close().await;

        assert_eq!(resolver.resolve("41.59.1.1").await, Some(dar_es_salaam()));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let provider = FakeLookup::slow(Duration::from_secs(30));
        let db = Database::in_memory().await;
        let mut config = Config::for_tests().geoip;
        config.timeout_secs = 1;
        let resolver = GeoResolver::new(db.clone(), provider.clone(), &config);

        assert_eq!(resolver.resolve("41.59.1.1").await, None);
        assert!(db.get_cached_geolocation(&hash_ip("41.59.1.1")).await.unwrap().is_none());
    }

    #[test]
    fn test_response_normalises_empty_fields() {
        let body: IpApiResponse = serde_json::from_str(
            r#"{"country_code":"TZ","country_name":"Tanzania","city":"","latitude":-6.8,"longitude":0}"#,
        )
        .unwrap();
        assert!(!body.error);

        let location = body.into_location();
        assert_eq!(location.country_code.as_deref(), Some("TZ"));
        assert_eq!(location.city, None);
        assert_eq!(location.latitude, Some(-6.8));
        assert_eq!(location.longitude, None);
    }

    #[test]
    fn test_provider_error_body_parses() {
        let body: IpApiResponse =
            serde_json::from_str(r#"{"ip":"10.0.0.1","error":true,"reason":"Reserved IP Address"}"#).unwrap();
        assert!(body.error);
        assert_eq!(body.reason.as_deref(), Some("Reserved IP Address"));
    }

    #[test]
    fn test_api_key_is_url_encoded() {
        let mut config = Config::for_tests().geoip;
        config.api_key = Some("k&1 23".to_string());
        let provider = IpApiProvider::new(&config).unwrap();
        let request = provider.request_for("8.8.8.8").build().unwrap();
        assert_eq!(request.url().as_str(), "https://ipapi.co/8.8.8.8/json/?key=k%261+23");

        config.api_key = None;
        let provider = IpApiProvider::new(&config).unwrap();
        let request = provider.request_for("8.8.8.8").build().unwrap();
        assert_eq!(request.url().as_str(), "https://ipapi.co/8.8.8.8/json/");
    }

    /// Local stand-in for the lookup API, answering per address
    async fn serve_canned_provider() -> String {
        use axum::extract::{Path, Query};
        use axum::http::StatusCode;
        use axum::response::IntoResponse;
        use axum::routing::get;
        use axum::{Json, Router};
        use serde_json::json;
        use std::collections::HashMap;

        async fn answer(Path(ip): Path<String>, Query(query): Query<HashMap<String, String>>) -> axum::response::Response {
            if query.get("key").map(String::as_str) != Some("k123") {
                return StatusCode::FORBIDDEN.into_response();
            }
            match ip.as_str() {
                "41.59.1.1" => Json(json!({
                    "ip": ip,
                    "city": "Dar es Salaam",
                    "country_code": "TZ",
                    "country_name": "Tanzania",
                    "latitude": -6.8235,
                    "longitude": 39.2695
                }))
                .into_response(),
                "41.59.1.2" => Json(json!({ "ip": ip, "error": true, "reason": "RateLimited" })).into_response(),
                _ => StatusCode::TOO_MANY_REQUESTS.into_response(),
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/:ip/json/", get(answer));
        tokio::spawn(async move { axum::serve(listener, app).await });

        format!("http://{}/{{ip}}/json/", addr)
    }

    #[tokio::test]
    async fn test_lookup_against_http_provider() {
        let mut config = Config::for_tests().geoip;
        config.api_url = serve_canned_provider().await;
        config.api_key = Some("k123".to_string());
        let provider = IpApiProvider::new(&config).unwrap();

        assert_eq!(provider.lookup("41.59.1.1").await.unwrap(), dar_es_salaam());
        assert!(matches!(
            provider.lookup("41.59.1.2").await,
            Err(GeoLookupError::Provider(reason)) if reason == "RateLimited"
        ));
        assert!(matches!(provider.lookup("41.59.1.3").await, Err(GeoLookupError::Status(429))));

        config.api_key = Some("wrong".to_string());
        let provider = IpApiProvider::new(&config).unwrap();
        assert!(matches!(provider.lookup("41.59.1.1").await, Err(GeoLookupError::Status(403))));
    }

    #[tokio::test]
    async fn test_private_addresses_never_reach_provider() {
        let provider = IpApiProvider::new(&Config::for_tests().geoip).unwrap();
        for ip in ["10.1.2.3", "127.0.0.1", "192.168.0.4", "::1", "fe80::1", "not-an-ip"] {
            assert!(matches!(provider.lookup(ip).await, Err(GeoLookupError::NotRoutable)), "{}", ip);
        }
    }
}
