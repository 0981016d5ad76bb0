//! Persistent geolocation cache keyed by IP hash

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{from_millis, round_coordinate, Database};
use crate::geoip::GeoLocation;

/// A cached provider answer. Logically invalid once `expires_at` has passed.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedGeolocation {
    pub location: GeoLocation,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedGeolocation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

type CacheRow = (Option<String>, Option<String>, Option<String>, Option<f64>, Option<f64>, i64, i64);

impl Database {
    pub async fn get_cached_geolocation(&self, ip_hash: &str) -> Result<Option<CachedGeolocation>> {
        let row: Option<CacheRow> = sqlx::query_as(
            r#"
            SELECT country_code, country_name, city, latitude, longitude, cached_at, expires_at
            FROM geolocation_cache
            WHERE ip_hash = ?
            "#,
        )
        .bind(ip_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(country_code, country_name, city, latitude, longitude, cached_at, expires_at)| {
            CachedGeolocation {
                location: GeoLocation {
                    country_code,
                    country_name,
                    city,
                    latitude,
                    longitude,
                },
                cached_at: from_millis(cached_at),
                expires_at: from_millis(expires_at),
            }
        }))
    }

    /// Store an entry, replacing whatever was cached for this hash
    pub async fn store_cached_geolocation(&self, ip_hash: &str, entry: &CachedGeolocation) -> Result<()> {
        if entry.expires_at <= entry.cached_at {
            anyhow::bail!("geolocation cache entry must expire after it was cached");
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO geolocation_cache (ip_hash, country_code, country_name, city, latitude, longitude, cached_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ip_hash)
        .bind(&entry.location.country_code)
        .bind(&entry.location.country_name)
        .bind(&entry.location.city)
        .bind(entry.location.latitude.map(round_coordinate))
        .bind(entry.location.longitude.map(round_coordinate))
        .bind(entry.cached_at.timestamp_millis())
        .bind(entry.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_cached_geolocation(&self, ip_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM geolocation_cache WHERE ip_hash = ?")
            .bind(ip_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every entry that expired at or before `now`. Returns the number removed.
    pub async fn purge_expired_geolocations(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM geolocation_cache WHERE expires_at <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
