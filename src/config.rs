//! Configuration management

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub geoip: GeoIpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a query may wait for a free pool connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    8
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoIpConfig {
    /// Lookup URL, `{ip}` is replaced with the address being resolved
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: i64,
    /// Interval of the expired-entry sweep, 0 disables it
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_cache_ttl_days() -> i64 {
    30
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Shared secret expected in `Authorization: Bearer <secret>` on the tracking endpoint
    #[serde(default)]
    pub analytics_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";

        let builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.url", "paperstats.db")?
            .set_default("geoip.api_url", "https://ipapi.co/{ip}/json/")?
            .set_default("logging.level", "info")?
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("PAPERSTATS").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Invalid port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be at least 1");
        }

        if !self.geoip.api_url.contains("{ip}") {
            anyhow::bail!("geoip.api_url '{}' must contain an {{ip}} placeholder", self.geoip.api_url);
        }
        if self.geoip.timeout_secs == 0 {
            anyhow::bail!("geoip.timeout_secs must be greater than 0");
        }
        if self.geoip.cache_ttl_days <= 0 {
            anyhow::bail!("geoip.cache_ttl_days must be greater than 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        Ok(())
    }

    /// Configured tracking secret, blank values count as unset
    pub fn analytics_secret(&self) -> Option<&str> {
        self.auth
            .analytics_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: ":memory:".to_string(),
                max_connections: 1,
                acquire_timeout_secs: 5,
            },
            geoip: GeoIpConfig {
                api_url: "https://ipapi.co/{ip}/json/".to_string(),
                api_key: None,
                timeout_secs: 2,
                cache_ttl_days: 30,
                cleanup_interval_secs: 0,
            },
            auth: AuthConfig {
                analytics_secret: Some("test-secret".to_string()),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}
