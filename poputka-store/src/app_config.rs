use poputka_core::Corridor;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
}

fn default_session_ttl() -> u64 { 7 * 24 * 3600 }

/// Age-based eviction of rides and bookings
#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    pub interval_seconds: u64,
    pub retry_seconds: u64,
    pub max_age_days: i64,
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_seconds)
    }

    /// `None` when `max_age_days` does not fit a duration
    pub fn max_age(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_days(self.max_age_days)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 12 * 3600,
            retry_seconds: 3600,
            max_age_days: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListingConfig {
    pub recent_days: i64,
    pub limit: i64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self { recent_days: 2, limit: 10 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MatchingConfig {
    #[serde(default)]
    pub corridor: Corridor,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. POPUTKA_DATABASE__URL, POPUTKA_REDIS__URL
            .add_source(config::Environment::with_prefix("POPUTKA").separator("__"))
            .build()?;

        let config: Config = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.retention.max_age_days < 0 || self.retention.max_age().is_none() {
            return Err(config::ConfigError::Message(format!(
                "retention.max_age_days out of range: {}",
                self.retention.max_age_days
            )));
        }
        let recent = chrono::Duration::try_days(self.listing.recent_days);
        if self.listing.recent_days < 0 || recent.is_none() {
            return Err(config::ConfigError::Message(format!(
                "listing.recent_days out of range: {}",
                self.listing.recent_days
            )));
        }
        Ok(())
    }
}
