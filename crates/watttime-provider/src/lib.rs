//! WattTime Forecast Provider
//!
//! Answers carbon-intensity queries for grid zones from the WattTime v3
//! marginal emissions forecast (`co2_moer`, lbs/MWh, 5-minute intervals).
//!
//! | Query | Forecast horizon | Answer |
//! |-------|------------------|--------|
//! | point now | 1 h | earliest point |
//! | point at a future time | 24..168 h | interval covering the time |
//! | best until | ceil(h) to target | minimum point starting ≤ target |
//! | batch average now | ceil(minutes / 60) | mean over `[now, now + minutes]` |
//! | best batch window | ceil(h) to until | lowest-mean contiguous window |
//!
//! # Usage
//!
//! ```rust,ignore
//! let signals = WattTimeSignals::from_config(WattTimeConfig::from_env(), audit)?;
//! let pick = signals.best_until("CAISO_NORTH", until, &ctx).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod backend;
pub mod parse;
pub mod provider;
pub mod token;
pub mod window;

pub use backend::{ForecastBackend, ForecastFetch, WattTimeBackend};
pub use carbon_core::SignalError;
pub use parse::parse_forecast;
pub use provider::WattTimeSignals;
pub use token::TokenCache;

pub type Result<T> = std::result::Result<T, SignalError>;

/// Minimum token lifetime, whatever the configuration says
pub const MIN_TOKEN_CACHE_MINUTES: i64 = 5;

/// One forecast interval; `value` is lbs/MWh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
}

/// WattTime API configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct WattTimeConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Token lifetime in minutes (floored at 5)
    pub token_cache_minutes: i64,
    /// Request timeout in seconds
    pub timeout_sec: u64,
    pub signal_type: String,
}

impl Default for WattTimeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.watttime.org".to_string(),
            username: String::new(),
            password: String::new(),
            token_cache_minutes: 55,
            timeout_sec: 30,
            signal_type: "co2_moer".to_string(),
        }
    }
}

impl WattTimeConfig {
    /// Defaults overridden by `WATTTIME_BASE_URL`, `WATTTIME_USERNAME`,
    /// `WATTTIME_PASSWORD` and `WATTTIME_TOKEN_CACHE_MINUTES`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("WATTTIME_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url.trim().to_string();
            }
        }
        if let Ok(user) = std::env::var("WATTTIME_USERNAME") {
            config.username = user;
        }
        if let Ok(pass) = std::env::var("WATTTIME_PASSWORD") {
            config.password = pass;
        }
        if let Some(minutes) = std::env::var("WATTTIME_TOKEN_CACHE_MINUTES")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            config.token_cache_minutes = minutes;
        }
        config
    }

    pub fn token_ttl_minutes(&self) -> i64 {
        self.token_cache_minutes.max(MIN_TOKEN_CACHE_MINUTES)
    }
}

impl std::fmt::Debug for WattTimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WattTimeConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("token_cache_minutes", &self.token_cache_minutes)
            .field("timeout_sec", &self.timeout_sec)
            .field("signal_type", &self.signal_type)
            .finish()
    }
}
