use std::time::Duration;
use tracing::{info, warn};

/// Runtime settings for the web dashboard, resolved CLI flag > env var > constant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DashboardSettings {
    pub host: String,
    pub port: u16,
    pub refresh_interval: Duration,
    pub cache_ttl: Duration,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            refresh_interval: Duration::from_secs(REFRESH_INTERVAL_SECS),
            cache_ttl: Duration::from_secs(CACHE_TTL_SECS),
        }
    }
}

impl DashboardSettings {
    pub fn resolve(
        host: Option<String>,
        port: Option<u16>,
        refresh_secs: Option<u64>,
        cache_ttl_secs: Option<u64>,
    ) -> Self {
        let defaults = Self::default();

        let host = host
            .or_else(|| env_string("PSX_DASH_HOST"))
            .unwrap_or(defaults.host);
        let port = port
            .or_else(|| env_parsed::<u16>("PSX_DASH_PORT"))
            .unwrap_or(defaults.port);
        let refresh_secs = refresh_secs
            .or_else(|| env_parsed::<u64>("PSX_DASH_REFRESH_SECS"))
            .unwrap_or(REFRESH_INTERVAL_SECS);
        let cache_ttl_secs = cache_ttl_secs
            .or_else(|| env_parsed::<u64>("PSX_DASH_CACHE_TTL_SECS"))
            .unwrap_or(CACHE_TTL_SECS);

        let refresh_secs = if refresh_secs == 0 {
            warn!(
                "Refresh interval of 0s is not allowed; using {}s instead.",
                REFRESH_INTERVAL_SECS
            );
            REFRESH_INTERVAL_SECS
        } else {
            refresh_secs
        };

        Self {
            host,
            port,
            refresh_interval: Duration::from_secs(refresh_secs),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={} ; value could not be parsed", key, raw);
            None
        }
    }
}

/// Logs which of the documented third-party provider keys are present.
///
/// None of these providers are wired in; prices stay simulated either way.
pub fn report_optional_provider_keys() {
    for key in OPTIONAL_PROVIDER_KEYS {
        if env_string(key).is_some() {
            info!(
                "{} is set, but external data providers are documented only; prices remain simulated.",
                key
            );
        }
    }
}

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
/// Dashboard auto-refresh period.
pub const REFRESH_INTERVAL_SECS: u64 = 300;
/// How long a cached quote snapshot, history or forecast stays valid.
pub const CACHE_TTL_SECS: u64 = 300;
/// Half-width of the uniform intraday jitter applied to base prices.
pub const JITTER_BAND: f64 = 0.015;
/// Days of synthetic history generated per symbol.
pub const DEFAULT_HISTORY_DAYS: usize = 30;
pub const MIN_HISTORY_DAYS: usize = 5;
pub const MAX_HISTORY_DAYS: usize = 365;
pub const DEFAULT_FORECAST_HORIZON: usize = 7;
pub const MAX_FORECAST_HORIZON: usize = 90;
/// Two-sided confidence level used for forecast bands.
pub const FORECAST_CONFIDENCE: f64 = 0.95;
pub const MOVING_AVERAGE_WINDOW: usize = 10;
/// Bar length of the simulated intraday session.
pub const INTRADAY_STEP_MINUTES: i64 = 5;
/// Bars of the previous session's last hour prepended as forecast context.
pub const INTRADAY_CONTEXT_BARS: usize = 12;
/// Upload size ceiling for file analysis.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
/// Number of gainers/losers surfaced in a snapshot.
pub const MOVERS_COUNT: usize = 5;

pub const OPTIONAL_PROVIDER_KEYS: &[&str] = &[
    "ALPHA_VANTAGE_API_KEY",
    "TWELVE_DATA_API_KEY",
    "EODHD_API_KEY",
];
