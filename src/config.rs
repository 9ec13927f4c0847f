// src/config.rs - Runtime configuration loaded from the environment
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_TRADING_DAEMON_BASE: &str = "http://localhost:8001";
pub const DEFAULT_TICKER: &str = "@ES";
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_CHART_BARS_BACK: u32 = 500;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SETTINGS_DIR: &str = ".dashboard";

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Analytics service serving market data, market state and bars.
    pub api_base: String,
    /// Trading daemon serving AI trade setups.
    pub trading_daemon_base: String,
    pub ticker: String,
    pub refresh_interval: Duration,
    pub chart_bars_back: u32,
    pub request_timeout: Duration,
    pub settings_dir: PathBuf,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            trading_daemon_base: DEFAULT_TRADING_DAEMON_BASE.to_string(),
            ticker: DEFAULT_TICKER.to_string(),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            chart_bars_back: DEFAULT_CHART_BARS_BACK,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            settings_dir: PathBuf::from(DEFAULT_SETTINGS_DIR),
        }
    }
}

impl DashboardConfig {
    /// Read configuration from environment variables (call `dotenv` first).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            api_base: lookup("API_BASE").unwrap_or(defaults.api_base),
            trading_daemon_base: lookup("TRADING_DAEMON_BASE")
                .unwrap_or(defaults.trading_daemon_base),
            ticker: lookup("TICKER").unwrap_or(defaults.ticker),
            refresh_interval: Duration::from_secs(parse_or(
                &lookup,
                "REFRESH_INTERVAL_SECS",
                DEFAULT_REFRESH_INTERVAL_SECS,
            )),
            chart_bars_back: parse_or(&lookup, "CHART_BARS_BACK", DEFAULT_CHART_BARS_BACK),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            settings_dir: lookup("SETTINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_dir),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + PartialOrd + Default + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => value,
            _ => {
                warn!("[CONFIG] Invalid {}='{}', using {}", key, raw, default);
                default
            }
        },
    }
}
