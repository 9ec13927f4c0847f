// src/errors.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} fetch failed: {status}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Timeframe {0} is not supported")]
    InvalidTimeframe(u32),

    #[error("Invalid exchange timestamp: date {yyyymmdd}, time {hhmm}")]
    InvalidExchangeTime { yyyymmdd: u32, hhmm: u32 },

    #[error("Invalid bar datetime: {0}")]
    InvalidBarDatetime(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Refresh cycle failed: {0}")]
    Orchestration(String),
}

pub type Result<T> = std::result::Result<T, DashboardError>;
