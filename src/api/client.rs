// src/api/client.rs - Data service client
//
// Stateless request/response wrappers for the analytics service and the trading
// daemon. The refresh coordinator only talks to the MarketDataSource trait.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::alignment::{chart_bar_time, viewer_offset_secs};
use crate::config::DashboardConfig;
use crate::errors::{DashboardError, Result};
use crate::types::{
    ChartBar, MarketDataResponse, MarketStateResponse, RawChartBar, Timeframe,
    TradeSetupsResponse,
};

/// The four independent sources polled every refresh cycle.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Latest bar, indicators and patterns per timeframe.
    async fn fetch_market_data(&self, timeframes: &[Timeframe]) -> Result<MarketDataResponse>;

    /// Semantic indicator state and pivots per timeframe.
    async fn fetch_market_state(&self, timeframes: &[Timeframe]) -> Result<MarketStateResponse>;

    /// OHLCV bars for the chart, already in chart time.
    async fn fetch_chart_bars(&self, timeframe: Timeframe, bars_back: u32) -> Result<Vec<ChartBar>>;

    /// AI trade setups. `Ok(None)` means the daemon has nothing to offer.
    async fn fetch_trade_setups(&self) -> Result<Option<TradeSetupsResponse>>;
}

pub struct HttpDataClient {
    client: Client,
    api_base: Url,
    trading_daemon_base: Url,
    ticker: String,
    timeout: Duration,
}

impl HttpDataClient {
    pub fn new(config: &DashboardConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_base: parse_base(&config.api_base)?,
            trading_daemon_base: parse_base(&config.trading_daemon_base)?,
            ticker: config.ticker.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn market_data_url(&self) -> Result<Url> {
        endpoint(&self.api_base, &["analysis", "market_data"])
    }

    pub fn market_state_url(&self) -> Result<Url> {
        endpoint(&self.api_base, &["analysis", "market_state"])
    }

    pub fn bars_url(&self, timeframe: Timeframe, bars_back: u32) -> Result<Url> {
        let mut url = endpoint(&self.api_base, &["bars", &self.ticker])?;
        url.query_pairs_mut()
            .append_pair("timeframe", &timeframe.to_string())
            .append_pair("bars_back", &bars_back.to_string());
        Ok(url)
    }

    pub fn trade_setups_url(&self) -> Result<Url> {
        endpoint(&self.trading_daemon_base, &["api", "trade_setups"])
    }

    async fn try_fetch_trade_setups(&self) -> Result<Option<TradeSetupsResponse>> {
        let response = self
            .client
            .get(self.trade_setups_url()?)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            debug!("[API] Trade setups unavailable: {}", response.status());
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }
}

#[async_trait]
impl MarketDataSource for HttpDataClient {
    async fn fetch_market_data(&self, timeframes: &[Timeframe]) -> Result<MarketDataResponse> {
        let response = self
            .client
            .post(self.market_data_url()?)
            .timeout(self.timeout)
            .json(&json!({
                "ticker": self.ticker,
                "bars_back": 1,
                "timeframes": timeframes,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DashboardError::Status {
                endpoint: "Market data",
                status: response.status(),
            });
        }
        Ok(response.json().await?)
    }

    async fn fetch_market_state(&self, timeframes: &[Timeframe]) -> Result<MarketStateResponse> {
        let response = self
            .client
            .post(self.market_state_url()?)
            .timeout(self.timeout)
            .json(&json!({
                "ticker": self.ticker,
                "timeframes": timeframes,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DashboardError::Status {
                endpoint: "Market state",
                status: response.status(),
            });
        }
        Ok(response.json().await?)
    }

    async fn fetch_chart_bars(&self, timeframe: Timeframe, bars_back: u32) -> Result<Vec<ChartBar>> {
        let response = self
            .client
            .get(self.bars_url(timeframe, bars_back)?)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DashboardError::Status {
                endpoint: "Bars",
                status: response.status(),
            });
        }

        let raw: Vec<RawChartBar> = response.json().await?;
        Ok(to_chart_bars(raw, viewer_offset_secs()))
    }

    async fn fetch_trade_setups(&self) -> Result<Option<TradeSetupsResponse>> {
        match self.try_fetch_trade_setups().await {
            Ok(setups) => Ok(setups),
            Err(e) => {
                debug!("[API] Trade setups fetch failed, treating as no data: {}", e);
                Ok(None)
            }
        }
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    if url.cannot_be_a_base() {
        return Err(DashboardError::Config(format!("'{}' cannot be used as a base URL", raw)));
    }
    Ok(url)
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| DashboardError::Config(format!("'{}' cannot be used as a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Convert raw bars into chart time, dropping bars whose datetime cannot be read.
pub fn to_chart_bars(raw: Vec<RawChartBar>, viewer_offset_secs: i32) -> Vec<ChartBar> {
    raw.into_iter()
        .filter_map(|bar| match chart_bar_time(&bar.bar_datetime, viewer_offset_secs) {
            Ok(time) => Some(ChartBar {
                time,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            }),
            Err(e) => {
                warn!("[API] Skipping bar: {}", e);
                None
            }
        })
        .collect()
}
