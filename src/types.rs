// src/types.rs - Wire types shared by the data service client and derived views
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Aggregation period in minutes.
pub type Timeframe = u32;

/// Timeframes the analysis service can compute.
pub const AVAILABLE_TIMEFRAMES: [Timeframe; 8] = [1, 3, 5, 10, 15, 30, 60, 120];

/// Timeframes offered for the candlestick chart.
pub const CHART_TIMEFRAMES: [Timeframe; 7] = [1, 3, 5, 10, 15, 30, 60];

/// Key used by the service for per-timeframe maps, e.g. `"5min"`.
pub fn timeframe_key(tf: Timeframe) -> String {
    format!("{}min", tf)
}

/// Short label used in tables and pattern keys, e.g. `"5m"` or `"2h"`.
pub fn timeframe_label(tf: Timeframe) -> String {
    if tf >= 60 {
        if tf % 60 == 0 {
            format!("{}h", tf / 60)
        } else {
            format!("{}h", tf as f64 / 60.0)
        }
    } else {
        format!("{}m", tf)
    }
}

/// Label used on the chart timeframe buttons, e.g. `"5m"` or `"1H"`.
pub fn chart_timeframe_label(tf: Timeframe) -> String {
    timeframe_label(tf).replace('h', "H")
}

// --- /analysis/market_data ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum IndicatorValue {
    Number(f64),
    Text(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IndicatorReading {
    #[serde(default)]
    pub value: Option<IndicatorValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PatternHit {
    pub name: String,
    pub classification: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Bar {
    pub yyyymmdd: u32,
    pub hhmm: u32,
    #[serde(default)]
    pub is_final: bool,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub indicators: BTreeMap<String, IndicatorReading>,
    #[serde(default)]
    pub patterns: Vec<PatternHit>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct OpeningRange {
    pub low: f64,
    pub high: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub session: String,
    pub hhmm: u32,
    pub yyyymmdd: u32,
    #[serde(rename = "ORB5", default, skip_serializing_if = "Option::is_none")]
    pub orb5: Option<OpeningRange>,
    #[serde(rename = "ORB15", default, skip_serializing_if = "Option::is_none")]
    pub orb15: Option<OpeningRange>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TimeframeBars {
    #[serde(default)]
    pub bars: Vec<Bar>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MarketDataResponse {
    pub ticker: String,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub data: HashMap<String, TimeframeBars>,
}

impl MarketDataResponse {
    /// Most recent bar the service returned for a timeframe.
    pub fn latest_bar(&self, tf: Timeframe) -> Option<&Bar> {
        self.data.get(&timeframe_key(tf))?.bars.first()
    }
}

// --- /analysis/market_state ---

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IndicatorSemantic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momentum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proximity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regime: Option<String>,
}

impl IndicatorSemantic {
    /// Descriptors that are present, in field order.
    pub fn descriptors(&self) -> Vec<&str> {
        [
            &self.level,
            &self.momentum,
            &self.price_position,
            &self.proximity,
            &self.slope,
            &self.strength,
            &self.volatility,
            &self.trend,
            &self.participation,
            &self.bias,
            &self.divergence,
            &self.regime,
        ]
        .into_iter()
        .filter_map(|d| d.as_deref())
        .filter(|d| !d.is_empty())
        .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TimeframeState {
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub indicators: BTreeMap<String, IndicatorSemantic>,
    #[serde(default)]
    pub patterns: Vec<PatternHit>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StructuralBias {
    pub cpr_relationship: String,
    pub bias_direction: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PivotLevel {
    pub id: String,
    pub raw_id: String,
    pub price: f64,
    pub confidence: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ActiveZone {
    #[serde(default)]
    pub floor_level: Option<PivotLevel>,
    #[serde(default)]
    pub ceiling_level: Option<PivotLevel>,
    #[serde(default)]
    pub zone_width: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Pivots {
    #[serde(default)]
    pub structural_bias: Option<StructuralBias>,
    #[serde(default)]
    pub active_zone: Option<ActiveZone>,
    #[serde(default)]
    pub primary_interaction: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MarketStateResponse {
    pub ticker: String,
    #[serde(default)]
    pub latest_price: Option<f64>,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub state: HashMap<String, TimeframeState>,
    #[serde(default)]
    pub pivots: Option<Pivots>,
}

// --- /api/trade_setups ---

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TradeSetup {
    pub status: String,
    pub entry_zone: String,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub trigger_condition: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct KeyLevels {
    #[serde(default)]
    pub support: Vec<f64>,
    #[serde(default)]
    pub resistance: Vec<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TradeSetupsResponse {
    pub last_updated: String,
    pub bias: String,
    pub confidence: f64,
    pub rationale: String,
    pub bullish_setup: TradeSetup,
    pub bearish_setup: TradeSetup,
    #[serde(default)]
    pub key_levels: Option<KeyLevels>,
}

// --- /bars/{ticker} ---

/// Bar as returned by the bars endpoint, before timestamp alignment.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawChartBar {
    pub bar_datetime: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Candle in the chart's epoch-second convention.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ChartBar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

// --- Patterns ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Bullish,
    Bearish,
    Neutral,
}

impl Classification {
    pub fn from_label(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "bullish" => Classification::Bullish,
            "bearish" => Classification::Bearish,
            _ => Classification::Neutral,
        }
    }

    pub fn is_bullish(&self) -> bool {
        matches!(self, Classification::Bullish)
    }
}

/// A detected pattern tied to the bar it was found on.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PatternOccurrence {
    pub name: String,
    pub classification: String,
    /// Display label of the detection timeframe, e.g. `"5m"`.
    pub timeframe: String,
    pub timeframe_minutes: Timeframe,
    pub yyyymmdd: u32,
    pub hhmm: u32,
}

impl PatternOccurrence {
    /// Visibility key, `"{name}-{timeframe}"`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.name, self.timeframe)
    }

    pub fn classification(&self) -> Classification {
        Classification::from_label(&self.classification)
    }
}
