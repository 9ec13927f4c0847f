// src/views.rs - Table and summary views derived from a refresh snapshot
use std::collections::BTreeSet;

use crate::markers::{
    classification_counts, collect_pattern_occurrences, derive_markers_with_offset, format_pattern_name,
    ChartMarker, PatternVisibility,
};
use crate::settings::DashboardSettings;
use crate::store::RefreshSnapshot;
use crate::types::{
    chart_timeframe_label, timeframe_key, timeframe_label, IndicatorValue, MarketDataResponse, MarketStateResponse,
    PatternOccurrence, PivotLevel, Timeframe, TradeSetup, TradeSetupsResponse,
};

pub const MISSING_VALUE: &str = "—";

const INDICATOR_LABELS: [(&str, &str); 10] = [
    ("RSI14", "RSI (14)"),
    ("SMA20", "SMA (20)"),
    ("EMA20", "EMA (20)"),
    ("ADX14", "ADX (14)"),
    ("ATR14", "ATR (14)"),
    ("VOLUME_SMA20", "Volume SMA"),
    ("CVD", "CVD"),
    ("POC", "POC"),
    ("VWAP", "VWAP"),
    ("REGIME_ADX14_SMA50", "Regime"),
];

const LEVEL_LABELS: [(&str, &str); 15] = [
    ("pp", "Pivot Point (PP)"),
    ("tc", "Top Central (TC)"),
    ("bc", "Bottom Central (BC)"),
    ("r1", "Resistance 1 (R1)"),
    ("r2", "Resistance 2 (R2)"),
    ("r3", "Resistance 3 (R3)"),
    ("r4", "Resistance 4 (R4)"),
    ("s1", "Support 1 (S1)"),
    ("s2", "Support 2 (S2)"),
    ("s3", "Support 3 (S3)"),
    ("s4", "Support 4 (S4)"),
    ("h3", "Camarilla H3"),
    ("h4", "Camarilla H4"),
    ("l3", "Camarilla L3"),
    ("l4", "Camarilla L4"),
];

/// Friendly indicator name, falling back to the raw name.
pub fn indicator_label(name: &str) -> String {
    INDICATOR_LABELS
        .iter()
        .find(|(raw, _)| *raw == name)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Friendly pivot level name for a raw id such as `"R1"`.
pub fn level_label(raw_id: &str) -> String {
    let lowered = raw_id.to_lowercase();
    LEVEL_LABELS
        .iter()
        .find(|(raw, _)| *raw == lowered)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| raw_id.to_string())
}

/// Numbers get fewer decimals the larger they are; text passes through.
pub fn format_value(value: Option<&IndicatorValue>) -> String {
    match value {
        None => MISSING_VALUE.to_string(),
        Some(IndicatorValue::Text(text)) => text.clone(),
        Some(IndicatorValue::Number(n)) if n.abs() >= 1000.0 => format!("{:.0}", n),
        Some(IndicatorValue::Number(n)) if n.abs() >= 100.0 => format!("{:.1}", n),
        Some(IndicatorValue::Number(n)) => format!("{:.2}", n),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRow {
    pub name: String,
    pub label: String,
    /// One cell per selected timeframe, in selection order.
    pub values: Vec<String>,
    /// Semantic descriptors from the finest selected timeframe.
    pub semantic: String,
}

/// Rows for every indicator reported on any selected timeframe, sorted by name.
pub fn indicator_rows(
    market_data: Option<&MarketDataResponse>,
    market_state: Option<&MarketStateResponse>,
    timeframes: &[Timeframe],
) -> Vec<IndicatorRow> {
    let Some(market_data) = market_data else {
        return Vec::new();
    };

    let names: BTreeSet<&str> = timeframes
        .iter()
        .filter_map(|&tf| market_data.latest_bar(tf))
        .flat_map(|bar| bar.indicators.keys().map(String::as_str))
        .collect();

    names
        .into_iter()
        .map(|name| IndicatorRow {
            name: name.to_string(),
            label: indicator_label(name),
            values: timeframes
                .iter()
                .map(|&tf| match market_data.latest_bar(tf).and_then(|bar| bar.indicators.get(name)) {
                    Some(reading) => format_value(reading.value.as_ref()),
                    None => MISSING_VALUE.to_string(),
                })
                .collect(),
            semantic: semantic_text(market_state, timeframes, name),
        })
        .collect()
}

fn semantic_text(market_state: Option<&MarketStateResponse>, timeframes: &[Timeframe], name: &str) -> String {
    let Some(finest) = timeframes.iter().min() else {
        return String::new();
    };
    market_state
        .and_then(|state| state.state.get(&timeframe_key(*finest)))
        .and_then(|tf_state| tf_state.indicators.get(name))
        .map(|semantic| semantic.descriptors().join(", "))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternRow {
    pub key: String,
    pub label: String,
    pub classification: String,
    pub timeframe: String,
    pub visible: bool,
}

pub fn pattern_rows(patterns: &[PatternOccurrence], visibility: &PatternVisibility) -> Vec<PatternRow> {
    patterns
        .iter()
        .map(|p| {
            let key = p.key();
            PatternRow {
                visible: visibility.is_visible(&key),
                key,
                label: format_pattern_name(&p.name),
                classification: p.classification.clone(),
                timeframe: p.timeframe.clone(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelRow {
    pub label: String,
    pub price: String,
}

impl LevelRow {
    fn from_level(level: &PivotLevel) -> Self {
        Self {
            label: level_label(&level.raw_id),
            price: format!("{:.2}", level.price),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotSummary {
    pub bias_direction: Option<String>,
    pub cpr_relationship: Option<String>,
    pub floor: Option<LevelRow>,
    pub ceiling: Option<LevelRow>,
    pub zone_width: Option<String>,
    pub primary_interaction: Option<String>,
    pub latest_price: Option<String>,
}

/// `None` when the service reported no pivots.
pub fn pivot_summary(market_state: &MarketStateResponse) -> Option<PivotSummary> {
    let pivots = market_state.pivots.as_ref()?;
    let bias = pivots.structural_bias.as_ref();
    let zone = pivots.active_zone.as_ref();

    Some(PivotSummary {
        bias_direction: bias.map(|b| b.bias_direction.clone()),
        cpr_relationship: bias.map(|b| b.cpr_relationship.replace('_', " ")),
        floor: zone.and_then(|z| z.floor_level.as_ref()).map(LevelRow::from_level),
        ceiling: zone.and_then(|z| z.ceiling_level.as_ref()).map(LevelRow::from_level),
        zone_width: zone.and_then(|z| z.zone_width).map(|w| format!("{:.2}", w)),
        primary_interaction: pivots.primary_interaction.clone(),
        latest_price: market_state.latest_price.map(|p| format!("{:.2}", p)),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetupLine {
    pub status: String,
    pub entry_zone: String,
    pub stop_loss: String,
    pub targets: String,
    pub trigger: String,
}

impl From<&TradeSetup> for SetupLine {
    fn from(setup: &TradeSetup) -> Self {
        Self {
            status: setup.status.clone(),
            entry_zone: setup.entry_zone.clone(),
            stop_loss: format!("{:.2}", setup.stop_loss),
            targets: format!("T1: {:.2} | T2: {:.2}", setup.target_1, setup.target_2),
            trigger: setup.trigger_condition.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetupSummary {
    pub last_updated: String,
    pub bias: String,
    pub confidence: String,
    pub rationale: String,
    pub bullish: SetupLine,
    pub bearish: SetupLine,
    pub support: Option<String>,
    pub resistance: Option<String>,
}

fn join_levels(levels: &[f64]) -> Option<String> {
    if levels.is_empty() {
        return None;
    }
    Some(
        levels
            .iter()
            .map(|l| format!("{:.2}", l))
            .collect::<Vec<_>>()
            .join(" | "),
    )
}

pub fn trade_setup_summary(setups: &TradeSetupsResponse) -> SetupSummary {
    let key_levels = setups.key_levels.as_ref();
    SetupSummary {
        last_updated: setups.last_updated.clone(),
        bias: setups.bias.clone(),
        confidence: format!("{}/10", setups.confidence),
        rationale: setups.rationale.clone(),
        bullish: SetupLine::from(&setups.bullish_setup),
        bearish: SetupLine::from(&setups.bearish_setup),
        support: key_levels.and_then(|k| join_levels(&k.support)),
        resistance: key_levels.and_then(|k| join_levels(&k.resistance)),
    }
}

/// Everything a renderer needs, computed from one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub timeframe_labels: Vec<String>,
    pub indicators: Vec<IndicatorRow>,
    pub patterns: Vec<PatternRow>,
    /// Bullish, bearish and neutral pattern counts.
    pub pattern_counts: (usize, usize, usize),
    pub markers: Vec<ChartMarker>,
    pub pivots: Option<PivotSummary>,
    pub setups: Option<SetupSummary>,
    pub chart_bar_count: usize,
    /// Chart timeframe as shown on the chart buttons, e.g. `"1H"`.
    pub chart_label: String,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_update: Option<String>,
}

impl DashboardView {
    pub fn build(
        snapshot: &RefreshSnapshot,
        settings: &DashboardSettings,
        visibility: &PatternVisibility,
        viewer_offset_secs: i32,
    ) -> Self {
        let occurrences = snapshot
            .market_data
            .as_ref()
            .map(|data| collect_pattern_occurrences(data, &settings.timeframes))
            .unwrap_or_default();

        Self {
            timeframe_labels: settings.timeframes.iter().map(|&tf| timeframe_label(tf)).collect(),
            indicators: indicator_rows(
                snapshot.market_data.as_ref(),
                snapshot.market_state.as_ref(),
                &settings.timeframes,
            ),
            markers: derive_markers_with_offset(
                &occurrences,
                visibility,
                settings.chart_timeframe,
                viewer_offset_secs,
            ),
            patterns: pattern_rows(&occurrences, visibility),
            pattern_counts: classification_counts(&occurrences),
            pivots: snapshot.market_state.as_ref().and_then(pivot_summary),
            setups: snapshot.trade_setups.as_ref().map(trade_setup_summary),
            chart_bar_count: snapshot.chart_bars.len(),
            chart_label: chart_timeframe_label(settings.chart_timeframe),
            is_loading: snapshot.is_loading,
            error: snapshot.error.clone(),
            last_update: snapshot
                .last_update
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        }
    }

    /// One-line status used by the console observer.
    pub fn summary_line(&self) -> String {
        let bias = self
            .pivots
            .as_ref()
            .and_then(|p| p.bias_direction.clone())
            .unwrap_or_else(|| MISSING_VALUE.to_string());
        let setup_bias = self
            .setups
            .as_ref()
            .map(|s| format!("{} ({})", s.bias, s.confidence))
            .unwrap_or_else(|| "no setups".to_string());

        format!(
            "updated {} | tf [{}] | {} indicators | {} patterns, {} markers | {} {} bars | pivot bias {} | setups {}{}",
            self.last_update.as_deref().unwrap_or("never"),
            self.timeframe_labels.join(","),
            self.indicators.len(),
            self.patterns.len(),
            self.markers.len(),
            self.chart_bar_count,
            self.chart_label,
            bias,
            setup_bias,
            self.error
                .as_ref()
                .map(|e| format!(" | error: {}", e))
                .unwrap_or_default()
        )
    }
}
