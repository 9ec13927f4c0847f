// src/markers.rs - Chart annotations derived from detected patterns
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::alignment::{align_exchange_time_with_offset, viewer_offset_secs};
use crate::types::{timeframe_label, Classification, MarketDataResponse, PatternOccurrence, Timeframe};

pub const BULLISH_COLOR: &str = "#26a69a";
pub const BEARISH_COLOR: &str = "#ef5350";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MarkerPosition {
    BelowBar,
    AboveBar,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MarkerShape {
    ArrowUp,
    ArrowDown,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChartMarker {
    pub time: i64,
    pub position: MarkerPosition,
    pub color: &'static str,
    pub shape: MarkerShape,
    pub text: String,
}

/// `"three_white_soldiers"` -> `"Three White Soldiers"`.
pub fn format_pattern_name(name: &str) -> String {
    name.split('_')
        .map(|token| {
            let mut chars = token.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Patterns on the latest bar of each selected timeframe, in selection order.
pub fn collect_pattern_occurrences(
    market_data: &MarketDataResponse,
    timeframes: &[Timeframe],
) -> Vec<PatternOccurrence> {
    let mut occurrences = Vec::new();
    for &tf in timeframes {
        let Some(bar) = market_data.latest_bar(tf) else {
            continue;
        };
        let label = timeframe_label(tf);
        occurrences.extend(bar.patterns.iter().map(|hit| PatternOccurrence {
            name: hit.name.clone(),
            classification: hit.classification.clone(),
            timeframe: label.clone(),
            timeframe_minutes: tf,
            yyyymmdd: bar.yyyymmdd,
            hhmm: bar.hhmm,
        }));
    }
    occurrences
}

/// Set of pattern keys (`"{name}-{timeframe}"`) the user chose to show on the chart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternVisibility {
    visible: BTreeSet<String>,
}

impl PatternVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the key if absent, remove it if present. Returns the new visibility.
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.visible.remove(key) {
            false
        } else {
            self.visible.insert(key.to_string());
            true
        }
    }

    pub fn is_visible(&self, key: &str) -> bool {
        self.visible.contains(key)
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.visible.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PatternVisibility {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            visible: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Markers for visible patterns on the chart timeframe, using the viewer offset observed now.
pub fn derive_markers(
    patterns: &[PatternOccurrence],
    visibility: &PatternVisibility,
    chart_timeframe: Timeframe,
) -> Vec<ChartMarker> {
    derive_markers_with_offset(patterns, visibility, chart_timeframe, viewer_offset_secs())
}

pub fn derive_markers_with_offset(
    patterns: &[PatternOccurrence],
    visibility: &PatternVisibility,
    chart_timeframe: Timeframe,
    viewer_offset_secs: i32,
) -> Vec<ChartMarker> {
    let mut markers: Vec<ChartMarker> = patterns
        .iter()
        .filter(|p| p.timeframe_minutes == chart_timeframe && visibility.is_visible(&p.key()))
        .filter_map(|p| {
            let time = match align_exchange_time_with_offset(p.yyyymmdd, p.hhmm, viewer_offset_secs) {
                Ok(time) => time,
                Err(e) => {
                    warn!("[MARKERS] Skipping {}: {}", p.key(), e);
                    return None;
                }
            };
            Some(marker_for(p, time))
        })
        .collect();

    markers.sort_by_key(|m| m.time);
    debug!("[MARKERS] {} markers on {}m chart", markers.len(), chart_timeframe);
    markers
}

fn marker_for(pattern: &PatternOccurrence, time: i64) -> ChartMarker {
    let bullish = pattern.classification().is_bullish();
    ChartMarker {
        time,
        position: if bullish {
            MarkerPosition::BelowBar
        } else {
            MarkerPosition::AboveBar
        },
        color: if bullish { BULLISH_COLOR } else { BEARISH_COLOR },
        shape: if bullish {
            MarkerShape::ArrowUp
        } else {
            MarkerShape::ArrowDown
        },
        text: format_pattern_name(&pattern.name),
    }
}

/// Bullish/bearish/neutral counts, used by the pattern list summary.
pub fn classification_counts(patterns: &[PatternOccurrence]) -> (usize, usize, usize) {
    patterns
        .iter()
        .fold((0, 0, 0), |(bull, bear, neutral), p| match p.classification() {
            Classification::Bullish => (bull + 1, bear, neutral),
            Classification::Bearish => (bull, bear + 1, neutral),
            Classification::Neutral => (bull, bear, neutral + 1),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, PatternHit, TimeframeBars};
    use std::collections::HashMap;

    fn occurrence(name: &str, class: &str, tf: Timeframe, yyyymmdd: u32, hhmm: u32) -> PatternOccurrence {
        PatternOccurrence {
            name: name.to_string(),
            classification: class.to_string(),
            timeframe: timeframe_label(tf),
            timeframe_minutes: tf,
            yyyymmdd,
            hhmm,
        }
    }

    #[test]
    fn test_format_pattern_name() {
        assert_eq!(format_pattern_name("three_white_soldiers"), "Three White Soldiers");
        assert_eq!(format_pattern_name("doji"), "Doji");
        assert_eq!(format_pattern_name("bullish__engulfing"), "Bullish  Engulfing");
    }

    #[test]
    fn test_only_visible_patterns_on_chart_timeframe() {
        let patterns = vec![
            occurrence("doji", "neutral", 5, 20240315, 930),
            occurrence("doji", "neutral", 15, 20240315, 930),
        ];
        let visible: PatternVisibility = ["doji-5m"].into_iter().collect();

        let markers = derive_markers_with_offset(&patterns, &visible, 5, 0);

        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].text, "Doji");
        assert_eq!(markers[0].position, MarkerPosition::AboveBar);
        assert_eq!(markers[0].color, BEARISH_COLOR);
        assert_eq!(markers[0].shape, MarkerShape::ArrowDown);
    }

    #[test]
    fn test_bullish_marker_style() {
        let patterns = vec![occurrence("hammer", "BULLISH", 1, 20240101, 930)];
        let visible: PatternVisibility = ["hammer-1m"].into_iter().collect();

        let markers = derive_markers_with_offset(&patterns, &visible, 1, 0);

        assert_eq!(
            markers,
            vec![ChartMarker {
                time: 1_704_119_400,
                position: MarkerPosition::BelowBar,
                color: BULLISH_COLOR,
                shape: MarkerShape::ArrowUp,
                text: "Hammer".to_string(),
            }]
        );
    }

    #[test]
    fn test_markers_sorted_and_stable() {
        let patterns = vec![
            occurrence("late", "bullish", 5, 20240315, 1000),
            occurrence("first_tie", "bearish", 5, 20240315, 930),
            occurrence("second_tie", "bullish", 5, 20240315, 930),
            occurrence("early", "bearish", 5, 20240314, 1600),
        ];
        let visible: PatternVisibility = patterns.iter().map(|p| p.key()).collect();

        let markers = derive_markers_with_offset(&patterns, &visible, 5, -4 * 3600);
        let texts: Vec<&str> = markers.iter().map(|m| m.text.as_str()).collect();

        assert_eq!(texts, vec!["Early", "First Tie", "Second Tie", "Late"]);
        assert!(markers.windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(markers, derive_markers_with_offset(&patterns, &visible, 5, -4 * 3600));
    }

    #[test]
    fn test_invalid_timestamp_is_skipped() {
        let patterns = vec![
            occurrence("doji", "neutral", 5, 20241332, 930),
            occurrence("hammer", "bullish", 5, 20240315, 930),
        ];
        let visible: PatternVisibility = patterns.iter().map(|p| p.key()).collect();

        let markers = derive_markers_with_offset(&patterns, &visible, 5, 0);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].text, "Hammer");
    }

    #[test]
    fn test_visibility_toggle() {
        let mut visibility = PatternVisibility::new();
        assert!(visibility.toggle("doji-5m"));
        assert!(visibility.is_visible("doji-5m"));
        assert!(!visibility.toggle("doji-5m"));
        assert!(visibility.is_empty());
    }

    #[test]
    fn test_collect_occurrences_follows_selection_order() {
        let bar = |yyyymmdd, hhmm, names: &[(&str, &str)]| Bar {
            yyyymmdd,
            hhmm,
            patterns: names
                .iter()
                .map(|(name, class)| PatternHit {
                    name: name.to_string(),
                    classification: class.to_string(),
                })
                .collect(),
            ..Default::default()
        };
        let mut data = HashMap::new();
        data.insert(
            "5min".to_string(),
            TimeframeBars {
                bars: vec![bar(20240315, 1005, &[("doji", "neutral"), ("hammer", "bullish")])],
            },
        );
        data.insert(
            "1min".to_string(),
            TimeframeBars {
                bars: vec![bar(20240315, 1009, &[("shooting_star", "bearish")])],
            },
        );
        let market_data = MarketDataResponse {
            ticker: "@ES".to_string(),
            data,
            ..Default::default()
        };

        let occurrences = collect_pattern_occurrences(&market_data, &[1, 5, 30]);

        let keys: Vec<String> = occurrences.iter().map(|o| o.key()).collect();
        assert_eq!(keys, vec!["shooting_star-1m", "doji-5m", "hammer-5m"]);
        assert_eq!(occurrences[1].hhmm, 1005);
        assert_eq!(classification_counts(&occurrences), (1, 1, 1));
    }
}
