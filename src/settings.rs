// src/settings.rs - Timeframe selection state with persistence
//
// Holds the analysis timeframe set and the chart timeframe. Every mutation is saved
// under SETTINGS_KEY and broadcast to subscribers through a watch channel.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::{DashboardError, Result};
use crate::types::{Timeframe, AVAILABLE_TIMEFRAMES, CHART_TIMEFRAMES};

pub const SETTINGS_KEY: &str = "trading-dashboard-settings";
pub const DEFAULT_TIMEFRAMES: [Timeframe; 4] = [1, 5, 30, 120];
pub const DEFAULT_CHART_TIMEFRAME: Timeframe = 5;

/// Persisted settings record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DashboardSettings {
    pub timeframes: Vec<Timeframe>,
    #[serde(rename = "chartTimeframe")]
    pub chart_timeframe: Timeframe,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            timeframes: DEFAULT_TIMEFRAMES.to_vec(),
            chart_timeframe: DEFAULT_CHART_TIMEFRAME,
        }
    }
}

impl DashboardSettings {
    /// Parse a persisted record, replacing each malformed field with its default.
    pub fn from_json(raw: &str) -> Self {
        let parsed: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("[SETTINGS] Failed to parse persisted settings: {}", e);
                return Self::default();
            }
        };

        let timeframes = parse_timeframes(parsed.get("timeframes")).unwrap_or_else(|| {
            warn!("[SETTINGS] Invalid timeframes in persisted settings, using defaults");
            DEFAULT_TIMEFRAMES.to_vec()
        });

        let chart_timeframe = parsed
            .get("chartTimeframe")
            .and_then(Value::as_u64)
            .and_then(|tf| u32::try_from(tf).ok())
            .filter(|tf| CHART_TIMEFRAMES.contains(tf))
            .unwrap_or(DEFAULT_CHART_TIMEFRAME);

        Self {
            timeframes,
            chart_timeframe,
        }
    }
}

fn parse_timeframes(value: Option<&Value>) -> Option<Vec<Timeframe>> {
    let mut timeframes = value?
        .as_array()?
        .iter()
        .map(|entry| {
            entry
                .as_u64()
                .and_then(|tf| u32::try_from(tf).ok())
                .filter(|tf| AVAILABLE_TIMEFRAMES.contains(tf))
        })
        .collect::<Option<Vec<_>>>()?;

    timeframes.sort_unstable();
    timeframes.dedup();

    if timeframes.is_empty() {
        None
    } else {
        Some(timeframes)
    }
}

/// Key/value storage backing the settings record.
pub trait SettingsStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// Stores each key as `<dir>/<key>.json`.
pub struct FileSettingsStorage {
    dir: PathBuf,
}

impl FileSettingsStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SettingsStorage for FileSettingsStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }
}

/// Volatile storage, for tests and sessions without a settings directory.
#[derive(Default)]
pub struct MemorySettingsStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySettingsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let storage = Self::default();
        storage.entries.lock().insert(key.to_string(), value.to_string());
        storage
    }
}

impl SettingsStorage for MemorySettingsStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Load settings from storage, falling back to defaults on any failure.
pub fn load_settings(storage: &dyn SettingsStorage) -> DashboardSettings {
    match storage.load(SETTINGS_KEY) {
        Ok(Some(raw)) => DashboardSettings::from_json(&raw),
        Ok(None) => {
            debug!("[SETTINGS] No persisted settings, using defaults");
            DashboardSettings::default()
        }
        Err(e) => {
            warn!("[SETTINGS] Failed to load settings: {}", e);
            DashboardSettings::default()
        }
    }
}

/// Timeframe selection store. Constructed once at startup and shared by `Arc`.
pub struct SelectionState {
    storage: Arc<dyn SettingsStorage>,
    tx: watch::Sender<DashboardSettings>,
    /// Held across mutate-and-persist so saves land in mutation order.
    save_lock: Mutex<()>,
}

impl SelectionState {
    pub fn load(storage: Arc<dyn SettingsStorage>) -> Self {
        let settings = load_settings(storage.as_ref());
        info!(
            "[SETTINGS] Loaded timeframes {:?}, chart timeframe {}",
            settings.timeframes, settings.chart_timeframe
        );
        let (tx, _rx) = watch::channel(settings);
        Self {
            storage,
            tx,
            save_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> DashboardSettings {
        self.tx.borrow().clone()
    }

    pub fn selected_timeframes(&self) -> Vec<Timeframe> {
        self.tx.borrow().timeframes.clone()
    }

    pub fn chart_timeframe(&self) -> Timeframe {
        self.tx.borrow().chart_timeframe
    }

    pub fn is_selected(&self, tf: Timeframe) -> bool {
        self.tx.borrow().timeframes.contains(&tf)
    }

    /// Receiver notified after every effective mutation.
    pub fn subscribe(&self) -> watch::Receiver<DashboardSettings> {
        self.tx.subscribe()
    }

    /// Add `tf` if absent, remove it if present. Removing the last timeframe is
    /// refused. Returns whether the selection changed.
    pub fn toggle_timeframe(&self, tf: Timeframe) -> Result<bool> {
        if !AVAILABLE_TIMEFRAMES.contains(&tf) {
            return Err(DashboardError::InvalidTimeframe(tf));
        }

        let _save = self.save_lock.lock();
        let changed = self.tx.send_if_modified(|settings| {
            if let Some(pos) = settings.timeframes.iter().position(|t| *t == tf) {
                if settings.timeframes.len() <= 1 {
                    return false;
                }
                settings.timeframes.remove(pos);
            } else {
                settings.timeframes.push(tf);
                settings.timeframes.sort_unstable();
            }
            true
        });

        if changed {
            debug!("[SETTINGS] Timeframes now {:?}", self.selected_timeframes());
            self.persist();
        } else {
            debug!("[SETTINGS] Refused to remove last timeframe {}", tf);
        }
        Ok(changed)
    }

    /// Select the chart timeframe. Returns whether it changed.
    pub fn set_chart_timeframe(&self, tf: Timeframe) -> Result<bool> {
        if !CHART_TIMEFRAMES.contains(&tf) {
            return Err(DashboardError::InvalidTimeframe(tf));
        }

        let _save = self.save_lock.lock();
        let changed = self.tx.send_if_modified(|settings| {
            if settings.chart_timeframe == tf {
                return false;
            }
            settings.chart_timeframe = tf;
            true
        });

        if changed {
            debug!("[SETTINGS] Chart timeframe now {}", tf);
            self.persist();
        }
        Ok(changed)
    }

    fn persist(&self) {
        let settings = self.settings();
        let result = serde_json::to_string(&settings)
            .map_err(DashboardError::from)
            .and_then(|raw| self.storage.save(SETTINGS_KEY, &raw));

        if let Err(e) = result {
            warn!("[SETTINGS] Failed to persist settings: {}", e);
        }
    }
}
