use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timer::TimerConfig;

const DEVICE_ID_PREFIX: &str = "device-";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerSettings {
    /// Display refresh cadence; 0 turns the ticker off.
    pub tick_interval_ms: u64,
    pub reconcile_notice_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            reconcile_notice_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSettings {
    device_id: String,
    #[serde(default)]
    timer: TimerSettings,
}

impl UserSettings {
    fn fresh() -> Self {
        Self {
            device_id: format!("{DEVICE_ID_PREFIX}{}", Uuid::new_v4()),
            timer: TimerSettings::default(),
        }
    }
}

/// `settings.json` in the data directory. Created on first use, which is also when the
/// device id is minted.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let loaded = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<UserSettings>(&contents) {
                Ok(settings) if !settings.device_id.is_empty() => Some(settings),
                Ok(_) => {
                    warn!("Settings at {} have no device id; regenerating", path.display());
                    None
                }
                Err(err) => {
                    warn!("Ignoring unreadable settings at {}: {err}", path.display());
                    None
                }
            }
        } else {
            None
        };

        let store = Self {
            path,
            data: RwLock::new(UserSettings::fresh()),
        };
        match loaded {
            Some(settings) => *store.write_guard()? = settings,
            None => store.persist(&*store.read_guard()?)?,
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device_id(&self) -> Result<String> {
        Ok(self.read_guard()?.device_id.clone())
    }

    pub fn timer(&self) -> Result<TimerSettings> {
        Ok(self.read_guard()?.timer.clone())
    }

    pub fn update_timer(&self, settings: TimerSettings) -> Result<()> {
        let mut guard = self.write_guard()?;
        guard.timer = settings;
        self.persist(&guard)
    }

    pub fn timer_config(&self) -> Result<TimerConfig> {
        let guard = self.read_guard()?;
        Ok(TimerConfig {
            device_id: guard.device_id.clone(),
            tick_interval: Some(guard.timer.tick_interval_ms)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            reconcile_notice_ms: guard.timer.reconcile_notice_ms,
        })
    }

    fn read_guard(&self) -> Result<std::sync::RwLockReadGuard<'_, UserSettings>> {
        self.data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    fn write_guard(&self) -> Result<std::sync::RwLockWriteGuard<'_, UserSettings>> {
        self.data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
