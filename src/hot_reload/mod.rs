/// Hot-Reload System
///
/// Enables live updates of shader programs without restarting the engine.
/// Watching is a single-threaded poll: a program checks its sources once per
/// activation, and a change must settle for the debounce window before the
/// program is marked stale.
///
/// Key features:
/// - Modification-time polling, no background threads
/// - Debounce against the last seen modification time
/// - Reload failures keep the previous program serving draws
pub mod watcher;

pub use watcher::{SourceWatch, WatchEvent, WatchEventType};

use crate::constants::hot_reload::DEFAULT_DEBOUNCE_MS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hot-reload configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Enable shader hot-reload
    pub enabled: bool,

    /// Debounce time in milliseconds
    pub debounce_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl HotReloadConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Debounce window when watching is enabled
    pub fn watch_debounce(&self) -> Option<Duration> {
        self.enabled.then(|| self.debounce())
    }
}
