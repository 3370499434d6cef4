//! Durable key-value state and the typed slideshow view over it.
//!
//! Every setter overwrites its key immediately; there is no batching, so the
//! last mutation survives an ungraceful shutdown.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::Error;
use crate::queue::{SortPolicy, WallpaperEntry};
use crate::timer::TimerState;

pub const KEY_QUEUE: &str = "queue";
pub const KEY_SLIDE_INDEX: &str = "current-slide-index";
pub const KEY_CURRENT_WALLPAPER: &str = "current-wallpaper";
pub const KEY_SLIDE_START: &str = "time-of-slide-start";
pub const KEY_TIMER_REMAINING: &str = "timer-remaining";
pub const KEY_SLIDE_DURATION: &str = "slide-duration";
pub const KEY_ABSOLUTE_TIME: &str = "use-absolute-time";
pub const KEY_PAUSE: &str = "pause";
pub const KEY_DIRECTORY: &str = "directory";
pub const KEY_SORT_TYPE: &str = "sort-type";
pub const KEY_RESHUFFLE: &str = "reshuffle-on-complete";

/// Backend holding JSON values by key.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), Error>;
}

/// In-memory store. Clones share the same map, so a test can keep a handle
/// while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.inner
            .lock()
            .map(|map| map.clone())
            .unwrap_or_default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), Error> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| Error::PersistenceWriteFailed {
                key: key.to_string(),
                reason: "memory store lock poisoned".to_string(),
            })?;
        map.insert(key.to_string(), value);
        Ok(())
    }
}

/// One JSON object on disk, rewritten through a temporary file and rename on
/// every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileStore {
    /// Open (or lazily create) the state file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "state file missing; starting fresh");
                Map::new()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.values).map_err(std::io::Error::other)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), Error> {
        self.values.insert(key.to_string(), value);
        self.flush().map_err(|err| Error::PersistenceWriteFailed {
            key: key.to_string(),
            reason: err.to_string(),
        })
    }
}

/// Settings the engine last ran with, used to detect edits made while it was down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSettings {
    pub directory: Option<PathBuf>,
    pub sort: Option<SortPolicy>,
    pub reshuffle_on_complete: Option<bool>,
}

/// Typed persistence adapter over a [`KeyValueStore`].
pub struct SlideshowStore {
    kv: Box<dyn KeyValueStore>,
}

impl SlideshowStore {
    pub fn new(kv: Box<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.kv.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(key, error = %err, "ignoring malformed stored value");
                None
            }
        }
    }

    fn write<T: Serialize>(&mut self, key: &str, value: T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => {
                warn!(key, error = %err, "failed to encode value for store");
                return;
            }
        };
        if let Err(err) = self.kv.set(key, value) {
            warn!(key, error = %err, "state write failed");
        }
    }

    pub fn load_queue(&self) -> Vec<WallpaperEntry> {
        self.read(KEY_QUEUE).unwrap_or_default()
    }

    pub fn save_queue(&mut self, queue: &[WallpaperEntry]) {
        self.write(KEY_QUEUE, queue);
    }

    /// Stored slide index; `-1` (or anything negative) loads as `None`.
    pub fn load_index(&self) -> Option<usize> {
        self.read::<i64>(KEY_SLIDE_INDEX)
            .and_then(|i| usize::try_from(i).ok())
    }

    pub fn save_index(&mut self, index: Option<usize>) {
        let raw = index.and_then(|i| i64::try_from(i).ok()).unwrap_or(-1);
        self.write(KEY_SLIDE_INDEX, raw);
    }

    /// Timer state with `defaults` filling keys that were never written.
    pub fn load_timer_state(&self, defaults: TimerState) -> TimerState {
        TimerState {
            slide_duration_secs: self
                .read(KEY_SLIDE_DURATION)
                .unwrap_or(defaults.slide_duration_secs),
            time_of_slide_start_ms: self
                .read(KEY_SLIDE_START)
                .unwrap_or(defaults.time_of_slide_start_ms),
            timer_remaining_secs: self
                .read(KEY_TIMER_REMAINING)
                .unwrap_or(defaults.timer_remaining_secs),
            use_absolute_time: self
                .read(KEY_ABSOLUTE_TIME)
                .unwrap_or(defaults.use_absolute_time),
        }
    }

    pub fn save_timer_state(&mut self, timer: &TimerState) {
        self.write(KEY_SLIDE_DURATION, timer.slide_duration_secs);
        self.write(KEY_SLIDE_START, timer.time_of_slide_start_ms);
        self.write(KEY_TIMER_REMAINING, timer.timer_remaining_secs);
        self.write(KEY_ABSOLUTE_TIME, timer.use_absolute_time);
    }

    pub fn current_wallpaper(&self) -> Option<String> {
        self.read::<String>(KEY_CURRENT_WALLPAPER)
            .filter(|name| !name.is_empty())
    }

    pub fn set_current_wallpaper(&mut self, name: &str) {
        self.write(KEY_CURRENT_WALLPAPER, name);
    }

    pub fn paused(&self) -> bool {
        self.read(KEY_PAUSE).unwrap_or(false)
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.write(KEY_PAUSE, paused);
    }

    pub fn stored_settings(&self) -> StoredSettings {
        StoredSettings {
            directory: self.read(KEY_DIRECTORY),
            sort: self.read(KEY_SORT_TYPE),
            reshuffle_on_complete: self.read(KEY_RESHUFFLE),
        }
    }

    pub fn save_directory(&mut self, directory: &Path) {
        self.write(KEY_DIRECTORY, directory);
    }

    pub fn save_sort(&mut self, sort: SortPolicy) {
        self.write(KEY_SORT_TYPE, sort);
    }

    pub fn save_reshuffle(&mut self, reshuffle: bool) {
        self.write(KEY_RESHUFFLE, reshuffle);
    }
}
