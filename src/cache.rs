use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ChannelMode;

/// Identifies one derived measurement together with the parameters it was computed with.
/// Float parameters are keyed by their bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Peak,
    RmsWindows {
        window: usize,
        hop: usize,
        mode: ChannelMode,
    },
    Gated {
        window: usize,
        hop: usize,
        mode: ChannelMode,
        margin_bits: u64,
    },
    Subsonic {
        cutoff_bits: u64,
        frame: usize,
    },
    Stereo {
        window: usize,
    },
    ChannelStats,
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Per-track memo of derived measurements.
///
/// The lock only guards lookups and inserts, never a computation, so a cached
/// operation may itself depend on other cached operations.
#[derive(Default)]
pub struct TrackCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl TrackCache {
    /// Return the cached value for `key`, computing and storing it on a miss.
    pub fn get_or_compute<T, F>(&self, key: CacheKey, compute: F) -> anyhow::Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> anyhow::Result<T>,
    {
        if let Some(hit) = self.lookup::<T>(&key) {
            return Ok(hit);
        }
        let value = Arc::new(compute()?);
        self.entries.lock().insert(key, value.clone() as Entry);
        Ok(value)
    }

    fn lookup<T: Any + Send + Sync>(&self, key: &CacheKey) -> Option<Arc<T>> {
        let entry = self.entries.lock().get(key).cloned()?;
        entry.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl fmt::Debug for TrackCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackCache").field("entries", &self.len()).finish()
    }
}
