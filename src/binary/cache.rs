use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// A version string and the executable it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    /// Requested version, e.g. `stable` or `7.2.4`.
    pub version: String,
    /// Path of the redis-server executable.
    pub path: PathBuf,
}

/// In-memory map from version to resolved executable.
///
/// Entries live as long as the cache object. The process-wide instance from
/// [`BinaryCache::global`] lives until the process exits; tests create their
/// own with [`BinaryCache::new`].
#[derive(Debug, Default)]
pub struct BinaryCache {
    entries: Mutex<HashMap<String, ResolvedBinary>>,
}

static GLOBAL_CACHE: OnceLock<Arc<BinaryCache>> = OnceLock::new();

impl BinaryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> Arc<BinaryCache> {
        Arc::clone(GLOBAL_CACHE.get_or_init(|| Arc::new(Self::new())))
    }

    /// Looks up `version`.
    pub fn get(&self, version: &str) -> Option<ResolvedBinary> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(version).cloned())
    }

    /// Stores a resolution, replacing any previous entry for the version.
    pub fn insert(&self, binary: ResolvedBinary) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(binary.version.clone(), binary);
            }
            Err(_) => tracing::warn!("Binary cache lock poisoned, not caching resolution"),
        }
    }

    /// Number of cached versions.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
