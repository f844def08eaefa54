//! Settings Store
//!
//! Key/value settings and per-channel versions the signal provider reads at
//! handshake time and advances as commands are released. Persistence is up
//! to the implementor; [`MemorySettingsStore`] keeps everything in memory.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

/// Settings key holding the last server-assigned client id.
pub const CLIENT_ID_KEY: &str = "client_id";

/// Storage for settings and channel versions.
pub trait SettingsStore: Send + Sync {
    /// Reads a setting.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes a setting.
    fn put(&self, key: &str, value: &str);

    /// Removes a setting.
    fn remove(&self, key: &str);

    /// Every known channel version.
    fn versions(&self) -> BTreeMap<String, i64>;

    /// The version of one channel.
    fn version(&self, key: &str) -> Option<i64>;

    /// Stores a channel version.
    ///
    /// Returns false and keeps the stored value if it is newer than
    /// `version`.
    fn set_version(&self, key: &str, version: i64) -> bool;

    /// Forgets every setting and version.
    fn clear(&self);
}

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<HashMap<String, String>>,
    versions: RwLock<BTreeMap<String, i64>>,
}

impl MemorySettingsStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with channel versions.
    pub fn with_versions<I, K>(versions: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        let store = Self::new();
        {
            let mut stored = store.versions.write();
            for (key, version) in versions {
                stored.insert(key.into(), version);
            }
        }
        store
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }

    fn versions(&self) -> BTreeMap<String, i64> {
        self.versions.read().clone()
    }

    fn version(&self, key: &str) -> Option<i64> {
        self.versions.read().get(key).copied()
    }

    fn set_version(&self, key: &str, version: i64) -> bool {
        let mut versions = self.versions.write();
        match versions.get(key) {
            Some(&stored) if stored > version => false,
            _ => {
                versions.insert(key.to_string(), version);
                true
            }
        }
    }

    fn clear(&self) {
        self.values.write().clear();
        self.versions.write().clear();
    }
}
