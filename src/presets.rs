//! Per-capability parameter presets.
//!
//! Presets are read when a capability is (re)selected and written whenever
//! the user changes one of its parameters. Storage is an injected,
//! namespaced key/value backend; there is no global instance.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::capability::CapabilityId;
use crate::db;
use crate::error::PresetError;
use crate::types::{GenerationParams, Preset};

/// A stored JSON value with its last-write time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub value_json: String,
    pub updated_at: DateTime<Utc>,
}

/// Namespaced key/value persistence surface.
pub trait PresetBackend: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>, PresetError>;

    fn put(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<(), PresetError>;

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, PresetError>;
}

/// Volatile backend, for tests and hosts without persistence.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<(String, String), StoredEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresetBackend for MemoryBackend {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>, PresetError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| PresetError::Storage(e.to_string()))?;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<(), PresetError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| PresetError::Storage(e.to_string()))?;
        entries.insert((namespace.to_string(), key.to_string()), entry);
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, PresetError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| PresetError::Storage(e.to_string()))?;
        Ok(entries
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }
}

/// SQLite-backed persistence that survives restarts.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open the database at `path`, or an in-memory one for `None`.
    pub fn open(path: Option<&Path>) -> Result<Self, PresetError> {
        let conn = db::open_database(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Keys stored under a namespace.
    pub fn keys(&self, namespace: &str) -> Result<Vec<String>, PresetError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PresetError::Storage(e.to_string()))?;
        Ok(db::list_keys(&conn, namespace)?)
    }
}

impl PresetBackend for SqliteBackend {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>, PresetError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PresetError::Storage(e.to_string()))?;
        let Some((value_json, updated_at)) = db::get_entry(&conn, namespace, key)? else {
            return Ok(None);
        };
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| PresetError::Storage(format!("Bad timestamp for {}: {}", key, e)))?;
        Ok(Some(StoredEntry {
            value_json,
            updated_at,
        }))
    }

    fn put(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<(), PresetError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PresetError::Storage(e.to_string()))?;
        db::put_entry(
            &conn,
            namespace,
            key,
            &entry.value_json,
            &entry.updated_at.to_rfc3339(),
        )?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, PresetError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PresetError::Storage(e.to_string()))?;
        Ok(db::delete_entry(&conn, namespace, key)?)
    }
}

/// Capability-keyed preset cache over a [`PresetBackend`].
pub struct PresetStore {
    backend: Box<dyn PresetBackend>,
    namespace: String,
}

impl PresetStore {
    pub fn new(backend: impl PresetBackend + 'static, namespace: impl Into<String>) -> Self {
        Self {
            backend: Box::new(backend),
            namespace: namespace.into(),
        }
    }

    /// In-memory store under the default namespace.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new(), "presets")
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Last-used parameters for a capability.
    ///
    /// An entry that no longer deserializes is treated as absent so a schema
    /// change never blocks capability selection.
    pub fn load(&self, capability: CapabilityId) -> Result<Option<Preset>, PresetError> {
        let Some(entry) = self.backend.get(&self.namespace, capability.as_str())? else {
            return Ok(None);
        };
        match serde_json::from_str::<GenerationParams>(&entry.value_json) {
            Ok(params) => Ok(Some(Preset {
                capability_id: capability,
                params,
                updated_at: entry.updated_at,
            })),
            Err(e) => {
                tracing::warn!(capability = %capability, error = %e, "Ignoring unreadable preset");
                Ok(None)
            }
        }
    }

    /// Record new parameters for a capability, stamping the write time.
    pub fn save(
        &self,
        capability: CapabilityId,
        params: &GenerationParams,
    ) -> Result<Preset, PresetError> {
        let updated_at = Utc::now();
        let entry = StoredEntry {
            value_json: serde_json::to_string(params)?,
            updated_at,
        };
        self.backend
            .put(&self.namespace, capability.as_str(), entry)?;
        tracing::debug!(capability = %capability, "Preset saved");
        Ok(Preset {
            capability_id: capability,
            params: params.clone(),
            updated_at,
        })
    }

    /// Forget a capability's preset. Returns whether one existed.
    pub fn clear(&self, capability: CapabilityId) -> Result<bool, PresetError> {
        self.backend.delete(&self.namespace, capability.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_preset() {
        let store = PresetStore::in_memory();
        assert!(store.load(CapabilityId::Relight).unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let store = PresetStore::in_memory();
        let params = GenerationParams::default()
            .with_extra("lightDirection", "left")
            .with_extra("intensity", 0.4);
        let saved = store.save(CapabilityId::Relight, &params).unwrap();

        let loaded = store.load(CapabilityId::Relight).unwrap().unwrap();
        assert_eq!(loaded.params, params);
        assert_eq!(loaded.updated_at, saved.updated_at);
        assert_eq!(loaded.capability_id, CapabilityId::Relight);
    }

    #[test]
    fn test_presets_are_not_shared_across_capabilities() {
        let store = PresetStore::in_memory();
        store
            .save(CapabilityId::TextToVideo, &GenerationParams::default().with_duration(10))
            .unwrap();
        assert!(store.load(CapabilityId::ImageToVideo).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_preset_is_ignored() {
        let backend = MemoryBackend::new();
        backend
            .put(
                "presets",
                "relight",
                StoredEntry {
                    value_json: "not json".into(),
                    updated_at: Utc::now(),
                },
            )
            .unwrap();
        let store = PresetStore::new(backend, "presets");
        assert!(store.load(CapabilityId::Relight).unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let store = PresetStore::in_memory();
        store
            .save(CapabilityId::ImageUpscale, &GenerationParams::default())
            .unwrap();
        assert!(store.clear(CapabilityId::ImageUpscale).unwrap());
        assert!(!store.clear(CapabilityId::ImageUpscale).unwrap());
    }

    #[test]
    fn test_sqlite_backend_round_trip() {
        let backend = SqliteBackend::open(None).unwrap();
        let now = Utc::now();
        backend
            .put(
                "presets",
                "face_swap",
                StoredEntry {
                    value_json: "{}".into(),
                    updated_at: now,
                },
            )
            .unwrap();
        let entry = backend.get("presets", "face_swap").unwrap().unwrap();
        assert_eq!(entry.value_json, "{}");
        assert_eq!(entry.updated_at.timestamp(), now.timestamp());
        assert_eq!(backend.keys("presets").unwrap(), vec!["face_swap"]);
    }
}
