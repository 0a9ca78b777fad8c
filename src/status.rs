//! Per-dataset pipeline status records.
//!
//! One record per dataset identifier, four canonical flags set monotonically
//! true as stages complete. The store does not enforce stage ordering;
//! callers own the pipeline sequence. Unknown flag names are carried as
//! opaque extras so new stages do not need a store change.
//!
//! The store is the one piece of process-wide shared state and it lives in
//! an external cache; per-flag updates are single-field writes so they stay
//! atomic under the cache's own guarantees.

use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Key prefix in the external cache.
const STATUS_KEY_PREFIX: &str = "dataset_status:";

pub const FLAG_UPLOADED: &str = "uploaded";
pub const FLAG_PROCESSED_BY_GENERATOR: &str = "processed_by_generator";
pub const FLAG_SCRIPT_EXECUTED: &str = "script_executed";
pub const FLAG_READY: &str = "ready";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub uploaded: bool,
    pub processed_by_generator: bool,
    pub script_executed: bool,
    pub ready: bool,
    /// Flags set by stages this crate does not know about
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, bool>,
}

impl PipelineStatus {
    pub fn flag(&self, name: &str) -> Option<bool> {
        match name {
            FLAG_UPLOADED => Some(self.uploaded),
            FLAG_PROCESSED_BY_GENERATOR => Some(self.processed_by_generator),
            FLAG_SCRIPT_EXECUTED => Some(self.script_executed),
            FLAG_READY => Some(self.ready),
            other => self.extra.get(other).copied(),
        }
    }

    pub fn set(&mut self, name: &str, value: bool) {
        match name {
            FLAG_UPLOADED => self.uploaded = value,
            FLAG_PROCESSED_BY_GENERATOR => self.processed_by_generator = value,
            FLAG_SCRIPT_EXECUTED => self.script_executed = value,
            FLAG_READY => self.ready = value,
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
    }

    /// Restore from stored field pairs; values are stored as text and come
    /// back as booleans. Unparsable fields are dropped rather than failing
    /// the whole read.
    fn from_fields(fields: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut status = PipelineStatus::default();
        for (name, value) in fields {
            let parsed = match value.as_str() {
                "true" | "True" => true,
                "false" | "False" => false,
                _ => continue,
            };
            status.set(&name, parsed);
        }
        status
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            (FLAG_UPLOADED.to_string(), self.uploaded.to_string()),
            (
                FLAG_PROCESSED_BY_GENERATOR.to_string(),
                self.processed_by_generator.to_string(),
            ),
            (
                FLAG_SCRIPT_EXECUTED.to_string(),
                self.script_executed.to_string(),
            ),
            (FLAG_READY.to_string(), self.ready.to_string()),
        ];
        for (name, value) in &self.extra {
            fields.push((name.clone(), value.to_string()));
        }
        fields
    }
}

fn status_key(id: &str) -> String {
    format!("{STATUS_KEY_PREFIX}{id}")
}

/// Injected dependency: the engine's tests and embedders substitute an
/// in-memory stand-in for the networked cache.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create (or overwrite) the record with all flags false.
    async fn initialize(&self, id: &str) -> Result<()>;

    /// Set one named flag; unknown names pass through opaquely.
    async fn set_flag(&self, id: &str, flag: &str, value: bool) -> Result<()>;

    /// All flags with types restored, or `None` for an unknown identifier.
    async fn get_status(&self, id: &str) -> Result<Option<PipelineStatus>>;

    /// Remove the record; true when something was actually deleted.
    async fn delete_status(&self, id: &str) -> Result<bool>;
}

/// Production binding to the external cache.
///
/// Connection failures surface as [`EngineError::StoreUnavailable`]; they
/// indicate operational trouble and are never silently swallowed.
pub struct RedisStatusStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStatusStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(EngineError::StoreUnavailable)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(EngineError::StoreUnavailable)?;
        info!("connected status store to cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn initialize(&self, id: &str) -> Result<()> {
        let key = status_key(id);
        let fields = PipelineStatus::default().to_fields();
        let mut conn = self.conn.clone();
        // drop any stale extras from a previous life of this identifier
        let _: usize = conn.del(&key).await?;
        let _: () = conn.hset_multiple(&key, &fields).await?;
        debug!(id, "initialized pipeline status");
        Ok(())
    }

    async fn set_flag(&self, id: &str, flag: &str, value: bool) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(status_key(id), flag, value.to_string())
            .await?;
        debug!(id, flag, value, "updated pipeline status");
        Ok(())
    }

    async fn get_status(&self, id: &str) -> Result<Option<PipelineStatus>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(status_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(PipelineStatus::from_fields(fields)))
    }

    async fn delete_status(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: usize = conn.del(status_key(id)).await?;
        Ok(deleted > 0)
    }
}

/// In-memory stand-in with the same contract; used in tests and by
/// embedders that run without a cache.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: RwLock<HashMap<String, PipelineStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn initialize(&self, id: &str) -> Result<()> {
        self.records
            .write()
            .await
            .insert(id.to_string(), PipelineStatus::default());
        Ok(())
    }

    async fn set_flag(&self, id: &str, flag: &str, value: bool) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry(id.to_string())
            .or_default()
            .set(flag, value);
        Ok(())
    }

    async fn get_status(&self, id: &str) -> Result<Option<PipelineStatus>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn delete_status(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_matches_the_pipeline_contract() {
        let store = MemoryStatusStore::new();
        store.initialize("abc").await.unwrap();

        let status = store.get_status("abc").await.unwrap().unwrap();
        assert!(!status.uploaded);
        assert!(!status.processed_by_generator);
        assert!(!status.script_executed);
        assert!(!status.ready);

        store.set_flag("abc", FLAG_UPLOADED, true).await.unwrap();
        let status = store.get_status("abc").await.unwrap().unwrap();
        assert!(status.uploaded);
        assert!(!status.processed_by_generator);
        assert!(!status.script_executed);
        assert!(!status.ready);

        assert!(store.delete_status("abc").await.unwrap());
        assert!(store.get_status("abc").await.unwrap().is_none());
        assert!(!store.delete_status("abc").await.unwrap());
    }

    #[tokio::test]
    async fn setting_a_flag_twice_is_idempotent() {
        let store = MemoryStatusStore::new();
        store.initialize("x").await.unwrap();
        store.set_flag("x", FLAG_READY, true).await.unwrap();
        let once = store.get_status("x").await.unwrap().unwrap();
        store.set_flag("x", FLAG_READY, true).await.unwrap();
        let twice = store.get_status("x").await.unwrap().unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn unknown_flags_pass_through() {
        let store = MemoryStatusStore::new();
        store.initialize("x").await.unwrap();
        store.set_flag("x", "archived", true).await.unwrap();
        let status = store.get_status("x").await.unwrap().unwrap();
        assert_eq!(status.flag("archived"), Some(true));
        assert_eq!(status.flag("never_set"), None);
    }

    #[tokio::test]
    async fn ordering_is_not_enforced() {
        // callers may mark ready without script_executed; the store records it
        let store = MemoryStatusStore::new();
        store.initialize("x").await.unwrap();
        store.set_flag("x", FLAG_READY, true).await.unwrap();
        let status = store.get_status("x").await.unwrap().unwrap();
        assert!(status.ready);
        assert!(!status.script_executed);
    }

    #[test]
    fn reinitializing_overwrites() {
        tokio_test::block_on(async {
            let store = MemoryStatusStore::new();
            store.initialize("x").await.unwrap();
            store.set_flag("x", FLAG_UPLOADED, true).await.unwrap();
            store.initialize("x").await.unwrap();
            let status = store.get_status("x").await.unwrap().unwrap();
            assert!(!status.uploaded);
        });
    }

    #[test]
    fn field_round_trip_accepts_legacy_casing() {
        let fields = vec![
            ("uploaded".to_string(), "True".to_string()),
            ("ready".to_string(), "false".to_string()),
            ("archived".to_string(), "true".to_string()),
            ("junk".to_string(), "42".to_string()),
        ];
        let status = PipelineStatus::from_fields(fields);
        assert!(status.uploaded);
        assert!(!status.ready);
        assert_eq!(status.flag("archived"), Some(true));
        assert_eq!(status.flag("junk"), None);

        let pairs = status.to_fields();
        assert!(pairs.contains(&("uploaded".to_string(), "true".to_string())));
        assert_eq!(pairs.len(), 5);
    }
}
