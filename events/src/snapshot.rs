//! Durable snapshots of deleted blueprints.
//!
//! Deleting a blueprint is destructive: every projected instance goes with
//! it, registrations included. The deletion pipeline therefore writes a
//! JSON snapshot of the blueprint and all of its instances *before*
//! deleting anything, and aborts when the write fails.

use crate::error::{CoreError, CoreResult};
use crate::types::EventId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// The snapshot document written on blueprint deletion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletedEventSnapshot {
    /// When the snapshot was taken.
    pub snapshot_time: DateTime<Utc>,
    /// The deleted blueprint's id.
    pub event_id: EventId,
    /// The blueprint document, id included.
    pub event: Value,
    /// Every instance document as it was before deletion.
    pub instances: Vec<Value>,
}

/// Destination for deleted-event snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Writes the snapshot, keyed by the blueprint id. Returns a location
    /// string for the operator-facing response.
    ///
    /// # Errors
    ///
    /// [`CoreError::Snapshot`] when the write fails; callers abort the
    /// deletion in that case.
    async fn write(&self, snapshot: &DeletedEventSnapshot) -> CoreResult<String>;
}

/// Snapshot store writing `<dir>/<event_id>.json`.
#[derive(Clone, Debug)]
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    /// Creates a store rooted at `dir`; the directory is created on first
    /// write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn write(&self, snapshot: &DeletedEventSnapshot) -> CoreResult<String> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| CoreError::Snapshot(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CoreError::Snapshot(e.to_string()))?;
        let path = self.dir.join(format!("{}.json", snapshot.event_id));
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| CoreError::Snapshot(e.to_string()))?;
        let location = path.to_string_lossy().into_owned();
        tracing::info!(event_id = %snapshot.event_id, location = %location, "deletion snapshot written");
        Ok(location)
    }
}

/// In-memory snapshot store for tests.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<EventId, DeletedEventSnapshot>>,
}

impl MemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored snapshot for an event, if any.
    pub async fn get(&self, event_id: &EventId) -> Option<DeletedEventSnapshot> {
        self.entries.lock().await.get(event_id).cloned()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn write(&self, snapshot: &DeletedEventSnapshot) -> CoreResult<String> {
        self.entries
            .lock()
            .await
            .insert(snapshot.event_id.clone(), snapshot.clone());
        Ok(format!("memory:{}", snapshot.event_id))
    }
}

/// A snapshot store that always fails; used to exercise the abort path.
#[derive(Debug, Default)]
pub struct FailingSnapshotStore;

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn write(&self, _snapshot: &DeletedEventSnapshot) -> CoreResult<String> {
        Err(CoreError::Snapshot("snapshot store unavailable".into()))
    }
}
