//! RecordStore - Persistence Boundary
//!
//! ## Responsibilities
//!
//! - Camera records (read on startup, written on discovery/calibration/auth)
//! - Violator, report, count snapshot and rolling-mean writes
//! - Notification snapshot queries
//!
//! Two backends: `MySqlRecordStore` for deployments and `MemoryRecordStore`
//! when no database is configured (and for tests). `FileArchive` keeps JSON
//! copies of violators and reports alongside either backend.

mod archive;
mod mysql;

pub use archive::FileArchive;
pub use mysql::MySqlRecordStore;

use crate::camera_registry::Camera;
use crate::error::Result;
use crate::risk_engine::{CountSnapshot, MeanCountData, Report, ViolatorRecord};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Rows kept per append-only in-memory table
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Durable storage used by the registry and the risk engine
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load_cameras(&self) -> Result<Vec<Camera>>;

    async fn save_camera(&self, camera: &Camera) -> Result<()>;

    async fn save_violator(&self, violator: &ViolatorRecord) -> Result<()>;

    async fn save_report(&self, report: &Report) -> Result<()>;

    /// Count snapshot; notification snapshots carry `notif_message`
    async fn save_count(&self, snapshot: &CountSnapshot) -> Result<()>;

    async fn save_mean(&self, mean: &MeanCountData) -> Result<()>;

    /// Newest-first notification snapshots, optionally for one camera
    async fn list_notifications(
        &self,
        camera_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CountSnapshot>>;
}

#[derive(Default)]
struct MemoryTables {
    cameras: Vec<Camera>,
    violators: VecDeque<ViolatorRecord>,
    reports: VecDeque<Report>,
    counts: VecDeque<CountSnapshot>,
    means: VecDeque<MeanCountData>,
}

/// Append to a capped table, dropping the oldest rows
fn push_capped<T>(table: &mut VecDeque<T>, row: T, capacity: usize) {
    while table.len() >= capacity.max(1) {
        table.pop_front();
    }
    table.push_back(row);
}

/// In-process store (no database configured)
///
/// Append-only tables are ring buffers of `capacity` rows. Violator image
/// evidence is not kept in memory.
pub struct MemoryRecordStore {
    tables: RwLock<MemoryTables>,
    capacity: usize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tables: RwLock::new(MemoryTables::default()),
            capacity,
        }
    }

    pub async fn violators(&self) -> Vec<ViolatorRecord> {
        self.tables.read().await.violators.iter().cloned().collect()
    }

    pub async fn reports(&self) -> Vec<Report> {
        self.tables.read().await.reports.iter().cloned().collect()
    }

    pub async fn counts(&self) -> Vec<CountSnapshot> {
        self.tables.read().await.counts.iter().cloned().collect()
    }

    pub async fn means(&self) -> Vec<MeanCountData> {
        self.tables.read().await.means.iter().cloned().collect()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load_cameras(&self) -> Result<Vec<Camera>> {
        Ok(self.tables.read().await.cameras.clone())
    }

    async fn save_camera(&self, camera: &Camera) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables
            .cameras
            .iter_mut()
            .find(|c| c.camera_id == camera.camera_id)
        {
            Some(existing) => *existing = camera.clone(),
            None => tables.cameras.push(camera.clone()),
        }
        Ok(())
    }

    async fn save_violator(&self, violator: &ViolatorRecord) -> Result<()> {
        let row = ViolatorRecord {
            image: String::new(),
            ..violator.clone()
        };
        push_capped(&mut self.tables.write().await.violators, row, self.capacity);
        Ok(())
    }

    async fn save_report(&self, report: &Report) -> Result<()> {
        push_capped(&mut self.tables.write().await.reports, report.clone(), self.capacity);
        Ok(())
    }

    async fn save_count(&self, snapshot: &CountSnapshot) -> Result<()> {
        push_capped(&mut self.tables.write().await.counts, snapshot.clone(), self.capacity);
        Ok(())
    }

    async fn save_mean(&self, mean: &MeanCountData) -> Result<()> {
        push_capped(&mut self.tables.write().await.means, mean.clone(), self.capacity);
        Ok(())
    }

    async fn list_notifications(
        &self,
        camera_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CountSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .counts
            .iter()
            .rev()
            .filter(|s| s.notif_message.is_some())
            .filter(|s| camera_id.map_or(true, |id| s.count.camera_id == id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ViolationType;
    use crate::risk_engine::CountData;
    use chrono::Utc;

    fn snapshot(camera_id: &str, message: Option<&str>) -> CountSnapshot {
        CountSnapshot {
            count: CountData::seeded(camera_id, "Lobby", 1.0),
            notif_message: message.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_camera_upsert() {
        let store = MemoryRecordStore::new();
        let mut camera = Camera::discovered("c1".into(), "urn:1".into(), "Lobby".into(), None);
        store.save_camera(&camera).await.unwrap();
        camera.name = "Front lobby".into();
        store.save_camera(&camera).await.unwrap();

        let cameras = store.load_cameras().await.unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].name, "Front lobby");
    }

    #[tokio::test]
    async fn test_list_notifications_filters_and_orders() {
        let store = MemoryRecordStore::new();
        store.save_count(&snapshot("c1", None)).await.unwrap();
        store.save_count(&snapshot("c1", Some("first"))).await.unwrap();
        store.save_count(&snapshot("c2", Some("other"))).await.unwrap();
        store.save_count(&snapshot("c1", Some("second"))).await.unwrap();

        let all = store.list_notifications(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);

        let c1 = store.list_notifications(Some("c1"), 10).await.unwrap();
        let messages: Vec<_> = c1.iter().filter_map(|s| s.notif_message.clone()).collect();
        assert_eq!(messages, vec!["second".to_string(), "first".to_string()]);

        let limited = store.list_notifications(None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_tables_are_capped() {
        let store = MemoryRecordStore::with_capacity(3);
        for i in 0..5 {
            let message = format!("n{}", i);
            store.save_count(&snapshot("c1", Some(&message))).await.unwrap();
            store
                .save_violator(&ViolatorRecord {
                    record_id: format!("v{}", i),
                    camera_id: "c1".to_string(),
                    entity_id: i.to_string(),
                    violation: ViolationType::NoMask,
                    score: 0.5,
                    contact: vec![],
                    image: "aGVsbG8=".to_string(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.counts().await.len(), 3);
        let newest = store.list_notifications(None, 10).await.unwrap();
        let messages: Vec<_> = newest.iter().filter_map(|s| s.notif_message.clone()).collect();
        assert_eq!(messages, vec!["n4", "n3", "n2"]);

        let violators = store.violators().await;
        assert_eq!(violators.len(), 3);
        assert_eq!(violators[0].record_id, "v2");
        assert!(violators.iter().all(|v| v.image.is_empty()));
    }
}
