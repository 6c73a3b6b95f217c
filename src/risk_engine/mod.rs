//! RiskEngine - Violation & Risk Aggregation
//!
//! ## Responsibilities
//!
//! - Per-camera CountData (factor tuples, score, label)
//! - Label transition notifications
//! - Recency-weighted rolling mean and periodic flush
//! - Violator / report persistence for accepted detections
//!
//! Each camera's state sits behind its own mutex so results for one camera
//! are applied atomically and in arrival order. Cameras never block each other.

pub mod scoring;
mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::models::{DetectionResult, Modality};
use crate::realtime_hub::{HubMessage, RealtimeHub};
use crate::record_store::{FileArchive, RecordStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Name carried by the cross-camera combined mean
const COMBINED_NAME: &str = "All cameras";

/// RiskEngine configuration
#[derive(Debug, Clone)]
pub struct RiskEngineConfig {
    /// Rolling-mean flush period
    pub mean_flush_interval: Duration,
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        Self {
            mean_flush_interval: Duration::from_secs(600),
        }
    }
}

/// Live state of one camera
struct CameraRisk {
    count: CountData,
    violators: DetectionData,
}

/// RiskEngine instance
pub struct RiskEngine {
    store: Arc<dyn RecordStore>,
    archive: Option<FileArchive>,
    hub: Arc<RealtimeHub>,
    cameras: RwLock<HashMap<String, Arc<Mutex<CameraRisk>>>>,
    means: Mutex<HashMap<String, MeanCountData>>,
}

impl RiskEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        archive: Option<FileArchive>,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        Self {
            store,
            archive,
            hub,
            cameras: RwLock::new(HashMap::new()),
            means: Mutex::new(HashMap::new()),
        }
    }

    /// Seed CountData for a camera. Returns false when already present.
    pub async fn init_camera(&self, camera_id: &str, name: &str, threshold: f64) -> bool {
        let mut cameras = self.cameras.write().await;
        if cameras.contains_key(camera_id) {
            return false;
        }
        cameras.insert(
            camera_id.to_string(),
            Arc::new(Mutex::new(CameraRisk {
                count: CountData::seeded(camera_id, name, threshold),
                violators: DetectionData::default(),
            })),
        );
        tracing::info!(camera_id = %camera_id, threshold = threshold, "Risk state initialized");
        true
    }

    async fn camera(&self, camera_id: &str) -> Result<Arc<Mutex<CameraRisk>>> {
        self.cameras
            .read()
            .await
            .get(camera_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("risk state for camera {}", camera_id)))
    }

    /// Accept a completed detection for a camera.
    ///
    /// The violator list for the modality is replaced. When its length did not
    /// change nothing else happens; otherwise the counts are re-scored, every
    /// violator and one report are persisted, and the report is pushed.
    pub async fn apply_detection(
        &self,
        camera_id: &str,
        modality: Modality,
        result: &DetectionResult,
    ) -> Result<Option<Report>> {
        let camera = self.camera(camera_id).await?;
        let mut state = camera.lock().await;

        let violators = result.violator_list();
        let previous = std::mem::replace(
            state.violators.for_modality_mut(modality),
            violators.clone(),
        );
        if previous.len() == violators.len() {
            tracing::debug!(
                camera_id = %camera_id,
                modality = %modality,
                violators = violators.len(),
                "Violator count unchanged"
            );
            return Ok(None);
        }

        self.record_locked(
            &mut state.count,
            modality,
            violators.len(),
            result.entities.len(),
            result.mean_distance,
        )
        .await;

        let now = Utc::now();
        let mut violator_records = Vec::with_capacity(violators.len());
        for violator in &violators {
            let record = ViolatorRecord {
                record_id: Uuid::new_v4().to_string(),
                camera_id: camera_id.to_string(),
                entity_id: violator.id.clone(),
                violation: violator.violation,
                score: violator.score,
                contact: violator.contact.clone().unwrap_or_default(),
                image: violator.image.clone(),
                created_at: now,
            };
            if let Err(e) = self.store.save_violator(&record).await {
                tracing::error!(camera_id = %camera_id, error = %e, "Failed to persist violator");
            }
            if let Some(archive) = &self.archive {
                archive.store_violator(&record).await;
            }
            violator_records.push(record.record_id);
        }

        let report = Report {
            report_id: Uuid::new_v4().to_string(),
            camera_id: camera_id.to_string(),
            violation: modality.violation(),
            entities: result.entity_ids(),
            violators: violators.iter().map(|v| v.id.clone()).collect(),
            violator_records,
            mean_distance: result.mean_distance,
            reported_at: now.timestamp_millis(),
        };
        if let Err(e) = self.store.save_report(&report).await {
            tracing::error!(camera_id = %camera_id, error = %e, "Failed to persist report");
        }
        if let Some(archive) = &self.archive {
            archive.store_report(&report).await;
        }

        tracing::info!(
            camera_id = %camera_id,
            modality = %modality,
            violators = report.violator_count(),
            entities = report.entity_count(),
            "Violation report recorded"
        );
        self.hub
            .emit_to_room(camera_id, HubMessage::Report(report.clone()))
            .await;

        Ok(Some(report))
    }

    /// Fold one modality's counts into the camera's CountData
    pub async fn record_result(
        &self,
        camera_id: &str,
        modality: Modality,
        violators: usize,
        entities: usize,
        mean_distance: Option<f64>,
    ) -> Result<CountData> {
        let camera = self.camera(camera_id).await?;
        let mut state = camera.lock().await;
        self.record_locked(&mut state.count, modality, violators, entities, mean_distance)
            .await;
        Ok(state.count.clone())
    }

    async fn record_locked(
        &self,
        count: &mut CountData,
        modality: Modality,
        violators: usize,
        entities: usize,
        mean_distance: Option<f64>,
    ) {
        let previous_label = count.label;
        update_factors(count, modality, violators, entities, mean_distance);

        if count.label != previous_label {
            let message = scoring::notification_message(&count.name, count.label);
            tracing::info!(
                camera_id = %count.camera_id,
                from = %previous_label,
                to = %count.label,
                score = count.score,
                "Risk label changed"
            );

            let created_at = Utc::now();
            let snapshot = CountSnapshot {
                count: count.clone(),
                notif_message: Some(message.clone()),
                created_at,
            };
            if let Err(e) = self.store.save_count(&snapshot).await {
                tracing::error!(camera_id = %count.camera_id, error = %e, "Failed to persist notification snapshot");
            }

            self.hub
                .broadcast(HubMessage::Notification(NotificationEvent {
                    message,
                    data: count.clone(),
                    created_at,
                }))
                .await;
        }

        self.fold_mean(count).await;
        self.hub
            .emit_to_room(&count.camera_id, HubMessage::Count(count.clone()))
            .await;
    }

    /// Fold the current CountData into the camera's rolling mean
    pub async fn fold_mean(&self, current: &CountData) -> MeanCountData {
        let mean = {
            let mut means = self.means.lock().await;
            match means.get_mut(&current.camera_id) {
                Some(mean) => {
                    for (stored, latest) in mean
                        .factors
                        .tuples_mut()
                        .into_iter()
                        .zip(current.factors.tuples())
                    {
                        for (s, c) in stored.iter_mut().zip(latest.iter()) {
                            *s = scoring::fold(*s, *c);
                        }
                    }
                    mean.p2p[0] = scoring::fold(mean.p2p[0], current.p2p[0]);
                    mean.p2p[2] = scoring::fold(mean.p2p[2], current.p2p[2]);
                    mean.score = scoring::fold(mean.score, current.score);
                    mean.label = current.label;
                    mean.name = current.name.clone();
                    mean.clone()
                }
                None => {
                    means.insert(current.camera_id.clone(), current.clone());
                    current.clone()
                }
            }
        };

        self.hub
            .emit_to_room(&current.camera_id, HubMessage::Mean(mean.clone()))
            .await;
        mean
    }

    /// Average of the rolling means of `camera_ids` (all cameras when empty)
    pub async fn combined_mean(&self, camera_ids: &[String]) -> Option<MeanCountData> {
        let means = self.means.lock().await;
        combine(
            means
                .values()
                .filter(|m| camera_ids.is_empty() || camera_ids.contains(&m.camera_id)),
        )
    }

    /// Push the combined mean, then persist and drop every rolling mean
    pub async fn flush(&self) -> usize {
        if let Some(combined) = self.combined_mean(&[]).await {
            self.hub.broadcast(HubMessage::Mean(combined)).await;
        }

        let drained: Vec<MeanCountData> = {
            let mut means = self.means.lock().await;
            means.drain().map(|(_, mean)| mean).collect()
        };

        for mean in &drained {
            if let Err(e) = self.store.save_mean(mean).await {
                tracing::error!(camera_id = %mean.camera_id, error = %e, "Failed to persist rolling mean");
            }
        }

        tracing::info!(flushed = drained.len(), "Rolling means flushed");
        drained.len()
    }

    /// Run `flush` on a fixed period
    pub fn spawn_flush(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                self.flush().await;
            }
        })
    }

    pub async fn violators(&self, camera_id: &str) -> Option<DetectionData> {
        let camera = self.camera(camera_id).await.ok()?;
        let state = camera.lock().await;
        Some(state.violators.clone())
    }

    pub async fn all_violators(&self) -> HashMap<String, DetectionData> {
        let mut all = HashMap::new();
        for (id, camera) in self.entries().await {
            all.insert(id, camera.lock().await.violators.clone());
        }
        all
    }

    pub async fn count(&self, camera_id: &str) -> Option<CountData> {
        let camera = self.camera(camera_id).await.ok()?;
        let state = camera.lock().await;
        Some(state.count.clone())
    }

    pub async fn counts(&self) -> Vec<CountData> {
        let mut counts = Vec::new();
        for (_, camera) in self.entries().await {
            counts.push(camera.lock().await.count.clone());
        }
        counts.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        counts
    }

    pub async fn mean(&self, camera_id: &str) -> Option<MeanCountData> {
        self.means.lock().await.get(camera_id).cloned()
    }

    pub async fn means(&self) -> Vec<MeanCountData> {
        let mut means: Vec<_> = self.means.lock().await.values().cloned().collect();
        means.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        means
    }

    /// Persisted notification snapshots, newest first
    pub async fn notifications(
        &self,
        camera_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CountSnapshot>> {
        self.store.list_notifications(camera_id, limit).await
    }

    async fn entries(&self) -> Vec<(String, Arc<Mutex<CameraRisk>>)> {
        self.cameras
            .read()
            .await
            .iter()
            .map(|(id, camera)| (id.clone(), camera.clone()))
            .collect()
    }
}

/// Factor update, shortfall update and re-score for one result
fn update_factors(
    count: &mut CountData,
    modality: Modality,
    violators: usize,
    entities: usize,
    mean_distance: Option<f64>,
) {
    let (v, e) = (violators as f64, entities as f64);
    *count.factors.for_modality_mut(modality) = [v, e, scoring::ratio(v, e)];

    if let Some(distance) = mean_distance.filter(|d| d.is_finite()) {
        count.p2p[0] = distance;
        let shortfall = &mut count.factors.p2p;
        shortfall[0] = shortfall[1] - distance;
        shortfall[2] = scoring::ratio(shortfall[0], shortfall[1]);
    }

    scoring::rescore(count);
}

/// Accumulate-then-divide over a set of rolling means
fn combine<'a>(means: impl Iterator<Item = &'a MeanCountData>) -> Option<MeanCountData> {
    let mut factors = Factors::zeroed();
    let mut p2p = [0.0; 3];
    let mut score = 0.0;
    let mut n = 0usize;

    for mean in means {
        for (acc, value) in factors.tuples_mut().into_iter().zip(mean.factors.tuples()) {
            for (a, v) in acc.iter_mut().zip(value.iter()) {
                *a += v;
            }
        }
        for (a, v) in p2p.iter_mut().zip(mean.p2p.iter()) {
            *a += v;
        }
        score += mean.score;
        n += 1;
    }

    if n == 0 {
        return None;
    }

    let n = n as f64;
    for tuple in factors.tuples_mut() {
        for value in tuple.iter_mut() {
            *value /= n;
        }
    }
    for value in p2p.iter_mut() {
        *value /= n;
    }
    let score = score / n;

    Some(MeanCountData {
        camera_id: COMBINED_CAMERA_ID.to_string(),
        name: COMBINED_NAME.to_string(),
        p2p,
        label: scoring::classify(score, scoring::risk_factor(&factors)),
        factors,
        score,
    })
}
