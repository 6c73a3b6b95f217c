//! DetectionOrchestrator - Detection Job Dispatch and Reconciliation
//!
//! ## Responsibilities
//!
//! - Periodic per-modality tick: snapshot every reachable camera, submit jobs
//! - Periodic reconcile: head-only FIFO polling, result hand-off to the risk engine
//! - On-demand dual-modality detection with direct reply to the requester
//! - Detection state machine gating all of the above
//!
//! ## Ordering
//!
//! Each modality has one FIFO of job ids in submission order. Reconcile only
//! ever looks at the head: a finished head is popped and handled, an unfinished
//! head stops the pass. Results for a camera are therefore applied in
//! submission order within a modality.

mod types;

pub use types::*;

use crate::camera_session::CameraSessionManager;
use crate::detection_worker::DetectionWorker;
use crate::error::{Error, Result};
use crate::job_queue::{JobId, JobQueue, JobRecord, JobRequest, JobState};
use crate::models::{Calibration, DetectionResult, Modality};
use crate::realtime_hub::{HubMessage, RealtimeHub, ViolatorsMessage};
use crate::risk_engine::RiskEngine;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

/// Queue, FIFO and counters for one modality
struct Lane {
    queue: JobQueue,
    fifo: Mutex<VecDeque<JobId>>,
    counters: Mutex<ModalityCounters>,
    /// Serializes reconcile passes so results leave in FIFO order
    reconciling: Mutex<()>,
}

impl Lane {
    fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            fifo: Mutex::new(VecDeque::new()),
            counters: Mutex::new(ModalityCounters::default()),
            reconciling: Mutex::new(()),
        }
    }
}

/// DetectionOrchestrator instance
pub struct DetectionOrchestrator {
    sessions: Arc<CameraSessionManager>,
    risk: Arc<RiskEngine>,
    hub: Arc<RealtimeHub>,
    sdd: Lane,
    fmd: Lane,
    state: RwLock<DetectionState>,
    active_ticks: AtomicUsize,
    running: Arc<RwLock<bool>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    config: OrchestratorConfig,
}

impl DetectionOrchestrator {
    /// Create new DetectionOrchestrator in the Unknown state
    pub fn new(
        sdd_worker: Arc<dyn DetectionWorker>,
        fmd_worker: Arc<dyn DetectionWorker>,
        sessions: Arc<CameraSessionManager>,
        risk: Arc<RiskEngine>,
        hub: Arc<RealtimeHub>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        for (worker, expected) in [
            (&sdd_worker, Modality::SocialDistance),
            (&fmd_worker, Modality::FaceMask),
        ] {
            if worker.modality() != expected {
                return Err(Error::Config(format!(
                    "{} worker reports modality {}",
                    expected,
                    worker.modality()
                )));
            }
        }

        Ok(Self {
            sessions,
            risk,
            hub,
            sdd: Lane::new(JobQueue::new(sdd_worker, config.queue.clone())),
            fmd: Lane::new(JobQueue::new(fmd_worker, config.queue.clone())),
            state: RwLock::new(DetectionState::Unknown),
            active_ticks: AtomicUsize::new(0),
            running: Arc::new(RwLock::new(false)),
            handles: Mutex::new(Vec::new()),
            config,
        })
    }

    fn lane(&self, modality: Modality) -> &Lane {
        match modality {
            Modality::SocialDistance => &self.sdd,
            Modality::FaceMask => &self.fmd,
        }
    }

    pub async fn state(&self) -> DetectionState {
        let state = *self.state.read().await;
        if state != DetectionState::Unknown && self.active_ticks.load(Ordering::SeqCst) > 0 {
            DetectionState::Active
        } else {
            state
        }
    }

    /// Leave Unknown once every worker reports ready. Never demotes.
    pub async fn initialize(&self) -> DetectionState {
        if *self.state.read().await != DetectionState::Unknown {
            return self.state().await;
        }

        for modality in Modality::ALL {
            if !self.lane(modality).queue.worker().ready().await {
                tracing::debug!(modality = %modality, "Detection worker not ready");
                return DetectionState::Unknown;
            }
        }

        let mut state = self.state.write().await;
        if *state == DetectionState::Unknown {
            *state = DetectionState::Ready;
            tracing::info!("Detection workers ready");
        }
        *state
    }

    /// Return to Unknown and re-check worker readiness
    pub async fn reinitialize(&self) -> DetectionState {
        *self.state.write().await = DetectionState::Unknown;
        tracing::info!("Detection state reset");
        self.initialize().await
    }

    /// Enqueue a job; never fails, job errors surface on reconcile
    pub async fn submit(
        &self,
        camera_id: &str,
        image: Vec<u8>,
        calibration: Option<Calibration>,
        modality: Modality,
        requester: Option<Uuid>,
    ) -> JobId {
        let lane = self.lane(modality);
        // FIFO order must match submission order
        let mut fifo = lane.fifo.lock().await;
        let id = lane
            .queue
            .submit(JobRequest {
                camera_id: camera_id.to_string(),
                image,
                calibration,
                requester,
            })
            .await;
        fifo.push_back(id);
        let pending = fifo.len();
        drop(fifo);

        let mut counters = lane.counters.lock().await;
        counters.submitted += 1;
        counters.pending = pending;
        id
    }

    /// Snapshot every reachable camera and submit one job each.
    /// Returns the number of jobs submitted.
    pub async fn tick(&self, modality: Modality) -> usize {
        if *self.state.read().await == DetectionState::Unknown {
            tracing::debug!(modality = %modality, "Tick skipped, detection state unknown");
            return 0;
        }

        self.active_ticks.fetch_add(1, Ordering::SeqCst);
        let cameras = self.sessions.reachable_cameras().await;
        let fetches = cameras.into_iter().map(|camera_id| async move {
            let frame = self.sessions.fetch(&camera_id).await;
            (camera_id, frame)
        });

        let mut submitted = 0;
        for (camera_id, frame) in futures::future::join_all(fetches).await {
            match frame {
                Ok(frame) => {
                    let calibration = self.sessions.calibration(&camera_id).await;
                    self.submit(&camera_id, frame, calibration, modality, None)
                        .await;
                    submitted += 1;
                }
                Err(e) => {
                    // fetch already removed the camera
                    tracing::warn!(
                        camera_id = %camera_id,
                        modality = %modality,
                        error = %e,
                        "Tick snapshot failed"
                    );
                }
            }
        }
        self.active_ticks.fetch_sub(1, Ordering::SeqCst);

        {
            let mut state = self.state.write().await;
            if *state == DetectionState::Ready {
                *state = DetectionState::Idle;
            }
        }

        tracing::debug!(modality = %modality, submitted = submitted, "Tick finished");
        submitted
    }

    /// Sweep expired jobs, then pop and handle finished jobs from the head
    pub async fn reconcile(&self, modality: Modality) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        if *self.state.read().await == DetectionState::Unknown {
            return summary;
        }

        let lane = self.lane(modality);
        let _guard = lane.reconciling.lock().await;

        let expired: HashSet<JobId> = lane.queue.clean().await.into_iter().collect();
        let mut finished: Vec<JobRecord> = Vec::new();
        let pending = {
            let mut fifo = lane.fifo.lock().await;
            if !expired.is_empty() {
                let before = fifo.len();
                fifo.retain(|id| !expired.contains(id));
                summary.swept = before - fifo.len();
            }

            while let Some(&head) = fifo.front() {
                match lane.queue.get(head).await {
                    None => {
                        fifo.pop_front();
                        summary.lost += 1;
                        tracing::debug!(job_id = head, modality = %modality, "Head job lost");
                    }
                    Some(job) if job.state.is_finished() => {
                        fifo.pop_front();
                        lane.queue.remove(head).await;
                        finished.push(job);
                    }
                    Some(_) => break,
                }
            }
            fifo.len()
        };

        for job in finished {
            match job.state {
                JobState::Completed(result) => {
                    summary.completed += 1;
                    self.handle_result(modality, &job.camera_id, job.requester, result)
                        .await;
                }
                JobState::Failed(reason) => {
                    summary.failed += 1;
                    tracing::debug!(
                        job_id = job.id,
                        modality = %modality,
                        camera_id = %job.camera_id,
                        reason = %reason,
                        "Failed job dropped"
                    );
                }
                JobState::Waiting | JobState::Active => {}
            }
        }

        let mut counters = lane.counters.lock().await;
        counters.completed += summary.completed as u64;
        counters.failed += summary.failed as u64;
        counters.lost += summary.lost as u64;
        counters.swept += summary.swept as u64;
        counters.pending = pending;
        if summary.swept > 0 {
            tracing::warn!(modality = %modality, swept = summary.swept, "Expired jobs swept");
        }
        summary
    }

    async fn handle_result(
        &self,
        modality: Modality,
        camera_id: &str,
        requester: Option<Uuid>,
        result: DetectionResult,
    ) {
        let message = |request: bool| ViolatorsMessage {
            camera_id: camera_id.to_string(),
            request,
            violators: result.violators.clone(),
            entities: result.entities.clone(),
            mean_distance: result.mean_distance,
        };

        if let Some(requester) = requester {
            self.hub
                .send_to(&requester, HubMessage::violators(modality, message(true)))
                .await;
        }

        if !self.sessions.has_session(camera_id).await {
            tracing::debug!(camera_id = %camera_id, modality = %modality, "Result discarded, camera removed");
            return;
        }

        if result.has_violators() {
            if let Err(e) = self.risk.apply_detection(camera_id, modality, &result).await {
                tracing::warn!(camera_id = %camera_id, modality = %modality, error = %e, "Risk update failed");
            }
        }

        if requester.is_none() && self.sessions.watcher_count(camera_id).await > 0 {
            self.hub
                .emit_to_room(camera_id, HubMessage::violators(modality, message(false)))
                .await;
        }
    }

    /// Submit a supplied frame to both modalities; results go back to `requester`
    pub async fn detect_frame(
        &self,
        camera_id: &str,
        image: Vec<u8>,
        calibration: Option<Calibration>,
        requester: Uuid,
    ) -> Result<Vec<JobId>> {
        if *self.state.read().await == DetectionState::Unknown {
            return Err(Error::Worker("detection workers are not ready".to_string()));
        }

        let mut ids = Vec::with_capacity(Modality::ALL.len());
        for modality in Modality::ALL {
            ids.push(
                self.submit(camera_id, image.clone(), calibration, modality, Some(requester))
                    .await,
            );
        }
        tracing::info!(camera_id = %camera_id, requester = %requester, "On-demand detection submitted");
        Ok(ids)
    }

    pub async fn status(&self) -> DetectorStatus {
        DetectorStatus {
            state: self.state().await,
            sdd: *self.sdd.counters.lock().await,
            fmd: *self.fmd.counters.lock().await,
        }
    }

    /// Start tick and reconcile loops
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Detection orchestrator already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            sdd_tick_ms = self.config.sdd_tick.as_millis() as u64,
            fmd_tick_ms = self.config.fmd_tick.as_millis() as u64,
            reconcile_ms = self.config.reconcile_interval.as_millis() as u64,
            "Starting detection orchestrator"
        );

        let mut handles = self.handles.lock().await;
        for modality in Modality::ALL {
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(this.config.tick_for(modality));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if !*this.running.read().await {
                        break;
                    }
                    this.tick(modality).await;
                }
            }));
        }

        let this = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(this.config.reconcile_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !*this.running.read().await {
                    break;
                }
                if *this.state.read().await == DetectionState::Unknown {
                    this.initialize().await;
                    continue;
                }
                for modality in Modality::ALL {
                    this.reconcile(modality).await;
                }
            }
        }));
    }

    /// Stop tick and reconcile loops
    pub async fn stop(&self) {
        *self.running.write().await = false;
        for handle in self.handles.lock().await.drain(..) {
            handle.abort();
        }
        tracing::info!("Detection orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_registry::CameraRegistry;
    use crate::camera_session::SessionConfig;
    use crate::camera_status_tracker::CameraStatusTracker;
    use crate::detection_worker::testing::{Script, ScriptedWorker};
    use crate::job_queue::JobQueueConfig;
    use crate::models::{DetectedEntity, ViolationType, ViolatorEntity};
    use crate::onvif::testing::FakeDiscovery;
    use crate::record_store::MemoryRecordStore;
    use crate::risk_engine::RiskLabel;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::Value;
    use std::time::Duration;

    struct Fixture {
        orchestrator: Arc<DetectionOrchestrator>,
        sdd: Arc<ScriptedWorker>,
        fmd: Arc<ScriptedWorker>,
        sessions: Arc<CameraSessionManager>,
        discovery: Arc<FakeDiscovery>,
        risk: Arc<RiskEngine>,
        hub: Arc<RealtimeHub>,
    }

    fn fixture(sdd_script: Vec<Script>, queue: JobQueueConfig) -> Fixture {
        let store = Arc::new(MemoryRecordStore::new());
        let hub = Arc::new(RealtimeHub::new());
        let registry = Arc::new(CameraRegistry::new(store.clone()));
        let risk = Arc::new(RiskEngine::new(store, None, hub.clone()));
        let discovery = Arc::new(FakeDiscovery::default());
        let sessions = Arc::new(CameraSessionManager::new(
            registry,
            discovery.clone(),
            risk.clone(),
            hub.clone(),
            Arc::new(CameraStatusTracker::new()),
            SessionConfig {
                broadcast_interval: Duration::from_millis(5),
                snapshot_timeout: Duration::from_millis(50),
            },
        ));
        let sdd = Arc::new(ScriptedWorker::with_script(Modality::SocialDistance, sdd_script));
        let fmd = Arc::new(ScriptedWorker::new(Modality::FaceMask));
        let orchestrator = Arc::new(
            DetectionOrchestrator::new(
                sdd.clone(),
                fmd.clone(),
                sessions.clone(),
                risk.clone(),
                hub.clone(),
                OrchestratorConfig {
                    queue,
                    ..OrchestratorConfig::default()
                },
            )
            .unwrap(),
        );
        Fixture {
            orchestrator,
            sdd,
            fmd,
            sessions,
            discovery,
            risk,
            hub,
        }
    }

    fn fast_queue() -> JobQueueConfig {
        JobQueueConfig {
            worker_timeout: Duration::from_millis(100),
            ..JobQueueConfig::default()
        }
    }

    fn violation(violators: usize, entities: usize) -> DetectionResult {
        let mut result = DetectionResult {
            mean_distance: Some(0.9),
            ..DetectionResult::default()
        };
        for i in 0..entities {
            let id = format!("p{}", i);
            result.entities.insert(
                id.clone(),
                DetectedEntity {
                    id: id.clone(),
                    bbox: vec![0.1, 0.1, 0.2, 0.4],
                    label: Some("person".into()),
                    contact: Vec::new(),
                },
            );
            if i < violators {
                result.violators.insert(
                    id.clone(),
                    ViolatorEntity {
                        id,
                        violation: ViolationType::NoSocialDistance,
                        image: String::new(),
                        score: 0.9,
                        contact: None,
                    },
                );
            }
        }
        result
    }

    /// Reconcile until the FIFO is empty
    async fn drain(orchestrator: &DetectionOrchestrator, modality: Modality) -> ReconcileSummary {
        let mut total = ReconcileSummary::default();
        for _ in 0..400 {
            let pass = orchestrator.reconcile(modality).await;
            total.completed += pass.completed;
            total.failed += pass.failed;
            total.lost += pass.lost;
            total.swept += pass.swept;
            if orchestrator.lane(modality).fifo.lock().await.is_empty() {
                return total;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue did not drain");
    }

    async fn one_camera(f: &Fixture) -> String {
        f.discovery.add("urn:1", "Gate", "http://10.0.0.1/onvif");
        f.sessions.discover().await[0].camera_id.clone()
    }

    #[tokio::test]
    async fn test_unknown_state_suppresses_work() {
        let f = fixture(Vec::new(), fast_queue());
        let camera = one_camera(&f).await;
        f.fmd.set_ready(false);

        assert_eq!(f.orchestrator.initialize().await, DetectionState::Unknown);
        assert_eq!(f.orchestrator.tick(Modality::SocialDistance).await, 0);
        assert_eq!(
            f.orchestrator.reconcile(Modality::SocialDistance).await,
            ReconcileSummary::default()
        );
        let err = f
            .orchestrator
            .detect_frame(&camera, vec![1], None, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Worker(_)));

        f.fmd.set_ready(true);
        assert_eq!(f.orchestrator.initialize().await, DetectionState::Ready);

        // Readiness loss does not demote on its own
        f.fmd.set_ready(false);
        assert_eq!(f.orchestrator.initialize().await, DetectionState::Ready);
        assert_eq!(f.orchestrator.reinitialize().await, DetectionState::Unknown);
    }

    #[tokio::test]
    async fn test_completed_job_updates_risk_and_room() {
        let f = fixture(vec![Script::Detect(violation(3, 4))], fast_queue());
        let camera = one_camera(&f).await;
        f.orchestrator.initialize().await;
        let (watcher, mut rx) = f.hub.register().await;
        f.sessions.connect(&camera, watcher).await.unwrap();

        assert_eq!(f.orchestrator.tick(Modality::SocialDistance).await, 1);
        assert_eq!(f.orchestrator.state().await, DetectionState::Idle);
        let summary = drain(&f.orchestrator, Modality::SocialDistance).await;
        assert_eq!(summary.completed, 1);

        let count = f.risk.count(&camera).await.unwrap();
        assert_eq!(count.factors.sdv, [3.0, 4.0, 0.75]);
        assert_eq!(count.label, RiskLabel::High);
        assert_eq!(f.risk.violators(&camera).await.unwrap().sdd.len(), 3);

        let mut saw_violators = false;
        while let Ok(raw) = rx.try_recv() {
            let json: Value = serde_json::from_str(&raw).unwrap();
            if json["event"] == "violators:sdd" {
                assert_eq!(json["data"]["request"], false);
                saw_violators = true;
            }
        }
        assert!(saw_violators);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_forwarded() {
        let f = fixture(vec![Script::Detect(DetectionResult::default())], fast_queue());
        let camera = one_camera(&f).await;
        f.orchestrator.initialize().await;

        f.orchestrator.tick(Modality::SocialDistance).await;
        assert_eq!(drain(&f.orchestrator, Modality::SocialDistance).await.completed, 1);

        let count = f.risk.count(&camera).await.unwrap();
        assert_eq!(count.label, RiskLabel::Unknown);
        assert_eq!(count.factors.sdv, [0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_failed_and_crashed_jobs_forward_nothing() {
        let f = fixture(vec![Script::Fail("model error"), Script::Panic], fast_queue());
        let camera = one_camera(&f).await;
        f.orchestrator.initialize().await;

        f.orchestrator.tick(Modality::SocialDistance).await;
        drain(&f.orchestrator, Modality::SocialDistance).await;
        f.orchestrator.tick(Modality::SocialDistance).await;
        drain(&f.orchestrator, Modality::SocialDistance).await;

        let status = f.orchestrator.status().await;
        assert_eq!(status.sdd.failed, 2);
        assert_eq!(status.sdd.completed, 0);
        assert_eq!(status.sdd.pending, 0);
        assert_eq!(f.risk.count(&camera).await.unwrap().label, RiskLabel::Unknown);
    }

    #[tokio::test]
    async fn test_head_only_polling_keeps_order() {
        let queue = JobQueueConfig {
            concurrency: 2,
            ..fast_queue()
        };
        let f = fixture(vec![Script::Hang, Script::Detect(violation(1, 2))], queue);
        let camera = one_camera(&f).await;
        f.orchestrator.initialize().await;

        f.orchestrator
            .submit(&camera, vec![1], None, Modality::SocialDistance, None)
            .await;
        while f.sdd.calls.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let second = f
            .orchestrator
            .submit(&camera, vec![2], None, Modality::SocialDistance, None)
            .await;
        while !f
            .orchestrator
            .sdd
            .queue
            .get(second)
            .await
            .map_or(false, |job| job.state.is_finished())
        {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Second job is done but the head is still running
        let pass = f.orchestrator.reconcile(Modality::SocialDistance).await;
        assert_eq!(pass.handled(), 0);
        assert_eq!(f.orchestrator.status().await.sdd.pending, 2);

        let summary = drain(&f.orchestrator, Modality::SocialDistance).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(f.risk.count(&camera).await.unwrap().factors.sdv, [1.0, 2.0, 0.5]);
    }

    #[tokio::test]
    async fn test_lost_head_is_popped() {
        let f = fixture(Vec::new(), fast_queue());
        let camera = one_camera(&f).await;
        f.orchestrator.initialize().await;

        let id = f
            .orchestrator
            .submit(&camera, vec![1], None, Modality::FaceMask, None)
            .await;
        f.orchestrator.fmd.queue.remove(id).await;

        let pass = f.orchestrator.reconcile(Modality::FaceMask).await;
        assert_eq!(pass.lost, 1);
        assert_eq!(f.orchestrator.status().await.fmd.lost, 1);
    }

    #[tokio::test]
    async fn test_queue_invariant_under_random_sequence() {
        let f = fixture(Vec::new(), fast_queue());
        let camera = one_camera(&f).await;
        f.orchestrator.initialize().await;
        let modality = Modality::SocialDistance;

        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            match rng.gen_range(0..3) {
                0 => {
                    f.orchestrator
                        .submit(&camera, vec![0], None, modality, None)
                        .await;
                }
                1 => {
                    f.orchestrator.reconcile(modality).await;
                }
                _ => {
                    let head = f.orchestrator.sdd.fifo.lock().await.front().copied();
                    if let Some(head) = head {
                        f.orchestrator.sdd.queue.remove(head).await;
                    }
                }
            }

            let fifo: Vec<JobId> = f.orchestrator.sdd.fifo.lock().await.iter().copied().collect();
            let unique: HashSet<JobId> = fifo.iter().copied().collect();
            assert_eq!(unique.len(), fifo.len());

            let c = f.orchestrator.status().await.sdd;
            assert_eq!(c.pending, fifo.len());
            assert_eq!(
                c.submitted - c.completed - c.failed - c.lost - c.swept,
                fifo.len() as u64
            );
        }
    }

    #[tokio::test]
    async fn test_stale_jobs_are_swept() {
        let queue = JobQueueConfig {
            worker_timeout: Duration::from_secs(60),
            stale_after: Duration::from_millis(20),
            ..JobQueueConfig::default()
        };
        let f = fixture(vec![Script::Hang], queue);
        let camera = one_camera(&f).await;
        f.orchestrator.initialize().await;

        f.orchestrator
            .submit(&camera, vec![1], None, Modality::SocialDistance, None)
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let pass = f.orchestrator.reconcile(Modality::SocialDistance).await;
        assert_eq!(pass.swept, 1);
        assert_eq!(f.orchestrator.status().await.sdd.pending, 0);
    }

    #[tokio::test]
    async fn test_detect_frame_replies_to_requester() {
        let f = fixture(vec![Script::Detect(violation(1, 3))], fast_queue());
        let camera = one_camera(&f).await;
        f.orchestrator.initialize().await;
        let (requester, mut rx) = f.hub.register().await;

        let ids = f
            .orchestrator
            .detect_frame(&camera, vec![0xff, 0xd8], None, requester)
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        drain(&f.orchestrator, Modality::SocialDistance).await;
        drain(&f.orchestrator, Modality::FaceMask).await;

        let mut events = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            let json: Value = serde_json::from_str(&raw).unwrap();
            if json["event"].as_str().unwrap().starts_with("violators:") {
                assert_eq!(json["data"]["request"], true);
                events.push(json["event"].as_str().unwrap().to_string());
            }
        }
        events.sort();
        assert_eq!(events, vec!["violators:fmd", "violators:sdd"]);
        assert_eq!(f.fmd.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_result_for_removed_camera_is_discarded() {
        let f = fixture(vec![Script::Detect(violation(2, 2))], fast_queue());
        let camera = one_camera(&f).await;
        f.orchestrator.initialize().await;

        f.orchestrator.tick(Modality::SocialDistance).await;
        f.sessions.remove(&camera).await;
        assert_eq!(drain(&f.orchestrator, Modality::SocialDistance).await.completed, 1);

        assert!(f.risk.violators(&camera).await.unwrap().sdd.is_empty());
        assert_eq!(f.risk.count(&camera).await.unwrap().label, RiskLabel::Unknown);
    }

    #[tokio::test]
    async fn test_tick_snapshot_failure_removes_camera() {
        let f = fixture(Vec::new(), fast_queue());
        f.discovery.add("urn:1", "Gate", "http://10.0.0.1/onvif");
        let hall = f.discovery.add("urn:2", "Hall", "http://10.0.0.2/onvif");
        f.sessions.discover().await;
        f.orchestrator.initialize().await;

        hall.set_online(false);
        assert_eq!(f.orchestrator.tick(Modality::FaceMask).await, 1);
        assert_eq!(f.sessions.reachable_cameras().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_loops() {
        let f = fixture(Vec::new(), fast_queue());
        one_camera(&f).await;
        let config = OrchestratorConfig {
            sdd_tick: Duration::from_millis(10),
            fmd_tick: Duration::from_millis(10),
            reconcile_interval: Duration::from_millis(5),
            queue: fast_queue(),
        };
        let orchestrator = Arc::new(
            DetectionOrchestrator::new(
                f.sdd.clone(),
                f.fmd.clone(),
                f.sessions.clone(),
                f.risk.clone(),
                f.hub.clone(),
                config,
            )
            .unwrap(),
        );

        orchestrator.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        orchestrator.stop().await;

        let status = orchestrator.status().await;
        assert_ne!(status.state, DetectionState::Unknown);
        assert!(status.sdd.submitted > 0);
        assert!(status.fmd.completed > 0);
    }

    #[test]
    fn test_mismatched_worker_rejected() {
        let f = fixture(Vec::new(), fast_queue());
        let result = DetectionOrchestrator::new(
            f.fmd.clone(),
            f.sdd.clone(),
            f.sessions.clone(),
            f.risk.clone(),
            f.hub.clone(),
            OrchestratorConfig::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
