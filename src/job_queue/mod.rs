//! JobQueue - Per-Modality Detection Jobs
//!
//! ## Responsibilities
//!
//! - Accept detection work without blocking the caller
//! - Run jobs against the modality's worker under a concurrency limit
//! - Keep job state until the consumer removes it or retention expires
//!
//! Worker errors, timeouts and panics all end as `JobState::Failed`.

mod types;

pub use types::*;

use crate::detection_worker::DetectionWorker;
use crate::models::Modality;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::Instant;

type JobTable = Arc<RwLock<HashMap<JobId, JobRecord>>>;

/// JobQueue instance
pub struct JobQueue {
    modality: Modality,
    worker: Arc<dyn DetectionWorker>,
    jobs: JobTable,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
    config: JobQueueConfig,
}

impl JobQueue {
    pub fn new(worker: Arc<dyn DetectionWorker>, config: JobQueueConfig) -> Self {
        Self {
            modality: worker.modality(),
            worker,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn worker(&self) -> &Arc<dyn DetectionWorker> {
        &self.worker
    }

    /// Enqueue a job and return its id. Failures surface on the job record.
    pub async fn submit(&self, request: JobRequest) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = JobRecord {
            id,
            modality: self.modality,
            camera_id: request.camera_id.clone(),
            requester: request.requester,
            state: JobState::Waiting,
            submitted_at: Instant::now(),
            finished_at: None,
        };
        self.jobs.write().await.insert(id, record);

        tracing::debug!(
            job_id = id,
            modality = %self.modality,
            camera_id = %request.camera_id,
            "Job submitted"
        );

        let jobs = self.jobs.clone();
        let permits = self.permits.clone();
        let worker = self.worker.clone();
        let timeout = self.config.worker_timeout;
        let modality = self.modality;

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if !set_state(&jobs, id, JobState::Active).await {
                // Removed while waiting
                return;
            }

            let run = tokio::spawn(async move {
                worker.detect(request.image, request.calibration).await
            });
            let abort = run.abort_handle();

            let state = match tokio::time::timeout(timeout, run).await {
                Ok(Ok(Ok(result))) => JobState::Completed(result),
                Ok(Ok(Err(e))) => JobState::Failed(e.to_string()),
                Ok(Err(e)) => JobState::Failed(format!("worker task aborted: {}", e)),
                Err(_) => {
                    abort.abort();
                    JobState::Failed(format!("worker timed out after {:?}", timeout))
                }
            };

            if let JobState::Failed(reason) = &state {
                tracing::warn!(job_id = id, modality = %modality, reason = %reason, "Job failed");
            }
            set_state(&jobs, id, state).await;
        });

        id
    }

    pub async fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.write().await.remove(&id)
    }

    /// Drop jobs past their retention window. Returns the removed ids.
    pub async fn clean(&self) -> Vec<JobId> {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|job| {
                let (since, window) = match &job.state {
                    JobState::Completed(_) => (
                        job.finished_at.unwrap_or(job.submitted_at),
                        self.config.completed_retention,
                    ),
                    JobState::Failed(_) => (
                        job.finished_at.unwrap_or(job.submitted_at),
                        self.config.failed_retention,
                    ),
                    JobState::Waiting | JobState::Active => {
                        (job.submitted_at, self.config.stale_after)
                    }
                };
                now.saturating_duration_since(since) >= window
            })
            .map(|job| job.id)
            .collect();

        for id in &expired {
            jobs.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!(modality = %self.modality, removed = expired.len(), "Jobs cleaned");
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

/// Update a job's state; false when the job no longer exists
async fn set_state(jobs: &JobTable, id: JobId, state: JobState) -> bool {
    let mut jobs = jobs.write().await;
    match jobs.get_mut(&id) {
        Some(job) => {
            if state.is_finished() {
                job.finished_at = Some(Instant::now());
            }
            job.state = state;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection_worker::testing::{Script, ScriptedWorker};
    use crate::models::DetectionResult;
    use std::time::Duration;

    fn request(camera_id: &str) -> JobRequest {
        JobRequest {
            camera_id: camera_id.to_string(),
            image: vec![0xff, 0xd8],
            calibration: None,
            requester: None,
        }
    }

    async fn wait_finished(queue: &JobQueue, id: JobId) -> JobRecord {
        for _ in 0..200 {
            if let Some(job) = queue.get(id).await {
                if job.state.is_finished() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} did not finish", id);
    }

    fn queue(script: Vec<Script>, config: JobQueueConfig) -> JobQueue {
        JobQueue::new(
            Arc::new(ScriptedWorker::with_script(Modality::FaceMask, script)),
            config,
        )
    }

    #[tokio::test]
    async fn test_completed_job_keeps_result() {
        let mut result = DetectionResult::default();
        result.mean_distance = Some(2.0);
        let queue = queue(vec![Script::Detect(result)], JobQueueConfig::default());

        let id = queue.submit(request("c1")).await;
        let job = wait_finished(&queue, id).await;
        assert_eq!(job.camera_id, "c1");
        assert_eq!(job.modality, Modality::FaceMask);
        match job.state {
            JobState::Completed(r) => assert_eq!(r.mean_distance, Some(2.0)),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_worker_error_and_panic_fail_the_job() {
        let queue = queue(
            vec![Script::Fail("model not loaded"), Script::Panic],
            JobQueueConfig::default(),
        );

        let first = queue.submit(request("c1")).await;
        let job = wait_finished(&queue, first).await;
        assert!(matches!(job.state, JobState::Failed(ref m) if m.contains("model not loaded")));

        let second = queue.submit(request("c1")).await;
        assert_ne!(first, second);
        let job = wait_finished(&queue, second).await;
        assert!(matches!(job.state, JobState::Failed(_)));
    }

    #[tokio::test]
    async fn test_hung_worker_times_out() {
        let config = JobQueueConfig {
            worker_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let queue = queue(vec![Script::Hang], config);

        let id = queue.submit(request("c1")).await;
        let job = wait_finished(&queue, id).await;
        assert!(matches!(job.state, JobState::Failed(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn test_clean_applies_retention() {
        let config = JobQueueConfig {
            completed_retention: Duration::ZERO,
            failed_retention: Duration::from_secs(3600),
            ..Default::default()
        };
        let queue = queue(vec![Script::Detect(DetectionResult::default()), Script::Fail("x")], config);

        let done = queue.submit(request("c1")).await;
        wait_finished(&queue, done).await;
        let failed = queue.submit(request("c1")).await;
        wait_finished(&queue, failed).await;

        let removed = queue.clean().await;
        assert_eq!(removed, vec![done]);
        assert!(queue.get(done).await.is_none());
        assert!(queue.get(failed).await.is_some());

        queue.remove(failed).await;
        assert!(queue.is_empty().await);
    }
}
