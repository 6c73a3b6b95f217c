//! Job queue types

use crate::models::{Calibration, DetectionResult, Modality};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub type JobId = u64;

/// Job lifecycle state
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Waiting,
    Active,
    Completed(DetectionResult),
    Failed(String),
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed(_) | JobState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed(_) => "completed",
            JobState::Failed(_) => "failed",
        }
    }
}

/// Work item handed to `JobQueue::submit`
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub camera_id: String,
    pub image: Vec<u8>,
    pub calibration: Option<Calibration>,
    /// Connection that asked for an on-demand detection
    pub requester: Option<Uuid>,
}

/// Tracked job
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub modality: Modality,
    pub camera_id: String,
    pub requester: Option<Uuid>,
    pub state: JobState,
    pub submitted_at: Instant,
    pub finished_at: Option<Instant>,
}

/// JobQueue configuration
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Jobs running against the worker at once
    pub concurrency: usize,
    pub worker_timeout: Duration,
    /// Finished jobs are dropped after these windows
    pub completed_retention: Duration,
    pub failed_retention: Duration,
    /// Unfinished jobs older than this are dropped
    pub stale_after: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            worker_timeout: Duration::from_secs(15),
            completed_retention: Duration::from_secs(30),
            failed_retention: Duration::from_secs(60),
            stale_after: Duration::from_secs(120),
        }
    }
}
