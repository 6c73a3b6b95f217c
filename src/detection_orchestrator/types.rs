//! Detection orchestrator types

use crate::job_queue::JobQueueConfig;
use crate::models::Modality;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Submission tick, distance modality
    pub sdd_tick: Duration,
    /// Submission tick, mask modality
    pub fmd_tick: Duration,
    /// Reconcile tick for both modalities
    pub reconcile_interval: Duration,
    pub queue: JobQueueConfig,
}

impl OrchestratorConfig {
    pub fn tick_for(&self, modality: Modality) -> Duration {
        match modality {
            Modality::SocialDistance => self.sdd_tick,
            Modality::FaceMask => self.fmd_tick,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sdd_tick: Duration::from_secs(5),
            fmd_tick: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(1),
            queue: JobQueueConfig::default(),
        }
    }
}

/// Detection pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionState {
    /// Workers not ready; ticks and reconciliation are suppressed
    Unknown,
    Idle,
    Ready,
    /// A tick is submitting work
    Active,
}

/// Per-modality job counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalityCounters {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Head job vanished before it was reconciled
    pub lost: u64,
    /// Dropped by the retention sweep
    pub swept: u64,
    /// Currently in the FIFO
    pub pending: usize,
}

/// Detector status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorStatus {
    pub state: DetectionState,
    pub sdd: ModalityCounters,
    pub fmd: ModalityCounters,
}

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub completed: usize,
    pub failed: usize,
    pub lost: usize,
    pub swept: usize,
}

impl ReconcileSummary {
    pub fn handled(&self) -> usize {
        self.completed + self.failed + self.lost + self.swept
    }
}
