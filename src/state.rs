//! Application state
//!
//! Holds all shared components and configuration

use crate::camera_registry::CameraRegistry;
use crate::camera_session::{CameraSessionManager, SessionConfig};
use crate::camera_status_tracker::CameraStatusTracker;
use crate::detection_orchestrator::{DetectionOrchestrator, OrchestratorConfig};
use crate::job_queue::JobQueueConfig;
use crate::realtime_hub::RealtimeHub;
use crate::risk_engine::{RiskEngine, RiskEngineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// MySQL URL; in-memory records when unset
    pub database_url: Option<String>,
    /// Rows per table when records are kept in memory
    pub memory_store_capacity: usize,
    /// Distance-modality detection worker
    pub sdd_worker_url: String,
    /// Mask-modality detection worker
    pub fmd_worker_url: String,
    pub host: String,
    pub port: u16,
    /// Violator / report JSON archive
    pub archive_dir: Option<PathBuf>,
    pub sdd_tick_ms: u64,
    pub fmd_tick_ms: u64,
    pub reconcile_ms: u64,
    pub broadcast_interval_ms: u64,
    pub snapshot_timeout_ms: u64,
    /// WS-Discovery listen window
    pub discovery_timeout_ms: u64,
    /// Periodic refresh (re-probe, drop dead devices)
    pub discovery_interval_sec: u64,
    pub mean_flush_sec: u64,
    pub worker_timeout_ms: u64,
    pub job_completed_retention_sec: u64,
    pub job_failed_retention_sec: u64,
    pub job_stale_sec: u64,
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            memory_store_capacity: env_u64("MEMORY_STORE_CAPACITY", 10_000) as usize,
            sdd_worker_url: std::env::var("SDD_WORKER_URL")
                .unwrap_or_else(|_| "http://localhost:9100".to_string()),
            fmd_worker_url: std::env::var("FMD_WORKER_URL")
                .unwrap_or_else(|_| "http://localhost:9200".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            archive_dir: std::env::var("ARCHIVE_DIR").ok().map(PathBuf::from),
            sdd_tick_ms: env_u64("SDD_TICK_MS", 5000),
            fmd_tick_ms: env_u64("FMD_TICK_MS", 5000),
            reconcile_ms: env_u64("RECONCILE_MS", 1000),
            broadcast_interval_ms: env_u64("BROADCAST_INTERVAL_MS", 33),
            snapshot_timeout_ms: env_u64("SNAPSHOT_TIMEOUT_MS", 5000),
            discovery_timeout_ms: env_u64("DISCOVERY_TIMEOUT_MS", 3000),
            discovery_interval_sec: env_u64("DISCOVERY_INTERVAL_SEC", 60),
            mean_flush_sec: env_u64("MEAN_FLUSH_SEC", 600),
            worker_timeout_ms: env_u64("WORKER_TIMEOUT_MS", 15000),
            job_completed_retention_sec: env_u64("JOB_COMPLETED_RETENTION_SEC", 30),
            job_failed_retention_sec: env_u64("JOB_FAILED_RETENTION_SEC", 60),
            job_stale_sec: env_u64("JOB_STALE_SEC", 120),
        }
    }
}

impl AppConfig {
    pub fn queue_config(&self) -> JobQueueConfig {
        JobQueueConfig {
            worker_timeout: Duration::from_millis(self.worker_timeout_ms),
            completed_retention: Duration::from_secs(self.job_completed_retention_sec),
            failed_retention: Duration::from_secs(self.job_failed_retention_sec),
            stale_after: Duration::from_secs(self.job_stale_sec),
            ..JobQueueConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            sdd_tick: Duration::from_millis(self.sdd_tick_ms),
            fmd_tick: Duration::from_millis(self.fmd_tick_ms),
            reconcile_interval: Duration::from_millis(self.reconcile_ms),
            queue: self.queue_config(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            broadcast_interval: Duration::from_millis(self.broadcast_interval_ms),
            snapshot_timeout: Duration::from_millis(self.snapshot_timeout_ms),
        }
    }

    pub fn risk_config(&self) -> RiskEngineConfig {
        RiskEngineConfig {
            mean_flush_interval: Duration::from_secs(self.mean_flush_sec),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<CameraRegistry>,
    pub sessions: Arc<CameraSessionManager>,
    pub orchestrator: Arc<DetectionOrchestrator>,
    pub risk: Arc<RiskEngine>,
    /// RealtimeHub (WebSocket push)
    pub realtime: Arc<RealtimeHub>,
    pub camera_status: Arc<CameraStatusTracker>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_configs_follow_app_config() {
        let config = AppConfig {
            sdd_tick_ms: 2000,
            reconcile_ms: 250,
            worker_timeout_ms: 800,
            job_stale_sec: 10,
            ..AppConfig::default()
        };
        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.sdd_tick, Duration::from_secs(2));
        assert_eq!(orchestrator.reconcile_interval, Duration::from_millis(250));
        assert_eq!(orchestrator.queue.worker_timeout, Duration::from_millis(800));
        assert_eq!(orchestrator.queue.stale_after, Duration::from_secs(10));
        assert_eq!(orchestrator.queue.concurrency, 1);
    }
}
