//! Camera Status Tracker
//!
//! Tracks device reachability per camera and reports lost/recovered
//! transitions. Only transitions produce events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Camera connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraConnectionStatus {
    /// Never probed
    Unknown,
    Online,
    Offline,
}

/// Camera status transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStatusEvent {
    /// Online -> Offline, or first probe failed
    Lost,
    /// Offline -> Online
    Recovered,
}

impl CameraStatusEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatusEvent::Lost => "lost",
            CameraStatusEvent::Recovered => "recovered",
        }
    }
}

/// Tracks camera reachability and detects transitions
pub struct CameraStatusTracker {
    statuses: RwLock<HashMap<String, CameraConnectionStatus>>,
}

impl CameraStatusTracker {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Update camera status and return the transition event, if any.
    ///
    /// Unknown -> Online is silent; Unknown -> Offline counts as Lost.
    pub async fn update_status(&self, camera_id: &str, is_online: bool) -> Option<CameraStatusEvent> {
        let new_status = if is_online {
            CameraConnectionStatus::Online
        } else {
            CameraConnectionStatus::Offline
        };
        let prev = self
            .statuses
            .write()
            .await
            .insert(camera_id.to_string(), new_status)
            .unwrap_or(CameraConnectionStatus::Unknown);

        match (prev, new_status) {
            (CameraConnectionStatus::Online, CameraConnectionStatus::Offline)
            | (CameraConnectionStatus::Unknown, CameraConnectionStatus::Offline) => {
                tracing::warn!(camera_id = %camera_id, "Camera connection lost");
                Some(CameraStatusEvent::Lost)
            }
            (CameraConnectionStatus::Offline, CameraConnectionStatus::Online) => {
                tracing::info!(camera_id = %camera_id, "Camera connection recovered");
                Some(CameraStatusEvent::Recovered)
            }
            _ => None,
        }
    }

    pub async fn get_status(&self, camera_id: &str) -> CameraConnectionStatus {
        self.statuses
            .read()
            .await
            .get(camera_id)
            .copied()
            .unwrap_or(CameraConnectionStatus::Unknown)
    }

    pub async fn get_offline_cameras(&self) -> Vec<String> {
        let mut offline: Vec<String> = self
            .statuses
            .read()
            .await
            .iter()
            .filter(|(_, status)| **status == CameraConnectionStatus::Offline)
            .map(|(id, _)| id.clone())
            .collect();
        offline.sort();
        offline
    }

    pub async fn snapshot(&self) -> HashMap<String, CameraConnectionStatus> {
        self.statuses.read().await.clone()
    }
}

impl Default for CameraStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
