//! Camera session types

use crate::models::Calibration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Message pushed to watchers when their camera drops off
pub const DISCONNECT_NOTICE: &str = "Camera has been disconnected to the server.";

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frame broadcast period per watched camera
    pub broadcast_interval: Duration,
    /// Deadline for one device snapshot fetch
    pub snapshot_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: Duration::from_millis(33),
            snapshot_timeout: Duration::from_secs(5),
        }
    }
}

/// Point-in-time view of one camera's session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub camera_id: String,
    pub name: String,
    /// A device handle exists
    pub connected: bool,
    pub reachable: bool,
    pub need_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    pub watchers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<Calibration>,
}
