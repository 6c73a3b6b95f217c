//! Camera registry data types

use crate::models::Calibration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Threshold used when a camera was never calibrated
pub const DEFAULT_THRESHOLD_M: f64 = 1.0;

/// Camera record (durable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Camera {
    pub camera_id: String,
    /// WS-Discovery endpoint reference (stable device identity)
    pub urn: String,
    pub name: String,
    /// ONVIF device service address (XAddr)
    pub address: Option<String>,
    pub login: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub focal_length: Option<f64>,
    pub shoulder_length: Option<f64>,
    pub threshold: Option<f64>,
    pub need_auth: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Camera {
    /// New record for a freshly discovered device
    pub fn discovered(camera_id: String, urn: String, name: String, address: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            camera_id,
            urn,
            name,
            address,
            login: None,
            password: None,
            focal_length: None,
            shoulder_length: None,
            threshold: None,
            need_auth: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full calibration triple, if every field is set
    pub fn calibration(&self) -> Option<Calibration> {
        match (self.focal_length, self.shoulder_length, self.threshold) {
            (Some(focal_length), Some(shoulder_length), Some(threshold)) => Some(Calibration {
                focal_length,
                shoulder_length,
                threshold,
            }),
            _ => None,
        }
    }

    /// Distance threshold, falling back to the default for uncalibrated cameras
    pub fn threshold_or_default(&self) -> f64 {
        match self.threshold {
            Some(t) if t > 0.0 => t,
            _ => DEFAULT_THRESHOLD_M,
        }
    }

    /// Credentials to present to the device, if any
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.login, &self.password) {
            (Some(login), Some(password)) if !login.is_empty() => Some(Credentials {
                login: login.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Device login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Calibration update request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrateRequest {
    pub focal_length: f64,
    pub shoulder_length: f64,
    pub threshold: f64,
}

/// Credential update request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub login: String,
    pub password: String,
}
