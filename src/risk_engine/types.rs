//! Risk engine data types

use crate::models::{Modality, ViolationType, ViolatorEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Camera id used for the cross-camera combined mean
pub const COMBINED_CAMERA_ID: &str = "N/A";

/// [violators, entities, ratio] for a factor, or
/// [currentMeanDistance, referenceThreshold, normalizedRatio] for `p2p`
pub type FactorData = [f64; 3];

/// Per-modality factor tuples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Factors {
    /// Distance shortfall: [threshold - meanDistance, threshold, ratio]
    #[serde(rename = "_p2p")]
    pub p2p: FactorData,
    /// Social distance violations
    pub sdv: FactorData,
    /// Face mask violations
    pub fmv: FactorData,
}

impl Factors {
    /// Seed factors for a camera with the given distance threshold
    pub fn seeded(threshold: f64) -> Self {
        Self {
            p2p: [0.0, threshold, 0.0],
            sdv: [0.0, 0.0, 0.0],
            fmv: [0.0, 0.0, 0.0],
        }
    }

    /// The violation tuple fed by a modality
    pub fn for_modality_mut(&mut self, modality: Modality) -> &mut FactorData {
        match modality {
            Modality::SocialDistance => &mut self.sdv,
            Modality::FaceMask => &mut self.fmv,
        }
    }

    pub fn tuples(&self) -> [&FactorData; 3] {
        [&self.p2p, &self.sdv, &self.fmv]
    }

    pub fn tuples_mut(&mut self) -> [&mut FactorData; 3] {
        [&mut self.p2p, &mut self.sdv, &mut self.fmv]
    }

    pub fn zeroed() -> Self {
        Self {
            p2p: [0.0; 3],
            sdv: [0.0; 3],
            fmv: [0.0; 3],
        }
    }
}

/// Discrete risk label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLabel {
    Unknown,
    Safe,
    Low,
    Moderate,
    High,
    Danger,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Unknown => "UNKNOWN",
            RiskLabel::Safe => "SAFE",
            RiskLabel::Low => "LOW",
            RiskLabel::Moderate => "MODERATE",
            RiskLabel::High => "HIGH",
            RiskLabel::Danger => "DANGER",
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RiskLabel {
    fn from(s: &str) -> Self {
        match s {
            "SAFE" => RiskLabel::Safe,
            "LOW" => RiskLabel::Low,
            "MODERATE" => RiskLabel::Moderate,
            "HIGH" => RiskLabel::High,
            "DANGER" => RiskLabel::Danger,
            _ => RiskLabel::Unknown,
        }
    }
}

/// Live per-camera risk state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountData {
    pub camera_id: String,
    pub name: String,
    pub p2p: FactorData,
    pub factors: Factors,
    pub score: f64,
    pub label: RiskLabel,
}

impl CountData {
    /// Initial state for a camera
    pub fn seeded(camera_id: &str, name: &str, threshold: f64) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            name: name.to_string(),
            p2p: [threshold, threshold, 1.0],
            factors: Factors::seeded(threshold),
            score: 0.0,
            label: RiskLabel::Unknown,
        }
    }
}

/// Rolling mean shares the CountData shape
pub type MeanCountData = CountData;

/// Persisted CountData snapshot. `notif_message` marks notification snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountSnapshot {
    #[serde(flatten)]
    pub count: CountData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notif_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Emitted when a camera's label changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub message: String,
    pub data: CountData,
    pub created_at: DateTime<Utc>,
}

/// Persisted violator (written once)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolatorRecord {
    pub record_id: String,
    pub camera_id: String,
    pub entity_id: String,
    #[serde(rename = "type")]
    pub violation: ViolationType,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    /// Image evidence; archived to file, not stored in the database
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    pub created_at: DateTime<Utc>,
}

/// One accepted violation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: String,
    pub camera_id: String,
    #[serde(rename = "type")]
    pub violation: ViolationType,
    /// Entity ids seen in the frame
    pub entities: Vec<String>,
    /// Violating entity ids
    pub violators: Vec<String>,
    /// Persisted violator record ids
    pub violator_records: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_distance: Option<f64>,
    /// Unix millis
    pub reported_at: i64,
}

impl Report {
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn violator_count(&self) -> usize {
        self.violators.len()
    }
}

/// Latest violator list per modality for a camera
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionData {
    pub sdd: Vec<ViolatorEntity>,
    pub fmd: Vec<ViolatorEntity>,
}

impl DetectionData {
    pub fn for_modality_mut(&mut self, modality: Modality) -> &mut Vec<ViolatorEntity> {
        match modality {
            Modality::SocialDistance => &mut self.sdd,
            Modality::FaceMask => &mut self.fmd,
        }
    }
}
