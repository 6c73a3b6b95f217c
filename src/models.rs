//! Shared models and types
//!
//! Types used by more than one component (detection payloads, calibration,
//! modality keys) live here to avoid circular dependencies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Violation modality. Each modality has its own worker and job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// Social distance detection
    #[serde(rename = "sdd")]
    SocialDistance,
    /// Face mask detection
    #[serde(rename = "fmd")]
    FaceMask,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::SocialDistance, Modality::FaceMask];

    /// Queue / event key ("sdd", "fmd")
    pub fn key(&self) -> &'static str {
        match self {
            Modality::SocialDistance => "sdd",
            Modality::FaceMask => "fmd",
        }
    }

    /// Violation type recorded on violators and reports
    pub fn violation(&self) -> ViolationType {
        match self {
            Modality::SocialDistance => ViolationType::NoSocialDistance,
            Modality::FaceMask => ViolationType::NoMask,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Violation type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationType {
    #[serde(rename = "NoSD")]
    NoSocialDistance,
    #[serde(rename = "NoMask")]
    NoMask,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::NoSocialDistance => "NoSD",
            ViolationType::NoMask => "NoMask",
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            ViolationType::NoSocialDistance => Modality::SocialDistance,
            ViolationType::NoMask => Modality::FaceMask,
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Camera calibration used for distance estimation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Focal length in pixels
    pub focal_length: f64,
    /// Reference shoulder width in metres
    pub shoulder_length: f64,
    /// Minimum safe distance in metres
    pub threshold: f64,
}

/// One violating entity produced by a detection worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolatorEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub violation: ViolationType,
    /// Normalised image evidence (base64 JPEG crop)
    #[serde(default)]
    pub image: String,
    /// Confidence in [0,1]
    #[serde(default)]
    pub score: f64,
    /// Ids of entities this one was too close to (distance modality only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,
}

/// Any entity the worker detected (person, face)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    pub id: String,
    /// Normalised [x, y, w, h]
    #[serde(default)]
    pub bbox: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
}

/// Detection worker output. Empty maps are a valid "nothing detected" result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(default)]
    pub violators: BTreeMap<String, ViolatorEntity>,
    #[serde(default)]
    pub entities: BTreeMap<String, DetectedEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_distance: Option<f64>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.violators.is_empty() && self.entities.is_empty()
    }

    pub fn has_violators(&self) -> bool {
        !self.violators.is_empty()
    }

    pub fn violator_list(&self) -> Vec<ViolatorEntity> {
        self.violators.values().cloned().collect()
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }
}
