use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a detection came from. Decides the alert type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionOrigin {
    /// Fixed-class object detector.
    Object,
    /// Open-vocabulary prompt matching.
    Prompt,
}

/// Bounding region in pixel coordinates (corner form).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// One finding from the analysis engine. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Confidence in 0..=1.
    pub confidence: f32,
    pub description: String,
    pub bbox: Option<BoundingBox>,
    pub origin: DetectionOrigin,
    pub timestamp: DateTime<Utc>,
}

impl DetectionEvent {
    pub fn object(description: impl Into<String>, confidence: f32) -> Self {
        Self {
            confidence,
            description: description.into(),
            bbox: None,
            origin: DetectionOrigin::Object,
            timestamp: Utc::now(),
        }
    }

    pub fn prompt(description: impl Into<String>, confidence: f32) -> Self {
        Self {
            origin: DetectionOrigin::Prompt,
            ..Self::object(description, confidence)
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}
