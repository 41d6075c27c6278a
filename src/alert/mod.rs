//! Alerts: model, per-source cooldown gate, log and fan-out, notifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analysis::CandidateAlert;
use crate::{AlertId, SourceId};

mod gate;
mod hub;
mod notify;

pub use gate::{Admission, AlertGate};
pub use hub::{spawn_fanout, AlertCallback, AlertHub, SubscriptionId};
pub use notify::{LogNotifier, Notifier};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Fixed-class object detection matched.
    ObjectDetected,
    /// An open-vocabulary prompt matched.
    CustomPrompt,
}

/// Dedup / cooldown key: "the same kind of alert".
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AlertSignature {
    pub alert_type: AlertType,
    pub message: String,
}

impl AlertSignature {
    pub fn new(alert_type: AlertType, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            message: message.into(),
        }
    }
}

/// An admitted alert. Append-only apart from `acknowledged`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: AlertId,
    pub source_id: SourceId,
    pub alert_type: AlertType,
    pub message: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AlertRecord {
    /// Materialise an admitted candidate. Copies the source name and bounding
    /// box (if any) into the metadata.
    pub fn from_candidate(candidate: CandidateAlert) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "source_name".to_string(),
            serde_json::Value::String(candidate.source_name),
        );
        if let Some(bbox) = candidate.bbox {
            metadata.insert(
                "bbox".to_string(),
                serde_json::json!([bbox.x1, bbox.y1, bbox.x2, bbox.y2]),
            );
        }
        Self {
            id: AlertId::generate(),
            source_id: candidate.source_id,
            alert_type: candidate.alert_type,
            message: candidate.message,
            confidence: candidate.confidence,
            timestamp: candidate.detected_at,
            acknowledged: false,
            metadata,
        }
    }

    pub fn signature(&self) -> AlertSignature {
        AlertSignature::new(self.alert_type, self.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::BoundingBox;

    #[test]
    fn record_carries_source_name_and_bbox() {
        let candidate = CandidateAlert {
            source_id: SourceId::from("cam"),
            source_name: "Cam1".to_string(),
            alert_type: AlertType::ObjectDetected,
            message: "Detected person".to_string(),
            confidence: 0.9,
            bbox: Some(BoundingBox {
                x1: 1.0,
                y1: 2.0,
                x2: 3.0,
                y2: 4.0,
            }),
            detected_at: Utc::now(),
        };
        let record = AlertRecord::from_candidate(candidate);

        assert!(!record.acknowledged);
        assert_eq!(record.metadata["source_name"], "Cam1");
        assert_eq!(record.metadata["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(
            record.signature(),
            AlertSignature::new(AlertType::ObjectDetected, "Detected person")
        );
    }

    #[test]
    fn alert_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AlertType::CustomPrompt).unwrap(),
            "\"custom_prompt\""
        );
    }
}
