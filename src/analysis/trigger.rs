//! Analysis cadence and candidate conversion.
//!
//! The trigger counts ingested frames and fires on every Nth one, where
//! `N = max(frame_skip + 1, MIN_CADENCE)`. At most one analysis per source is
//! in flight: a cadence hit while one is outstanding is skipped, not queued.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::result::{BoundingBox, DetectionEvent, DetectionOrigin};
use crate::alert::{AlertSignature, AlertType};
use crate::SourceId;

/// Floor on the cadence, whatever `frame_skip` says.
pub const MIN_CADENCE: u64 = 3;

/// Outcome of feeding one ingested frame to the trigger.
#[derive(Debug)]
pub enum CadenceDecision {
    /// Not a cadence frame.
    Wait,
    /// Cadence frame, but the previous analysis is still running.
    Busy,
    /// Cadence frame; the slot must be held until the analysis finishes.
    Fire(AnalysisSlot),
}

/// Per-run cadence state for one source. The in-flight flag may outlive the
/// run so an analysis orphaned by a stop still counts against its source.
#[derive(Debug)]
pub struct AnalysisTrigger {
    cadence: u64,
    frames: u64,
    in_flight: Arc<AtomicBool>,
}

impl AnalysisTrigger {
    pub fn new(frame_skip: u32) -> Self {
        Self::with_in_flight(frame_skip, Arc::new(AtomicBool::new(false)))
    }

    /// Trigger whose in-flight flag is shared with earlier runs of the source.
    pub fn with_in_flight(frame_skip: u32, in_flight: Arc<AtomicBool>) -> Self {
        Self {
            cadence: (u64::from(frame_skip) + 1).max(MIN_CADENCE),
            frames: 0,
            in_flight,
        }
    }

    pub fn cadence(&self) -> u64 {
        self.cadence
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Count one ingested frame and decide whether to analyse it.
    pub fn on_frame(&mut self) -> CadenceDecision {
        self.frames += 1;
        if !self.frames.is_multiple_of(self.cadence) {
            return CadenceDecision::Wait;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return CadenceDecision::Busy;
        }
        CadenceDecision::Fire(AnalysisSlot {
            flag: self.in_flight.clone(),
        })
    }
}

/// Held by the running analysis. Dropping it (including during a panic
/// unwind) frees the source for the next cadence hit.
#[derive(Debug)]
pub struct AnalysisSlot {
    flag: Arc<AtomicBool>,
}

impl Drop for AnalysisSlot {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ----------------------------------------------------------------------------
// Candidate alerts
// ----------------------------------------------------------------------------

/// A detection that cleared the confidence floor, tagged with its source.
/// Becomes an `AlertRecord` only if the source's gate admits it.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateAlert {
    pub source_id: SourceId,
    pub source_name: String,
    pub alert_type: AlertType,
    pub message: String,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
    pub detected_at: DateTime<Utc>,
}

impl CandidateAlert {
    pub fn signature(&self) -> AlertSignature {
        AlertSignature::new(self.alert_type, self.message.clone())
    }
}

/// Convert engine output into candidates, dropping anything below
/// `min_confidence`.
pub fn candidate_alerts(
    source_id: &SourceId,
    source_name: &str,
    events: Vec<DetectionEvent>,
    min_confidence: f32,
) -> Vec<CandidateAlert> {
    events
        .into_iter()
        .filter(|event| event.confidence >= min_confidence)
        .map(|event| CandidateAlert {
            source_id: source_id.clone(),
            source_name: source_name.to_string(),
            alert_type: match event.origin {
                DetectionOrigin::Prompt => AlertType::CustomPrompt,
                DetectionOrigin::Object => AlertType::ObjectDetected,
            },
            message: event.description,
            confidence: event.confidence,
            bbox: event.bbox,
            detected_at: event.timestamp,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_has_a_floor() {
        assert_eq!(AnalysisTrigger::new(0).cadence(), 3);
        assert_eq!(AnalysisTrigger::new(1).cadence(), 3);
        assert_eq!(AnalysisTrigger::new(2).cadence(), 3);
        assert_eq!(AnalysisTrigger::new(5).cadence(), 6);
    }

    #[test]
    fn fires_on_every_nth_frame() {
        let mut trigger = AnalysisTrigger::new(0);
        let mut fired = Vec::new();
        for frame in 1..=9 {
            if let CadenceDecision::Fire(slot) = trigger.on_frame() {
                fired.push(frame);
                drop(slot);
            }
        }
        assert_eq!(fired, vec![3, 6, 9]);
        assert_eq!(trigger.frames_seen(), 9);
    }

    #[test]
    fn cadence_hit_while_busy_is_skipped_not_queued() {
        let mut trigger = AnalysisTrigger::new(0);
        trigger.on_frame();
        trigger.on_frame();
        let slot = match trigger.on_frame() {
            CadenceDecision::Fire(slot) => slot,
            other => panic!("expected fire, got {:?}", other),
        };
        assert!(trigger.in_flight());

        trigger.on_frame();
        trigger.on_frame();
        assert!(matches!(trigger.on_frame(), CadenceDecision::Busy));

        drop(slot);
        assert!(!trigger.in_flight());
        // The skipped hit is not replayed; the next one fires.
        trigger.on_frame();
        trigger.on_frame();
        assert!(matches!(trigger.on_frame(), CadenceDecision::Fire(_)));
    }

    #[test]
    fn shared_flag_keeps_a_new_run_busy() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut first = AnalysisTrigger::with_in_flight(0, flag.clone());
        first.on_frame();
        first.on_frame();
        let slot = match first.on_frame() {
            CadenceDecision::Fire(slot) => slot,
            other => panic!("expected fire, got {:?}", other),
        };
        drop(first);

        let mut second = AnalysisTrigger::with_in_flight(0, flag);
        second.on_frame();
        second.on_frame();
        assert!(matches!(second.on_frame(), CadenceDecision::Busy));

        drop(slot);
        second.on_frame();
        second.on_frame();
        assert!(matches!(second.on_frame(), CadenceDecision::Fire(_)));
    }

    #[test]
    fn candidates_respect_confidence_floor_and_origin() {
        let id = SourceId::from("cam-1");
        let events = vec![
            DetectionEvent::object("Detected person", 0.9).with_bbox(BoundingBox {
                x1: 1.0,
                y1: 2.0,
                x2: 3.0,
                y2: 4.0,
            }),
            DetectionEvent::object("Detected cat", 0.5),
            DetectionEvent::prompt("Custom prompt matched: door open", 0.7),
        ];
        let candidates = candidate_alerts(&id, "Cam1", events, 0.7);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].alert_type, AlertType::ObjectDetected);
        assert_eq!(candidates[0].message, "Detected person");
        assert_eq!(candidates[0].source_name, "Cam1");
        assert!(candidates[0].bbox.is_some());
        assert_eq!(candidates[1].alert_type, AlertType::CustomPrompt);
        assert_eq!(candidates[1].source_id, id);
    }
}
