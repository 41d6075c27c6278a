//! Per-source cooldown filter.
//!
//! Leaky and memoryless: an alert is admitted if its signature was never
//! admitted before, or the last admission is at least `cooldown` old. There is
//! no burst accumulation.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::AlertSignature;

/// Expired entries are swept once the map grows past this.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Suppressed { remaining: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

pub struct AlertGate {
    window: TimeDelta,
    last_admitted: Mutex<HashMap<AlertSignature, DateTime<Utc>>>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            window: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
            last_admitted: Mutex::new(HashMap::new()),
        }
    }

    /// Decide on one alert. Admission records `now` for the signature.
    ///
    /// Decisions for a signature are serialised by the gate's lock.
    pub fn admit(&self, signature: &AlertSignature, now: DateTime<Utc>) -> Admission {
        let mut last = self.lock();
        if let Some(prior) = last.get(signature) {
            let elapsed = now.signed_duration_since(*prior);
            if elapsed < self.window {
                let remaining = self
                    .window
                    .checked_sub(&elapsed)
                    .and_then(|left| left.to_std().ok())
                    .unwrap_or_default();
                return Admission::Suppressed { remaining };
            }
        }
        last.insert(signature.clone(), now);
        if last.len() > PRUNE_THRESHOLD {
            let window = self.window;
            last.retain(|_, at| now.signed_duration_since(*at) < window);
        }
        Admission::Admitted
    }

    /// Signatures currently remembered.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AlertSignature, DateTime<Utc>>> {
        self.last_admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertType;

    fn person() -> AlertSignature {
        AlertSignature::new(AlertType::ObjectDetected, "Detected person")
    }

    #[test]
    fn first_occurrence_is_admitted() {
        let gate = AlertGate::new(Duration::from_secs(60));
        assert_eq!(gate.admit(&person(), Utc::now()), Admission::Admitted);
    }

    #[test]
    fn repeat_inside_window_is_suppressed_then_admitted_after() {
        let gate = AlertGate::new(Duration::from_secs(60));
        let t0 = Utc::now();

        assert!(gate.admit(&person(), t0).is_admitted());
        assert_eq!(
            gate.admit(&person(), t0 + TimeDelta::seconds(5)),
            Admission::Suppressed {
                remaining: Duration::from_secs(55)
            }
        );
        assert!(gate.admit(&person(), t0 + TimeDelta::seconds(65)).is_admitted());
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let gate = AlertGate::new(Duration::from_secs(60));
        let t0 = Utc::now();
        gate.admit(&person(), t0);
        assert!(gate.admit(&person(), t0 + TimeDelta::seconds(60)).is_admitted());
    }

    #[test]
    fn suppressed_attempts_do_not_extend_the_window() {
        let gate = AlertGate::new(Duration::from_secs(60));
        let t0 = Utc::now();
        gate.admit(&person(), t0);
        gate.admit(&person(), t0 + TimeDelta::seconds(30));
        gate.admit(&person(), t0 + TimeDelta::seconds(59));
        assert!(gate.admit(&person(), t0 + TimeDelta::seconds(61)).is_admitted());
    }

    #[test]
    fn any_window_admits_exactly_one_of_two_close_attempts() {
        let t0 = Utc::now();
        for window_s in [1u64, 7, 60, 3600] {
            let gate = AlertGate::new(Duration::from_secs(window_s));
            for delta_ms in [0i64, 1, (window_s as i64) * 1000 - 1] {
                let gate_key = AlertSignature::new(AlertType::CustomPrompt, format!("k{}", delta_ms));
                let first = gate.admit(&gate_key, t0).is_admitted();
                let second = gate
                    .admit(&gate_key, t0 + TimeDelta::milliseconds(delta_ms))
                    .is_admitted();
                assert!(first);
                assert!(!second, "window={}s delta={}ms", window_s, delta_ms);
            }
        }
    }

    #[test]
    fn signatures_are_independent() {
        let gate = AlertGate::new(Duration::from_secs(60));
        let t0 = Utc::now();
        let prompt = AlertSignature::new(AlertType::CustomPrompt, "Detected person");
        assert!(gate.admit(&person(), t0).is_admitted());
        assert!(gate.admit(&prompt, t0).is_admitted());
        assert_eq!(gate.tracked(), 2);
    }

    #[test]
    fn expired_signatures_are_swept_when_map_grows() {
        let gate = AlertGate::new(Duration::from_secs(1));
        let t0 = Utc::now();
        for i in 0..PRUNE_THRESHOLD {
            gate.admit(
                &AlertSignature::new(AlertType::ObjectDetected, format!("m{}", i)),
                t0,
            );
        }
        gate.admit(&person(), t0 + TimeDelta::seconds(5));
        assert_eq!(gate.tracked(), 1);
    }
}
