//! Alert log and fan-out.
//!
//! Supervisors push admitted alerts into a bounded channel. A single fan-out
//! task drains it: append to the log, invoke every subscriber in registration
//! order, then hand the alert to each notifier in its own task. One consumer
//! means every subscriber sees alerts in the same order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{AlertRecord, Notifier};
use crate::AlertId;

pub type AlertCallback = Arc<dyn Fn(&AlertRecord) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct AlertHub {
    log: Mutex<Vec<AlertRecord>>,
    subscribers: Mutex<Vec<(SubscriptionId, AlertCallback)>>,
    notifiers: Mutex<Vec<Arc<dyn Notifier>>>,
    next_subscription: AtomicU64,
}

impl AlertHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked once per admitted alert.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&AlertRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Arc::new(callback)));
        id
    }

    /// Detach a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        lock(&self.notifiers).push(notifier);
    }

    /// Append to the log and fan out. Called by the fan-out task only.
    pub fn publish(&self, alert: AlertRecord) {
        lock(&self.log).push(alert.clone());
        log::info!(
            "AlertHub: new alert {} from {}: {} (confidence: {:.2})",
            alert.id,
            alert.source_id,
            alert.message,
            alert.confidence
        );

        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let subscribers: Vec<_> = lock(&self.subscribers).iter().cloned().collect();
        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(&alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("AlertHub: subscriber {:?} failed on {}: {:#}", id, alert.id, e)
                }
                Err(_) => log::error!("AlertHub: subscriber {:?} panicked on {}", id, alert.id),
            }
        }

        let notifiers: Vec<_> = lock(&self.notifiers).clone();
        if notifiers.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("AlertHub: no runtime, skipping notifiers for {}", alert.id);
            return;
        };
        for notifier in notifiers {
            let alert = alert.clone();
            runtime.spawn(async move {
                if let Err(e) = notifier.deliver(&alert).await {
                    log::warn!(
                        "AlertHub: notifier {} failed on {}: {:#}",
                        notifier.name(),
                        alert.id,
                        e
                    );
                }
            });
        }
    }

    /// Most recent `limit` alerts, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AlertRecord> {
        let mut alerts = lock(&self.log).clone();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts.truncate(limit);
        alerts
    }

    /// Flip the acknowledged flag. Returns false if the id is unknown.
    pub fn acknowledge(&self, id: &AlertId) -> bool {
        match lock(&self.log).iter_mut().find(|alert| &alert.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.log).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drain `rx` into `hub` until every sender is gone.
pub fn spawn_fanout(hub: Arc<AlertHub>, mut rx: mpsc::Receiver<AlertRecord>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            hub.publish(alert);
        }
        log::debug!("AlertHub: fan-out drained");
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
