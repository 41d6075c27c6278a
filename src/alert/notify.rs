use anyhow::Result;
use async_trait::async_trait;

use super::AlertRecord;

/// Best-effort outbound delivery (email, webhook, ...).
///
/// Failures are logged by the hub and never reach the pipeline.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, alert: &AlertRecord) -> Result<()>;
}

/// Writes each alert as one JSON line to the log.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, alert: &AlertRecord) -> Result<()> {
        log::info!("alert {}", serde_json::to_string(alert)?);
        Ok(())
    }
}
