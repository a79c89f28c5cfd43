//! Event handlers wired into the dispatcher at startup.

use async_trait::async_trait;

use artifact_gov_core::events::{EventEnvelope, EventHandler};

/// Writes every committed domain event to the structured log as JSON.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let payload = serde_json::to_string(envelope)?;
        tracing::info!(
            target: "governance.events",
            event_id = %envelope.event_id,
            org_id = %envelope.org_id,
            event = envelope.event.name(),
            payload = %payload,
            "domain event"
        );
        Ok(())
    }
}
