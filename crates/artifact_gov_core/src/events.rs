//! Domain events and their delivery.
//!
//! Components emit events through an [`EventSink`] only after the commit they
//! describe has succeeded. [`EventQueue`] is the production sink: a
//! non-blocking channel drained by an [`EventDispatcher`] that hands each
//! event, in enqueue order, to every registered handler. A failing handler is
//! retried with exponential backoff and dead-lettered (logged) once its
//! attempts run out; other handlers are unaffected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{EntityType, Role, VersionStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ChangeSetSubmitted {
        required_roles: Vec<Role>,
    },
    ChangeSetApproved,
    ChangeSetRejected {
        role: Role,
        notes: String,
    },
    ChangeSetReturnedToDraft {
        reason: Option<String>,
    },
    ChangeSetPublished {
        published_count: usize,
        published_by: String,
    },
    VersionStatusChanged {
        version_id: Uuid,
        entity_type: EntityType,
        entity_id: String,
        from: VersionStatus,
        to: VersionStatus,
    },
    ArtifactCascadeDeleted {
        entity_type: EntityType,
        entity_id: String,
        deleted_count: usize,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChangeSetSubmitted { .. } => "change_set_submitted",
            Self::ChangeSetApproved => "change_set_approved",
            Self::ChangeSetRejected { .. } => "change_set_rejected",
            Self::ChangeSetReturnedToDraft { .. } => "change_set_returned_to_draft",
            Self::ChangeSetPublished { .. } => "change_set_published",
            Self::VersionStatusChanged { .. } => "version_status_changed",
            Self::ArtifactCascadeDeleted { .. } => "artifact_cascade_deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub org_id: String,
    pub change_set_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn new(org_id: &str, change_set_id: Option<Uuid>, event: DomainEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            org_id: org_id.to_string(),
            change_set_id,
            occurred_at: Utc::now(),
            event,
        }
    }
}

// ── Sinks ─────────────────────────────────────────────────────

/// Fire-and-forget destination for committed events. Never blocks, never fails.
pub trait EventSink: Send + Sync {
    fn publish(&self, envelope: EventEnvelope);
}

pub type SharedEventSink = Arc<dyn EventSink>;

pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _envelope: EventEnvelope) {}
}

/// Keeps every event in memory; used by tests to assert emission order.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event.name()).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, envelope: EventEnvelope) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope);
    }
}

#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Sending half of the event channel.
pub struct EventQueue {
    sender: mpsc::UnboundedSender<EventEnvelope>,
    stats: Arc<QueueStats>,
}

impl EventQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                stats: Arc::new(QueueStats::default()),
            },
            receiver,
        )
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }
}

impl EventSink for EventQueue {
    fn publish(&self, envelope: EventEnvelope) {
        if self.sender.send(envelope).is_ok() {
            self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            // Dispatcher gone; events are best-effort from here on.
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ── Dispatch ──────────────────────────────────────────────────

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dead_lettered: usize,
}

pub struct EventDispatcher {
    receiver: mpsc::UnboundedReceiver<EventEnvelope>,
    handlers: Vec<Arc<dyn EventHandler>>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl EventDispatcher {
    /// Defaults: 5 attempts per handler, 100 ms initial backoff.
    pub fn new(receiver: mpsc::UnboundedReceiver<EventEnvelope>) -> Self {
        Self {
            receiver,
            handlers: Vec::new(),
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_backoff = base_backoff;
        self
    }

    pub fn register(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Deliver until every sender is dropped.
    pub async fn run(mut self) {
        tracing::info!(
            target: "governance.events",
            handlers = self.handlers.len(),
            "event dispatcher started"
        );
        while let Some(envelope) = self.receiver.recv().await {
            self.dispatch(&envelope).await;
        }
        tracing::info!(target: "governance.events", "event dispatcher stopped");
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Hand one event to every handler, in registration order.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> DeliveryReport {
        let mut report = DeliveryReport {
            delivered: 0,
            dead_lettered: 0,
        };
        for handler in &self.handlers {
            if self.deliver(handler.as_ref(), envelope).await {
                report.delivered += 1;
            } else {
                report.dead_lettered += 1;
            }
        }
        report
    }

    async fn deliver(&self, handler: &dyn EventHandler, envelope: &EventEnvelope) -> bool {
        let mut backoff = self.base_backoff;
        for attempt in 1..=self.max_attempts {
            match handler.handle(envelope).await {
                Ok(()) => return true,
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(
                        target: "governance.events",
                        handler = handler.name(),
                        event = envelope.event.name(),
                        attempt,
                        error = %e,
                        "event handler failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    tracing::error!(
                        target: "governance.events",
                        handler = handler.name(),
                        event_id = %envelope.event_id,
                        event = envelope.event.name(),
                        attempts = self.max_attempts,
                        error = %e,
                        "event dead-lettered"
                    );
                }
            }
        }
        false
    }
}
