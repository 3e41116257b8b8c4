//! Event types for the CQI event system
//!
//! Scheduler and engine components broadcast lifecycle events on a shared
//! `EventBus`. Subscribers (report notifiers, log shippers, an HTTP layer)
//! receive every event emitted after they subscribe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// CQI event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CqiEvent {
    /// A scheduled or triggered job began executing
    JobStarted {
        job_name: String,
        job_type: String,
        timestamp: DateTime<Utc>,
    },

    /// A job finished (successfully or not)
    JobCompleted {
        job_name: String,
        /// "success" or "error"
        status: String,
        error: Option<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A batch run over all indicators for one site finished
    BatchCompleted {
        site_id: String,
        success_count: usize,
        error_count: usize,
        skipped_count: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Validation report notification (sent when a validation job asks for it)
    ValidationReport {
        site_id: String,
        period_start: String,
        period_end: String,
        overall_status: String,
        quality_score: f64,
        grade: String,
        failed_rules: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl CqiEvent {
    /// Event type name as serialized in the `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            CqiEvent::JobStarted { .. } => "JobStarted",
            CqiEvent::JobCompleted { .. } => "JobCompleted",
            CqiEvent::BatchCompleted { .. } => "BatchCompleted",
            CqiEvent::ValidationReport { .. } => "ValidationReport",
        }
    }
}

/// Broadcast bus for `CqiEvent`s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CqiEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CqiEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CqiEvent) -> Result<usize, broadcast::error::SendError<CqiEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CqiEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
