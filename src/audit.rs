//! Audit Events
//!
//! The core appends operation events to an external log store and never
//! reads them back. [`AuditSink`] is the write-only seam; the in-memory
//! sink backs the binary and lets tests assert on what was recorded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Outcome of the audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One appended audit record
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub operation: String,
    pub detail: String,
    pub host_id: Option<i64>,
    pub account_id: Option<i64>,
    pub outcome: AuditOutcome,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        operation: impl Into<String>,
        detail: impl Into<String>,
        host_id: Option<i64>,
        account_id: Option<i64>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            operation: operation.into(),
            detail: detail.into(),
            host_id,
            account_id,
            outcome,
            at: Utc::now(),
        }
    }
}

/// Append-only audit log seam
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// In-memory audit log
#[derive(Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) {
        self.events.write().await.push(event);
    }
}
