//! Audit trail sink
//!
//! Fire-and-forget: `record` never fails and never blocks the caller.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditEvent {
    /// e.g. `disbursement.submitted`, `charge.completed`
    pub action: &'static str,
    pub entity_id: String,
    pub partner_id: Option<String>,
    pub detail: Value,
}

impl AuditEvent {
    pub fn new(action: &'static str, entity_id: impl Into<String>) -> Self {
        Self {
            action,
            entity_id: entity_id.into(),
            partner_id: None,
            detail: Value::Null,
        }
    }

    pub fn partner(mut self, partner_id: impl Into<String>) -> Self {
        self.partner_id = Some(partner_id.into());
        self
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit` tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            action = event.action,
            entity_id = %event.entity_id,
            partner_id = event.partner_id.as_deref().unwrap_or(""),
            detail = %event.detail,
            "audit"
        );
    }
}

/// Collects events in memory
#[cfg(test)]
#[derive(Default)]
pub struct RecordingAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

#[cfg(test)]
impl RecordingAuditSink {
    pub fn actions(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.action).collect()
    }
}

#[cfg(test)]
impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
