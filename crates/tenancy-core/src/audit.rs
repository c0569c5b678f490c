// crates/tenancy-core/src/audit.rs
// ============================================================================
// Module: Tenancy Audit Logging
// Description: Structured audit events for tenancy operations.
// Purpose: Emit JSON-line records without binding to a logging framework.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every security-relevant tenancy operation (resolution, binding, reset,
//! provisioning, propagation, registry mutation) emits one
//! [`TenancyAuditEvent`] through a [`TenancyAuditSink`]. Sinks are chosen by
//! deployments; the engine never writes to stdout itself.
//!
//! Events carry identifiers and outcome labels only. Row data and SQL text
//! are never logged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;

use crate::core::Timestamp;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome label attached to audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Operation completed and changed state.
    Ok,
    /// Operation completed without changing state.
    Noop,
    /// Operation was skipped and should be retried later.
    Deferred,
    /// Operation was rejected by validation or policy.
    Rejected,
    /// Operation failed.
    Error,
}

/// Tenancy audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct TenancyAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Tenant identifier when known.
    pub tenant_id: Option<String>,
    /// Namespace name when known.
    pub namespace: Option<String>,
    /// Operation outcome.
    pub outcome: AuditOutcome,
    /// Short detail label or error message.
    pub detail: Option<String>,
}

impl TenancyAuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(event: &'static str, outcome: AuditOutcome) -> Self {
        Self {
            event,
            timestamp_ms: Timestamp::now().as_unix_millis(),
            tenant_id: None,
            namespace: None,
            outcome,
            detail: None,
        }
    }

    /// Attaches a tenant identifier.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl ToString) -> Self {
        self.tenant_id = Some(tenant_id.to_string());
        self
    }

    /// Attaches a namespace name.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl ToString) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Attaches a detail label.
    #[must_use]
    pub fn with_detail(mut self, detail: impl ToString) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for tenancy events.
pub trait TenancyAuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &TenancyAuditEvent);
}

/// Shared handle to an audit sink.
pub type SharedAuditSink = Arc<dyn TenancyAuditSink>;

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl TenancyAuditSink for StderrAuditSink {
    fn record(&self, event: &TenancyAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl TenancyAuditSink for FileAuditSink {
    fn record(&self, event: &TenancyAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl TenancyAuditSink for NoopAuditSink {
    fn record(&self, _event: &TenancyAuditEvent) {}
}

/// Audit sink that keeps events in memory, for tests and embedding hosts
/// that forward events themselves.
#[derive(Default)]
pub struct InMemoryAuditSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<TenancyAuditEvent>>,
}

impl InMemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<TenancyAuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns recorded events with the given identifier.
    #[must_use]
    pub fn events_named(&self, event: &str) -> Vec<TenancyAuditEvent> {
        self.events().into_iter().filter(|recorded| recorded.event == event).collect()
    }
}

impl TenancyAuditSink for InMemoryAuditSink {
    fn record(&self, event: &TenancyAuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use super::*;

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = FileAuditSink::new(&path).unwrap();
        sink.record(
            &TenancyAuditEvent::new("tenant.resolve", AuditOutcome::Ok)
                .with_namespace("tenant_abc")
                .with_detail("resolved"),
        );
        sink.record(&TenancyAuditEvent::new("namespace.reset", AuditOutcome::Error));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "tenant.resolve");
        assert_eq!(first["outcome"], "ok");
        assert_eq!(first["namespace"], "tenant_abc");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["outcome"], "error");
        assert!(second["tenant_id"].is_null());
    }

    #[test]
    fn memory_sink_filters_by_event() {
        let sink = InMemoryAuditSink::new();
        sink.record(&TenancyAuditEvent::new("a", AuditOutcome::Ok));
        sink.record(&TenancyAuditEvent::new("b", AuditOutcome::Noop));
        sink.record(&TenancyAuditEvent::new("a", AuditOutcome::Error));
        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.events_named("a").len(), 2);
    }
}
