//! Destinations for finalized audit records.

use std::sync::{Arc, Mutex};

use crate::AuditRecord;

/// Receives every finalized audit record.
///
/// Emission is infallible from the caller's point of view: a sink that
/// cannot deliver a record logs the fault instead of failing the execution.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &AuditRecord);
}

/// Writes records to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: &AuditRecord) {
        if record.success {
            tracing::info!(
                target: "audit",
                audit_id = %record.id,
                tenant_id = %record.tenant_id,
                user_id = record.user_id.as_deref().unwrap_or(""),
                request_id = %record.request_id,
                action = %record.action,
                resource = %record.resource,
                duration_ms = record.duration_ms,
                success = true,
                "Query executed"
            );
        } else {
            tracing::warn!(
                target: "audit",
                audit_id = %record.id,
                tenant_id = %record.tenant_id,
                user_id = record.user_id.as_deref().unwrap_or(""),
                request_id = %record.request_id,
                action = %record.action,
                resource = %record.resource,
                duration_ms = record.duration_ms,
                success = false,
                error = record.error.as_deref().unwrap_or(""),
                "Query failed"
            );
        }
    }
}

/// Keeps records in memory, for inspection by embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, record: &AuditRecord) {
        match self.records.lock() {
            Ok(mut guard) => guard.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}

/// Forwards each record to several sinks, in order.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn emit(&self, record: &AuditRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }
}
