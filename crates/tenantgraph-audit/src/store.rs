//! Append-only JSON-lines audit file.
//!
//! One record per line. Every line read back is checked against its
//! content hash, so edits to the file are reported rather than trusted.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use tenantgraph_core::TenantId;

use crate::sink::AuditSink;
use crate::{AuditId, AuditRecord};

/// Errors that can occur during audit file operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Integrity check failed for audit record {0}: stored hash does not match content")]
    IntegrityViolation(AuditId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Filters for reading records back.
#[derive(Debug, Default)]
pub struct AuditQuery {
    pub tenant_id: Option<TenantId>,
    /// Only successful (`Some(true)`) or failed (`Some(false)`) executions.
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    /// Open (or create) the audit file, creating parent directories as needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, record)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Read every record in file order, verifying integrity.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, StoreError> {
        self.list(&AuditQuery::default())
    }

    /// Read records matching the query, in file order.
    pub fn list(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let file = fs::File::open(&self.path)?;
        let mut results = Vec::new();

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_str(&line)?;
            if !record.verify_integrity() {
                return Err(StoreError::IntegrityViolation(record.id));
            }
            if matches_query(&record, query) {
                results.push(record);
            }
        }

        Ok(results)
    }
}

impl AuditSink for JsonlAuditSink {
    fn emit(&self, record: &AuditRecord) {
        if let Err(e) = self.append(record) {
            tracing::error!(
                audit_id = %record.id,
                path = %self.path.display(),
                error = %e,
                "Failed to write audit record"
            );
        }
    }
}

fn matches_query(record: &AuditRecord, query: &AuditQuery) -> bool {
    if let Some(tid) = &query.tenant_id {
        if &record.tenant_id != tid {
            return false;
        }
    }
    if let Some(success) = query.success {
        if record.success != success {
            return false;
        }
    }
    if let Some(from) = &query.from {
        if &record.timestamp < from {
            return false;
        }
    }
    if let Some(to) = &query.to {
        if &record.timestamp > to {
            return false;
        }
    }
    true
}
