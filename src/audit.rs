// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Audit trail of sync outcomes.
//!
//! The engine reports `Start`/`End` around each triggered cycle and one `Error`
//! per failed record. Sinks are write-only and infallible from the caller's point
//! of view: a sink that cannot persist an event logs the failure and moves on.
//!
//! Deployments have labelled the subject area either `table_name` or `process`.
//! [`AuditEvent::subject`] serializes as `table_name` and accepts `process` as an alias.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::AnyPool;
use tracing::{error, info, warn};

use crate::product::TIMESTAMP_FORMAT;
use crate::storage::sql::SqlStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Error,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditResult {
    Start,
    End,
    Error,
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Error => write!(f, "Error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub level: AuditLevel,
    #[serde(default)]
    pub sync_type: Option<String>,
    /// Product reference; absent for cycle-level events.
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default, rename = "table_name", alias = "process")]
    pub subject: Option<String>,
    #[serde(default)]
    pub result: Option<AuditResult>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Snapshot of the offending staging row, for console diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_data: Option<serde_json::Value>,
}

impl AuditEvent {
    /// Value stored in the `result` column: the result, or the level when none was set.
    #[must_use]
    pub fn result_label(&self) -> String {
        match self.result {
            Some(result) => result.to_string(),
            None => self.level.to_string(),
        }
    }
}

/// Fixed labels stamped on every event one engine emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    pub sync_type: String,
    pub subject: String,
}

impl Default for AuditContext {
    fn default() -> Self {
        Self::new("Sync", "products")
    }
}

impl AuditContext {
    pub fn new(sync_type: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            sync_type: sync_type.into(),
            subject: subject.into(),
        }
    }

    fn event(&self, level: AuditLevel, result: AuditResult) -> AuditEvent {
        AuditEvent {
            level,
            sync_type: Some(self.sync_type.clone()),
            record_id: None,
            subject: Some(self.subject.clone()),
            result: Some(result),
            error_message: None,
            row_data: None,
        }
    }

    #[must_use]
    pub fn start(&self) -> AuditEvent {
        self.event(AuditLevel::Info, AuditResult::Start)
    }

    #[must_use]
    pub fn end(&self) -> AuditEvent {
        self.event(AuditLevel::Info, AuditResult::End)
    }

    /// A cycle-level failure, not tied to one record.
    #[must_use]
    pub fn cycle_error(&self, message: impl Into<String>) -> AuditEvent {
        AuditEvent {
            error_message: Some(message.into()),
            ..self.event(AuditLevel::Error, AuditResult::Error)
        }
    }

    #[must_use]
    pub fn record_error(
        &self,
        reference: &str,
        message: impl Into<String>,
        row_data: Option<serde_json::Value>,
    ) -> AuditEvent {
        AuditEvent {
            record_id: Some(reference.to_string()),
            error_message: Some(message.into()),
            row_data,
            ..self.event(AuditLevel::Error, AuditResult::Error)
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one event. Must not fail: sinks swallow their own I/O errors.
    async fn record(&self, event: &AuditEvent);
}

/// Writes events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) {
        let sync_type = event.sync_type.as_deref().unwrap_or_default();
        let subject = event.subject.as_deref().unwrap_or_default();
        let record_id = event.record_id.as_deref().unwrap_or_default();
        let result = event.result_label();

        match event.level {
            AuditLevel::Info => info!(sync_type, subject, record_id, result = %result, "audit"),
            AuditLevel::Error => {
                let row_data = event.row_data.as_ref().map(|v| v.to_string()).unwrap_or_default();
                error!(
                    sync_type,
                    subject,
                    record_id,
                    result = %result,
                    error_message = event.error_message.as_deref().unwrap_or_default(),
                    row_data = %row_data,
                    "audit"
                );
            }
        }
    }
}

/// Persists events to the `sync_logs` table of the consolidated store.
pub struct SqlAuditSink {
    pool: AnyPool,
}

impl SqlAuditSink {
    /// Share the pool of an already-open store.
    #[must_use]
    pub fn from_store(store: &SqlStore) -> Self {
        Self { pool: store.pool() }
    }

    async fn insert(&self, event: &AuditEvent) -> Result<(), sqlx::Error> {
        let event_date = Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string();

        // data stays NULL, row snapshots go to the console only
        sqlx::query(
            "INSERT INTO sync_logs (sync_type, record_id, table_name, data, event_date, result, error_message)
             VALUES (?, ?, ?, NULL, ?, ?, ?)",
        )
        .bind(event.sync_type.clone())
        .bind(event.record_id.clone())
        .bind(event.subject.clone())
        .bind(event_date)
        .bind(event.result_label())
        .bind(event.error_message.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for SqlAuditSink {
    async fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.insert(event).await {
            warn!(error = %e, record_id = ?event.record_id, "Failed to persist audit event");
            crate::metrics::record_audit_failure();
        }
    }
}

/// Sends each event to every inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn record(&self, event: &AuditEvent) {
        for sink in &self.sinks {
            sink.record(event).await;
        }
    }
}

/// Keeps events in memory. Useful for tests and embedding.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.level == AuditLevel::Error)
            .cloned()
            .collect()
    }

    /// Error events for one product reference.
    #[must_use]
    pub fn errors_for(&self, reference: &str) -> Vec<AuditEvent> {
        self.errors()
            .into_iter()
            .filter(|e| e.record_id.as_deref() == Some(reference))
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}
