// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] moves products from the staging store to the consolidated
//! store one record at a time:
//!
//! ```text
//! fetch batch ──► validate ──► resolve created/modified ──► upsert ──► delete from staging
//!      ▲                                                                      │
//!      └──────────────── batch was full and made progress ◄───────────────────┘
//! ```
//!
//! A record is only deleted from staging after its destination write returned.
//! Per-record failures are audited and isolated; only a failed batch fetch ends a
//! cycle early.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use product_sync::{SyncEngine, InMemoryOrigin, InMemoryDestination, MemoryAuditSink};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let origin = Arc::new(InMemoryOrigin::new());
//! let destination = Arc::new(InMemoryDestination::new());
//! let audit = Arc::new(MemoryAuditSink::new());
//!
//! let engine = SyncEngine::new(origin, destination, audit).with_batch_size(100);
//! let report = engine.run_cycle().await.expect("staging reachable");
//! assert_eq!(report.fetches, 1);
//! assert_eq!(report.synced, 0);
//! # }
//! ```

mod cycle;
mod types;
mod upsert;

pub use types::{CycleReport, Provenance, RecordOutcome, SyncKind};

use std::sync::Arc;

use crate::audit::{AuditContext, AuditSink};
use crate::config::{LookupFailurePolicy, SyncConfig};
use crate::storage::traits::{DestinationStore, OriginStore};

/// Batch driver plus the per-record upsert and staging delete.
///
/// The engine itself does not guard against overlapping cycles; callers that
/// fire it on a timer go through [`crate::SyncTrigger`], which does.
pub struct SyncEngine {
    pub(super) origin: Arc<dyn OriginStore>,
    pub(super) destination: Arc<dyn DestinationStore>,
    pub(super) audit: Arc<dyn AuditSink>,
    pub(super) audit_ctx: AuditContext,
    pub(super) batch_size: usize,
    pub(super) lookup_failure: LookupFailurePolicy,
}

impl SyncEngine {
    /// Create an engine with default batch size, audit labels and lookup policy.
    pub fn new(
        origin: Arc<dyn OriginStore>,
        destination: Arc<dyn DestinationStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let defaults = SyncConfig::default();
        Self {
            origin,
            destination,
            audit,
            audit_ctx: AuditContext::new(defaults.sync_type, defaults.subject),
            batch_size: defaults.batch_size,
            lookup_failure: defaults.lookup_failure,
        }
    }

    /// Create an engine using the tunables from `config`.
    pub fn from_config(
        config: &SyncConfig,
        origin: Arc<dyn OriginStore>,
        destination: Arc<dyn DestinationStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self::new(origin, destination, audit)
            .with_batch_size(config.batch_size)
            .with_lookup_failure(config.lookup_failure)
            .with_audit_context(AuditContext::new(config.sync_type.clone(), config.subject.clone()))
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_lookup_failure(mut self, policy: LookupFailurePolicy) -> Self {
        self.lookup_failure = policy;
        self
    }

    #[must_use]
    pub fn with_audit_context(mut self, ctx: AuditContext) -> Self {
        self.audit_ctx = ctx;
        self
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn lookup_failure(&self) -> LookupFailurePolicy {
        self.lookup_failure
    }

    #[must_use]
    pub fn audit_context(&self) -> &AuditContext {
        &self.audit_ctx
    }

    /// The sink this engine reports to.
    #[must_use]
    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::storage::memory::{InMemoryDestination, InMemoryOrigin};

    fn engine() -> SyncEngine {
        SyncEngine::new(
            Arc::new(InMemoryOrigin::new()),
            Arc::new(InMemoryDestination::new()),
            Arc::new(MemoryAuditSink::new()),
        )
    }

    #[test]
    fn test_defaults() {
        let engine = engine();
        assert_eq!(engine.batch_size(), 500);
        assert_eq!(engine.lookup_failure(), LookupFailurePolicy::FailRecord);
        assert_eq!(engine.audit_context(), &AuditContext::new("Sync", "products"));
    }

    #[test]
    fn test_zero_batch_size_clamped() {
        assert_eq!(engine().with_batch_size(0).batch_size(), 1);
    }

    #[test]
    fn test_from_config() {
        let config = SyncConfig {
            batch_size: 25,
            subject: "items".into(),
            lookup_failure: LookupFailurePolicy::AssumeAbsent,
            ..Default::default()
        };
        let engine = SyncEngine::from_config(
            &config,
            Arc::new(InMemoryOrigin::new()),
            Arc::new(InMemoryDestination::new()),
            Arc::new(MemoryAuditSink::new()),
        );
        assert_eq!(engine.batch_size(), 25);
        assert_eq!(engine.audit_context().subject, "items");
        assert_eq!(engine.lookup_failure(), LookupFailurePolicy::AssumeAbsent);
    }
}
