//! Batch driver: drains staging one bounded batch at a time.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::types::{CycleReport, RecordOutcome};
use super::upsert::row_snapshot;
use super::SyncEngine;
use crate::error::SyncError;
use crate::metrics;
use crate::product::Product;

impl SyncEngine {
    /// Run one drain cycle.
    ///
    /// Fetches up to `batch_size` rows, syncs them in fetch order, and fetches
    /// again while the previous batch came back full. Per-record failures are
    /// audited and counted in the report; only a failed fetch returns `Err`.
    #[tracing::instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let start = Instant::now();
        let mut report = CycleReport::default();

        let result = self.drain(&mut report).await;
        report.duration = start.elapsed();

        match &result {
            Ok(()) => {
                metrics::record_cycle("completed", report.duration);
                if report.fetched > 0 {
                    info!(
                        fetched = report.fetched,
                        synced = report.synced,
                        failed = report.failed(),
                        fetches = report.fetches,
                        duration_ms = report.duration.as_millis() as u64,
                        "Sync cycle completed"
                    );
                }
            }
            Err(e) => {
                metrics::record_cycle("aborted", report.duration);
                error!(error = %e, synced = report.synced, "Sync cycle aborted");
            }
        }

        result.map(|()| report)
    }

    async fn drain(&self, report: &mut CycleReport) -> Result<(), SyncError> {
        loop {
            let batch = {
                let _timer = metrics::LatencyTimer::new("origin", "fetch");
                self.origin
                    .fetch_batch(self.batch_size)
                    .await
                    .map_err(SyncError::StoreUnavailable)?
            };
            report.fetches += 1;
            metrics::record_batch(batch.len());

            if batch.is_empty() {
                return Ok(());
            }

            let fetched = batch.len();
            let mut removed = 0usize;
            for product in &batch {
                let outcome = self.sync_record(product).await;
                if outcome == RecordOutcome::Synced {
                    removed += 1;
                }
                metrics::record_outcome(outcome.as_str());
                report.count(outcome);
            }
            report.fetched += fetched;
            debug!(fetched, removed, "Batch processed");

            if fetched < self.batch_size {
                return Ok(());
            }
            if removed == 0 {
                // The next fetch would return the same rows
                warn!(fetched, "Full batch left staging unchanged, ending cycle");
                return Ok(());
            }
        }
    }

    /// Upsert then delete one record, isolating any failure to it.
    async fn sync_record(&self, product: &Product) -> RecordOutcome {
        match self.upsert(product).await {
            Ok(_) => {}
            Err(SyncError::Validation { .. }) => return RecordOutcome::Invalid,
            Err(_) => return RecordOutcome::UpsertFailed,
        }

        match self.delete_from_origin(product.key()).await {
            Ok(()) => RecordOutcome::Synced,
            Err(e) => {
                error!(reference = %product.key(), error = %e, "Delete from staging failed");
                self.audit
                    .record(&self.audit_ctx.record_error(product.key(), e.to_string(), row_snapshot(product)))
                    .await;
                RecordOutcome::DeleteFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::product::Timestamp;
    use crate::storage::memory::{InMemoryDestination, InMemoryOrigin};
    use crate::storage::traits::{OriginStore, StorageError};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn product(reference: &str) -> Product {
        let created = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
        Product {
            reference: reference.to_string(),
            name: format!("Product {reference}"),
            packing: "BOX".into(),
            packing_to: "UNI".into(),
            vat: 21.0,
            vat_group: "G1".into(),
            convertion_rate: 12.0,
            is_active: 1,
            created: Some(Timestamp::Valid(created)),
            modified: None,
        }
    }

    struct Harness {
        engine: SyncEngine,
        origin: Arc<InMemoryOrigin>,
        destination: Arc<InMemoryDestination>,
        audit: Arc<MemoryAuditSink>,
    }

    fn harness(products: Vec<Product>, batch_size: usize) -> Harness {
        let origin = Arc::new(InMemoryOrigin::with_products(products));
        let destination = Arc::new(InMemoryDestination::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let engine = SyncEngine::new(origin.clone(), destination.clone(), audit.clone())
            .with_batch_size(batch_size);
        Harness { engine, origin, destination, audit }
    }

    #[tokio::test]
    async fn test_empty_staging_is_one_fetch_and_silent() {
        let h = harness(vec![], 10);
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.fetches, 1);
        assert_eq!(report.fetched, 0);
        assert!(h.audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_batch_syncs_valid_and_keeps_invalid() {
        let mut bad = product("X1");
        bad.vat = 150.0;
        let h = harness(vec![product("PRD001"), product("PRD002"), bad, product("PRD003")], 500);

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.fetches, 1);
        assert_eq!(report.synced, 3);
        assert_eq!(report.invalid, 1);

        assert_eq!(h.destination.len(), 3);
        assert_eq!(h.origin.len(), 1);
        assert!(h.origin.contains("X1"));

        let errors = h.audit.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].record_id.as_deref(), Some("X1"));
        assert!(errors[0].error_message.as_deref().unwrap().contains("vat"));
    }

    #[tokio::test]
    async fn test_full_batch_fetches_again() {
        let products = (0..4).map(|i| product(&format!("PRD{i:03}"))).collect();
        let h = harness(products, 4);

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.fetches, 2);
        assert_eq!(report.synced, 4);
        assert!(h.origin.is_empty());
    }

    #[tokio::test]
    async fn test_backlog_drains_across_batches() {
        let products = (0..7).map(|i| product(&format!("PRD{i:03}"))).collect();
        let h = harness(products, 3);

        let report = h.engine.run_cycle().await.unwrap();
        // 3 + 3 + 1
        assert_eq!(report.fetches, 3);
        assert_eq!(report.fetched, 7);
        assert_eq!(h.destination.len(), 7);
        assert!(h.origin.is_empty());
    }

    #[tokio::test]
    async fn test_full_batch_of_invalid_rows_stops() {
        let products = (0..3)
            .map(|i| {
                let mut p = product(&format!("BAD{i}"));
                p.packing = "toolong".into();
                p
            })
            .collect();
        let h = harness(products, 3);

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.fetches, 1);
        assert_eq!(report.invalid, 3);
        assert_eq!(h.origin.len(), 3);
        assert_eq!(h.audit.errors().len(), 3);
    }

    /// Origin that accepts fetches but refuses deletes.
    struct StickyOrigin(InMemoryOrigin);

    #[async_trait]
    impl OriginStore for StickyOrigin {
        async fn fetch_batch(&self, limit: usize) -> Result<Vec<Product>, StorageError> {
            self.0.fetch_batch(limit).await
        }

        async fn delete_by_reference(&self, _reference: &str) -> Result<u64, StorageError> {
            Err(StorageError::Backend("lock wait timeout exceeded".into()))
        }
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_destination_write() {
        let origin = Arc::new(StickyOrigin(InMemoryOrigin::with_products(vec![product("PRD001")])));
        let destination = Arc::new(InMemoryDestination::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let engine = SyncEngine::new(origin.clone(), destination.clone(), audit.clone());

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.delete_failed, 1);
        assert!(destination.get("PRD001").is_some());
        assert!(origin.0.contains("PRD001"));

        let errors = audit.errors_for("PRD001");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error_message.as_deref().unwrap().contains("lock wait timeout"));
    }

    /// Origin whose fetch fails after `ok_fetches` successful calls.
    struct FlakyOrigin {
        inner: InMemoryOrigin,
        ok_fetches: Mutex<usize>,
    }

    #[async_trait]
    impl OriginStore for FlakyOrigin {
        async fn fetch_batch(&self, limit: usize) -> Result<Vec<Product>, StorageError> {
            {
                let mut remaining = self.ok_fetches.lock();
                if *remaining == 0 {
                    return Err(StorageError::Unavailable("connection refused".into()));
                }
                *remaining -= 1;
            }
            self.inner.fetch_batch(limit).await
        }

        async fn delete_by_reference(&self, reference: &str) -> Result<u64, StorageError> {
            self.inner.delete_by_reference(reference).await
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_cycle() {
        let products: Vec<_> = (0..4).map(|i| product(&format!("PRD{i:03}"))).collect();
        let origin = Arc::new(FlakyOrigin {
            inner: InMemoryOrigin::with_products(products),
            ok_fetches: Mutex::new(1),
        });
        let destination = Arc::new(InMemoryDestination::new());
        let engine = SyncEngine::new(origin.clone(), destination.clone(), Arc::new(MemoryAuditSink::new()))
            .with_batch_size(2);

        let err = engine.run_cycle().await.unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)));
        // First batch landed before the second fetch failed
        assert_eq!(destination.len(), 2);
        assert_eq!(origin.inner.len(), 2);
    }
}
