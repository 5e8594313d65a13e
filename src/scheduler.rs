// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cron-driven trigger for the sync engine.
//!
//! Each tick runs one [`SyncEngine::run_cycle`], wrapped in `Start`/`End`
//! audit events. Ticks never overlap: a tick that arrives while the previous
//! cycle is still running is skipped and counted.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::coordinator::{CycleReport, SyncEngine};
use crate::error::SyncError;
use crate::metrics;

pub struct SyncTrigger {
    engine: Arc<SyncEngine>,
    schedule: Schedule,
    in_flight: AtomicBool,
    skipped: AtomicU64,
}

/// Clears the in-flight flag when the cycle future completes or is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        metrics::set_cycle_in_flight(false);
    }
}

impl SyncTrigger {
    pub fn new(engine: Arc<SyncEngine>, cron_expression: &str) -> Result<Self, SyncError> {
        let schedule = Schedule::from_str(cron_expression).map_err(|e| {
            SyncError::Config(format!("invalid cron expression '{cron_expression}': {e}"))
        })?;
        Ok(Self {
            engine,
            schedule,
            in_flight: AtomicBool::new(false),
            skipped: AtomicU64::new(0),
        })
    }

    pub fn from_config(engine: Arc<SyncEngine>, config: &SyncConfig) -> Result<Self, SyncError> {
        Self::new(engine, &config.cron_expression)
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Ticks dropped because a cycle was still running.
    #[must_use]
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// First scheduled tick strictly after `after`.
    #[must_use]
    pub fn next_tick(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Run one cycle now unless one is already running.
    ///
    /// Returns `None` when the tick was skipped.
    pub async fn fire(&self) -> Option<Result<CycleReport, SyncError>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(skipped, "Previous sync cycle still in flight, skipping tick");
            metrics::record_skipped_tick();
            return None;
        }
        let _guard = InFlightGuard(&self.in_flight);
        metrics::set_cycle_in_flight(true);

        let audit = self.engine.audit_sink();
        let ctx = self.engine.audit_context();
        audit.record(&ctx.start()).await;

        let result = self.engine.run_cycle().await;
        match &result {
            Ok(_) => audit.record(&ctx.end()).await,
            Err(e) => audit.record(&ctx.cycle_error(e.to_string())).await,
        }
        Some(result)
    }

    /// Fire on every scheduled tick until `shutdown` flips to `true` or its
    /// sender is dropped. Every spawned tick is awaited before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Sync trigger started");
        let mut ticks = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = Utc::now();
            let Some(next) = self.next_tick(now) else {
                warn!("Cron schedule has no upcoming ticks, stopping trigger");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "Waiting for next tick");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let trigger = Arc::clone(&self);
                    ticks.spawn(async move {
                        trigger.fire().await;
                    });
                }
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Sync cycle task ended abnormally");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if !ticks.is_empty() {
            info!(pending = ticks.len(), "Waiting for in-flight sync cycle to finish");
        }
        while let Some(joined) = ticks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Sync cycle task ended abnormally");
            }
        }
        info!("Sync trigger stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditResult, MemoryAuditSink};
    use crate::product::{Product, Timestamp};
    use crate::storage::memory::{InMemoryDestination, InMemoryOrigin};
    use crate::storage::traits::{OriginStore, StorageError};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use tokio::sync::Semaphore;

    fn product(reference: &str) -> Product {
        let created = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        Product {
            reference: reference.to_string(),
            name: "Widget".into(),
            packing: "BOX".into(),
            packing_to: "UNI".into(),
            vat: 10.0,
            vat_group: "B".into(),
            convertion_rate: 6.0,
            is_active: 1,
            created: Some(Timestamp::Valid(created)),
            modified: None,
        }
    }

    fn engine(origin: Arc<dyn OriginStore>, audit: Arc<MemoryAuditSink>) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(origin, Arc::new(InMemoryDestination::new()), audit))
    }

    /// Origin whose fetch waits for a permit, so a cycle can be held open.
    struct GatedOrigin {
        inner: InMemoryOrigin,
        gate: Semaphore,
    }

    #[async_trait]
    impl OriginStore for GatedOrigin {
        async fn fetch_batch(&self, limit: usize) -> Result<Vec<Product>, StorageError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            permit.forget();
            self.inner.fetch_batch(limit).await
        }

        async fn delete_by_reference(&self, reference: &str) -> Result<u64, StorageError> {
            self.inner.delete_by_reference(reference).await
        }
    }

    struct DownOrigin;

    #[async_trait]
    impl OriginStore for DownOrigin {
        async fn fetch_batch(&self, _limit: usize) -> Result<Vec<Product>, StorageError> {
            Err(StorageError::Unavailable("connection refused".into()))
        }

        async fn delete_by_reference(&self, _reference: &str) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let audit = Arc::new(MemoryAuditSink::new());
        let result = SyncTrigger::new(engine(Arc::new(InMemoryOrigin::new()), audit), "not a cron");
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_next_tick_every_ten_seconds() {
        let audit = Arc::new(MemoryAuditSink::new());
        let trigger = SyncTrigger::new(engine(Arc::new(InMemoryOrigin::new()), audit), "*/10 * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 3).unwrap();
        assert_eq!(trigger.next_tick(now), Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap()));
    }

    #[tokio::test]
    async fn test_fire_wraps_cycle_in_start_and_end() {
        let audit = Arc::new(MemoryAuditSink::new());
        let origin = Arc::new(InMemoryOrigin::with_products(vec![product("PRD001")]));
        let trigger = SyncTrigger::new(engine(origin.clone(), audit.clone()), "*/10 * * * * *").unwrap();

        let report = trigger.fire().await.unwrap().unwrap();
        assert_eq!(report.synced, 1);
        assert!(origin.is_empty());
        assert!(!trigger.is_in_flight());

        let results: Vec<_> = audit.events().iter().map(|e| e.result).collect();
        assert_eq!(results, vec![Some(AuditResult::Start), Some(AuditResult::End)]);
    }

    #[tokio::test]
    async fn test_fetch_failure_audited_as_cycle_error() {
        let audit = Arc::new(MemoryAuditSink::new());
        let trigger = SyncTrigger::new(engine(Arc::new(DownOrigin), audit.clone()), "*/10 * * * * *").unwrap();

        let result = trigger.fire().await.unwrap();
        assert!(matches!(result, Err(SyncError::StoreUnavailable(_))));
        assert!(!trigger.is_in_flight());

        let events = audit.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].result, Some(AuditResult::Error));
        assert_eq!(events[1].record_id, None);
        assert!(events[1].error_message.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let audit = Arc::new(MemoryAuditSink::new());
        let origin = Arc::new(GatedOrigin {
            inner: InMemoryOrigin::with_products(vec![product("PRD001")]),
            gate: Semaphore::new(0),
        });
        let trigger = Arc::new(
            SyncTrigger::new(engine(origin.clone(), audit.clone()), "*/10 * * * * *").unwrap(),
        );

        let first = {
            let trigger = trigger.clone();
            tokio::spawn(async move { trigger.fire().await })
        };
        while !trigger.is_in_flight() {
            tokio::task::yield_now().await;
        }

        assert!(trigger.fire().await.is_none());
        assert_eq!(trigger.skipped_ticks(), 1);

        origin.gate.add_permits(1);
        let report = first.await.unwrap().unwrap().unwrap();
        assert_eq!(report.synced, 1);
        assert!(!trigger.is_in_flight());

        // Only the first tick produced audit events
        assert_eq!(audit.events().len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let audit = Arc::new(MemoryAuditSink::new());
        let origin = Arc::new(InMemoryOrigin::with_products(vec![product("PRD001")]));
        let trigger = Arc::new(SyncTrigger::new(engine(origin.clone(), audit), "* * * * * *").unwrap());

        let (tx, rx) = watch::channel(false);
        let runner = tokio::spawn(trigger.clone().run(rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !origin.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("a tick should drain staging");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("trigger should stop")
            .unwrap();
        assert!(!trigger.is_in_flight());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_cycle() {
        let audit = Arc::new(MemoryAuditSink::new());
        let origin = Arc::new(GatedOrigin {
            inner: InMemoryOrigin::with_products(vec![product("PRD001")]),
            gate: Semaphore::new(0),
        });
        let trigger = Arc::new(
            SyncTrigger::new(engine(origin.clone(), audit.clone()), "* * * * * *").unwrap(),
        );

        let (tx, rx) = watch::channel(false);
        let runner = tokio::spawn(trigger.clone().run(rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !trigger.is_in_flight() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("a tick should start a cycle");

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!runner.is_finished());

        origin.gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("trigger should stop once the cycle ends")
            .unwrap();

        assert!(origin.inner.is_empty());
        assert!(!trigger.is_in_flight());
        let results: Vec<_> = audit.events().iter().map(|e| e.result).collect();
        assert_eq!(results, vec![Some(AuditResult::Start), Some(AuditResult::End)]);
    }
}
