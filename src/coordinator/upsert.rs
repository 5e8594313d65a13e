// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-record operations: conflict-aware upsert and the staging delete.

use chrono::NaiveDateTime;
use tracing::{debug, error, warn};

use super::types::Provenance;
use super::SyncEngine;
use crate::config::LookupFailurePolicy;
use crate::error::SyncError;
use crate::metrics::LatencyTimer;
use crate::product::{DestinationRow, Product, Timestamp};
use crate::storage::traits::StorageError;
use crate::validation::{validate, Validation};

impl SyncEngine {
    /// Validate `product` and write it to the destination.
    ///
    /// Emits exactly one audit error event on failure. Nothing is written
    /// when validation fails.
    #[tracing::instrument(skip(self, product), fields(reference = %product.key()))]
    pub async fn upsert(&self, product: &Product) -> Result<Provenance, SyncError> {
        let validation = validate(product);
        let created = match product.created.as_ref().and_then(Timestamp::instant) {
            Some(created) if validation.is_valid() => created,
            _ => return Err(self.reject(product, validation).await),
        };
        let modified = product.modified.as_ref().and_then(Timestamp::instant);
        let reference = product.key();

        let existing = match self.lookup_existing_created(reference).await {
            Ok(existing) => existing,
            Err(e) => match self.lookup_failure {
                LookupFailurePolicy::AssumeAbsent => {
                    warn!(error = %e, "Existing-row lookup failed, treating record as new");
                    None
                }
                LookupFailurePolicy::FailRecord => {
                    return Err(self.store_failure(product, e).await);
                }
            },
        };

        let provenance = Provenance::resolve(existing, created, modified);
        let row = DestinationRow::new(product, provenance.created, provenance.modified);

        let write = {
            let _timer = LatencyTimer::new("destination", "upsert");
            self.destination.upsert(&row).await
        };
        if let Err(e) = write {
            return Err(self.store_failure(product, e).await);
        }

        debug!(kind = %provenance.kind, "Product upserted");
        Ok(provenance)
    }

    /// Remove `reference` from staging. Only call after a successful [`Self::upsert`].
    ///
    /// Failures are returned, not audited; the batch driver reports them.
    pub async fn delete_from_origin(&self, reference: &str) -> Result<(), SyncError> {
        let _timer = LatencyTimer::new("origin", "delete");
        match self.origin.delete_by_reference(reference).await {
            Ok(0) => {
                // Another worker or an operator got there first
                warn!(reference, "No staging row matched on delete");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(source) => Err(SyncError::Store {
                reference: reference.trim().to_string(),
                source,
            }),
        }
    }

    async fn lookup_existing_created(&self, reference: &str) -> Result<Option<NaiveDateTime>, StorageError> {
        let _timer = LatencyTimer::new("destination", "lookup");
        self.destination.existing_created(reference).await
    }

    async fn reject(&self, product: &Product, validation: Validation) -> SyncError {
        let message = validation.to_string();
        warn!(violations = %message, "Product failed validation, leaving it in staging");
        self.audit
            .record(&self.audit_ctx.record_error(product.key(), message, row_snapshot(product)))
            .await;
        SyncError::Validation {
            reference: product.key().to_string(),
            violations: validation,
        }
    }

    async fn store_failure(&self, product: &Product, source: StorageError) -> SyncError {
        error!(error = %source, "Destination store failure");
        self.audit
            .record(&self.audit_ctx.record_error(product.key(), source.to_string(), row_snapshot(product)))
            .await;
        SyncError::Store {
            reference: product.key().to_string(),
            source,
        }
    }
}

pub(super) fn row_snapshot(product: &Product) -> Option<serde_json::Value> {
    serde_json::to_value(product).ok()
}
