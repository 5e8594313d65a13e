// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use crate::storage::traits::StorageError;
use crate::validation::Validation;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The record broke field rules. It stays in staging for manual remediation.
    #[error("Validation failed for '{reference}': {violations}")]
    Validation {
        reference: String,
        violations: Validation,
    },

    /// A per-record store call failed. Isolated to that record.
    #[error("Store error for '{reference}': {source}")]
    Store {
        reference: String,
        #[source]
        source: StorageError,
    },

    /// The staging batch could not be read. Fatal to the current cycle.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
