// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

use crate::product::{DestinationRow, Product};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store could not be reached (connect, pool exhaustion, I/O).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Failed to decode {column} for '{reference}': {message}")]
    Decode {
        reference: String,
        column: String,
        message: String,
    },
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::Unavailable(err.to_string()),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// The staging store: products land here from upstream producers.
#[async_trait]
pub trait OriginStore: Send + Sync {
    /// Fetch up to `limit` products in the store's natural order.
    /// An empty result means the store is drained.
    async fn fetch_batch(&self, limit: usize) -> Result<Vec<Product>, StorageError>;

    /// Delete the row whose trimmed key equals the trimmed `reference`.
    /// Returns the number of rows removed.
    async fn delete_by_reference(&self, reference: &str) -> Result<u64, StorageError>;
}

/// The consolidated store: at most one row per reference.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// `created` of the existing row for `reference`, if there is one.
    async fn existing_created(&self, reference: &str) -> Result<Option<NaiveDateTime>, StorageError>;

    /// Insert `row`, or on key conflict overwrite every column except
    /// `reference` and `created`.
    async fn upsert(&self, row: &DestinationRow) -> Result<(), StorageError>;
}
