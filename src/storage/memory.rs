// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{DestinationStore, OriginStore, StorageError};
use crate::product::{DestinationRow, Product};

/// Staging store kept in insertion order, which stands in for a table's natural order.
pub struct InMemoryOrigin {
    rows: Mutex<Vec<Product>>,
}

impl InMemoryOrigin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            rows: Mutex::new(products.into_iter().collect()),
        }
    }

    /// Append a product, as an upstream producer would.
    pub fn insert(&self, product: Product) {
        self.rows.lock().push(product);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        let key = reference.trim();
        self.rows.lock().iter().any(|p| p.key() == key)
    }
}

impl Default for InMemoryOrigin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OriginStore for InMemoryOrigin {
    async fn fetch_batch(&self, limit: usize) -> Result<Vec<Product>, StorageError> {
        Ok(self.rows.lock().iter().take(limit).cloned().collect())
    }

    async fn delete_by_reference(&self, reference: &str) -> Result<u64, StorageError> {
        let key = reference.trim();
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|p| p.key() != key);
        Ok((before - rows.len()) as u64)
    }
}

/// Consolidated store keyed by reference.
pub struct InMemoryDestination {
    rows: DashMap<String, DestinationRow>,
}

impl InMemoryDestination {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, reference: &str) -> Option<DestinationRow> {
        self.rows.get(reference).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Default for InMemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationStore for InMemoryDestination {
    async fn existing_created(&self, reference: &str) -> Result<Option<NaiveDateTime>, StorageError> {
        Ok(self.rows.get(reference).map(|r| r.created))
    }

    async fn upsert(&self, row: &DestinationRow) -> Result<(), StorageError> {
        self.rows
            .entry(row.reference.clone())
            .and_modify(|existing| {
                // Same column set as the SQL conflict clause: created is never reassigned.
                let created = existing.created;
                *existing = row.clone();
                existing.created = created;
            })
            .or_insert_with(|| row.clone());
        Ok(())
    }
}
