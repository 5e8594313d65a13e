// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend for both the staging and the consolidated product stores.
//!
//! The same `products` table shape lives in both databases:
//! ```sql
//! CREATE TABLE products (
//!   reference CHAR(20) PRIMARY KEY,   -- fixed width in staging, may be space padded
//!   name VARCHAR(50),
//!   packing VARCHAR(3),
//!   vat DECIMAL(4,2),
//!   created DATETIME,
//!   modified DATETIME NULL,
//!   convertion_rate DECIMAL(16,8),
//!   vat_group VARCHAR(10),
//!   packing_to VARCHAR(3),
//!   is_active TINYINT
//! )
//! ```
//!
//! One [`SqlStore`] is opened per database; it implements [`OriginStore`] and
//! [`DestinationStore`] and the caller decides which role each instance plays.
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver only maps integers, floats, text and bytes, so reads cast
//! DECIMAL to a float and DATETIME to text, and timestamps are bound as text.
//! MySQL text columns may come back as bytes, see [`text_column`].

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, warn};

use super::traits::{DestinationStore, OriginStore, StorageError};
use crate::product::{DestinationRow, Product, Timestamp, TIMESTAMP_FORMAT};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// SQL flavour behind a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("sqlite:") {
            Self::Sqlite
        } else {
            Self::MySql
        }
    }
}

/// Pool sizing for one store.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlStore {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn connect(connection_string: &str, settings: &PoolSettings) -> Result<Self, StorageError> {
        install_drivers();

        let dialect = Dialect::from_url(connection_string);

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(settings.max_connections)
                .acquire_timeout(settings.acquire_timeout)
                .idle_timeout(settings.idle_timeout)
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;

        Ok(Self { pool, dialect })
    }

    /// Get a clone of the connection pool for sharing (e.g. with the audit table writer).
    #[must_use]
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// Create the `products` table for the staging role if it is missing.
    ///
    /// Staging columns are nullable: invalid rows have to be readable so they can be reported.
    pub async fn ensure_origin_schema(&self) -> Result<(), StorageError> {
        let sql = match self.dialect {
            Dialect::Sqlite => {
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    reference TEXT PRIMARY KEY,
                    name TEXT,
                    packing TEXT,
                    vat REAL,
                    created TEXT,
                    modified TEXT,
                    convertion_rate REAL,
                    vat_group TEXT,
                    packing_to TEXT,
                    is_active INTEGER
                )
                "#
            }
            Dialect::MySql => {
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    reference CHAR(20) NOT NULL PRIMARY KEY,
                    name VARCHAR(255),
                    packing VARCHAR(16),
                    vat DECIMAL(10,2),
                    created DATETIME NULL,
                    modified DATETIME NULL,
                    convertion_rate DECIMAL(20,8),
                    vat_group VARCHAR(32),
                    packing_to VARCHAR(16),
                    is_active TINYINT
                )
                "#
            }
        };
        self.bootstrap("sql_origin_schema", sql).await
    }

    /// Create the `products` table for the consolidated role if it is missing.
    pub async fn ensure_destination_schema(&self) -> Result<(), StorageError> {
        let sql = match self.dialect {
            Dialect::Sqlite => {
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    reference TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    packing TEXT NOT NULL,
                    vat REAL NOT NULL,
                    created TEXT NOT NULL,
                    modified TEXT,
                    convertion_rate REAL NOT NULL,
                    vat_group TEXT NOT NULL,
                    packing_to TEXT NOT NULL,
                    is_active INTEGER NOT NULL
                )
                "#
            }
            Dialect::MySql => {
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    reference VARCHAR(20) NOT NULL PRIMARY KEY,
                    name VARCHAR(50) NOT NULL,
                    packing VARCHAR(3) NOT NULL,
                    vat DECIMAL(4,2) NOT NULL,
                    created DATETIME NOT NULL,
                    modified DATETIME NULL,
                    convertion_rate DECIMAL(16,8) NOT NULL,
                    vat_group VARCHAR(10) NOT NULL,
                    packing_to VARCHAR(3) NOT NULL,
                    is_active TINYINT NOT NULL
                )
                "#
            }
        };
        self.bootstrap("sql_destination_schema", sql).await
    }

    /// Create the `sync_logs` audit table if it is missing.
    pub async fn ensure_audit_schema(&self) -> Result<(), StorageError> {
        let sql = match self.dialect {
            Dialect::Sqlite => {
                r#"
                CREATE TABLE IF NOT EXISTS sync_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    sync_type TEXT,
                    record_id TEXT,
                    table_name TEXT,
                    data TEXT,
                    event_date TEXT NOT NULL,
                    result TEXT,
                    error_message TEXT
                )
                "#
            }
            Dialect::MySql => {
                r#"
                CREATE TABLE IF NOT EXISTS sync_logs (
                    id BIGINT AUTO_INCREMENT PRIMARY KEY,
                    sync_type VARCHAR(32),
                    record_id VARCHAR(64),
                    table_name VARCHAR(64),
                    data TEXT,
                    event_date DATETIME NOT NULL,
                    result VARCHAR(32),
                    error_message TEXT,
                    INDEX idx_record_id (record_id),
                    INDEX idx_event_date (event_date)
                )
                "#
            }
        };
        self.bootstrap("sql_audit_schema", sql).await
    }

    async fn bootstrap(&self, operation: &str, sql: &str) -> Result<(), StorageError> {
        retry(operation, &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)
        })
        .await?;
        Ok(())
    }

    fn select_batch_sql(&self) -> &'static str {
        match self.dialect {
            Dialect::Sqlite => {
                // Numeric columns are read raw: a CAST would turn stray text into 0
                "SELECT reference, name, packing, packing_to, vat, vat_group, convertion_rate, is_active, \
                 CAST(created AS TEXT) AS created, CAST(modified AS TEXT) AS modified \
                 FROM products LIMIT ?"
            }
            Dialect::MySql => {
                "SELECT reference, name, packing, packing_to, CAST(vat AS DOUBLE) AS vat, vat_group, \
                 CAST(convertion_rate AS DOUBLE) AS convertion_rate, CAST(is_active AS SIGNED) AS is_active, \
                 DATE_FORMAT(created, '%Y-%m-%d %H:%i:%s.%f') AS created, \
                 DATE_FORMAT(modified, '%Y-%m-%d %H:%i:%s.%f') AS modified \
                 FROM products LIMIT ?"
            }
        }
    }

    fn upsert_sql(&self) -> &'static str {
        match self.dialect {
            Dialect::Sqlite => {
                "INSERT INTO products (reference, name, packing, vat, created, modified, convertion_rate, vat_group, packing_to, is_active)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(reference) DO UPDATE SET
                    name = excluded.name,
                    packing = excluded.packing,
                    vat = excluded.vat,
                    modified = excluded.modified,
                    convertion_rate = excluded.convertion_rate,
                    vat_group = excluded.vat_group,
                    packing_to = excluded.packing_to,
                    is_active = excluded.is_active"
            }
            Dialect::MySql => {
                "INSERT INTO products (reference, name, packing, vat, created, modified, convertion_rate, vat_group, packing_to, is_active)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON DUPLICATE KEY UPDATE
                    name = VALUES(name),
                    packing = VALUES(packing),
                    vat = VALUES(vat),
                    modified = VALUES(modified),
                    convertion_rate = VALUES(convertion_rate),
                    vat_group = VALUES(vat_group),
                    packing_to = VALUES(packing_to),
                    is_active = VALUES(is_active)"
            }
        }
    }

    fn existing_created_sql(&self) -> &'static str {
        match self.dialect {
            Dialect::Sqlite => "SELECT CAST(created AS TEXT) AS created FROM products WHERE reference = ? LIMIT 1",
            Dialect::MySql => {
                "SELECT DATE_FORMAT(created, '%Y-%m-%d %H:%i:%s.%f') AS created FROM products WHERE reference = ? LIMIT 1"
            }
        }
    }

    fn decode_product(row: &AnyRow) -> Option<Product> {
        let Some(reference) = text_column(row, "reference") else {
            warn!("Skipping staging row with NULL reference");
            return None;
        };

        Some(Product {
            name: text_column(row, "name").unwrap_or_default(),
            packing: text_column(row, "packing").unwrap_or_default(),
            packing_to: text_column(row, "packing_to").unwrap_or_default(),
            vat: number_column(row, "vat"),
            vat_group: text_column(row, "vat_group").unwrap_or_default(),
            convertion_rate: number_column(row, "convertion_rate"),
            is_active: flag_column(row, "is_active"),
            created: text_column(row, "created").map(Timestamp::from),
            modified: text_column(row, "modified").map(Timestamp::from),
            reference,
        })
    }
}

/// Read a text column, as String first (SQLite TEXT) then as bytes (MySQL text via Any).
fn text_column(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

/// Read a numeric column whatever storage class it came back in.
///
/// NULL and unparsable text decode as NaN so they fail the finite-number rule.
fn number_column(row: &AnyRow, column: &str) -> f64 {
    if let Ok(value) = row.try_get::<f64, _>(column) {
        return value;
    }
    if let Ok(value) = row.try_get::<i64, _>(column) {
        return value as f64;
    }
    text_column(row, column)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Read the `is_active` flag. Anything that is not a whole number decodes as -1
/// so it fails the 0/1 rule instead of being rounded into range.
fn flag_column(row: &AnyRow, column: &str) -> i64 {
    if let Ok(value) = row.try_get::<i64, _>(column) {
        return value;
    }
    let number = number_column(row, column);
    if number.is_finite() && number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        number as i64
    } else {
        -1
    }
}

fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[async_trait]
impl OriginStore for SqlStore {
    async fn fetch_batch(&self, limit: usize) -> Result<Vec<Product>, StorageError> {
        let rows = sqlx::query(self.select_batch_sql())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        let products: Vec<Product> = rows.iter().filter_map(Self::decode_product).collect();
        debug!(fetched = products.len(), limit, "Fetched staging batch");
        Ok(products)
    }

    async fn delete_by_reference(&self, reference: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM products WHERE TRIM(reference) = ?")
            .bind(reference.trim())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DestinationStore for SqlStore {
    async fn existing_created(&self, reference: &str) -> Result<Option<NaiveDateTime>, StorageError> {
        let row = sqlx::query(self.existing_created_sql())
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        match text_column(&row, "created").map(Timestamp::from) {
            Some(Timestamp::Valid(at)) => Ok(Some(at)),
            Some(Timestamp::Invalid(raw)) => Err(StorageError::Decode {
                reference: reference.to_string(),
                column: "created".into(),
                message: format!("not a valid date: {raw:?}"),
            }),
            None => Err(StorageError::Decode {
                reference: reference.to_string(),
                column: "created".into(),
                message: "unexpected NULL".into(),
            }),
        }
    }

    async fn upsert(&self, row: &DestinationRow) -> Result<(), StorageError> {
        sqlx::query(self.upsert_sql())
            .bind(&row.reference)
            .bind(&row.name)
            .bind(&row.packing)
            .bind(row.vat)
            .bind(format_timestamp(row.created))
            .bind(row.modified.map(format_timestamp))
            .bind(row.convertion_rate)
            .bind(&row.vat_group)
            .bind(&row.packing_to)
            .bind(row.is_active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
