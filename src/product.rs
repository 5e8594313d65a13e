// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Product records.
//!
//! A [`Product`] is the unit of transfer between the staging (origin) store and
//! the consolidated (destination) store. It is decoded leniently from origin rows:
//! anything a staging producer can write must survive decoding so the validator
//! can report it, rather than failing the whole batch fetch.
//!
//! # Example
//!
//! ```
//! use product_sync::{Product, Timestamp};
//!
//! let created: Timestamp = "2024-01-15 10:30:00".parse().unwrap();
//! assert!(created.is_valid());
//!
//! let zero: Timestamp = "0000-00-00 00:00:00".parse().unwrap();
//! assert!(!zero.is_valid());
//! ```

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Wire format used when binding timestamps to either SQL dialect.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A timestamp as read from a store.
///
/// Staging stores hold zero dates and free text; those are kept verbatim as
/// [`Timestamp::Invalid`] so validation can quote them back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Timestamp {
    Valid(NaiveDateTime),
    Invalid(String),
}

impl Timestamp {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The instant, if this is a valid one.
    #[must_use]
    pub fn instant(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Valid(at) => Some(*at),
            Self::Invalid(_) => None,
        }
    }

    /// Parse from any of the textual forms MySQL, SQLite or RFC 3339 producers emit.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let parsed = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(trimmed).ok().map(|at| at.naive_utc()));

        match parsed {
            Some(at) => Self::Valid(at),
            None => Self::Invalid(raw.to_string()),
        }
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(at: NaiveDateTime) -> Self {
        Self::Valid(at)
    }
}

impl FromStr for Timestamp {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for Timestamp {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_string()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid(at) => write!(f, "{}", at.format(TIMESTAMP_FORMAT)),
            Self::Invalid(raw) => write!(f, "{}", raw),
        }
    }
}

/// A product row as found in the origin store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Primary key. The origin column may be fixed-width and space padded.
    pub reference: String,
    pub name: String,
    pub packing: String,
    pub packing_to: String,
    pub vat: f64,
    pub vat_group: String,
    pub convertion_rate: f64,
    /// 0 or 1 in a valid row.
    pub is_active: i64,
    /// `None` when the origin column is NULL.
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
}

impl Product {
    /// The key with fixed-width padding removed.
    #[must_use]
    pub fn key(&self) -> &str {
        self.reference.trim()
    }
}

/// The row written to the destination store after conflict resolution.
///
/// Only built from a product that passed validation, so both timestamps are real instants.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationRow {
    pub reference: String,
    pub name: String,
    pub packing: String,
    pub packing_to: String,
    pub vat: f64,
    pub vat_group: String,
    pub convertion_rate: f64,
    pub is_active: i64,
    pub created: NaiveDateTime,
    pub modified: Option<NaiveDateTime>,
}

impl DestinationRow {
    /// Build the destination row for `product` with resolved timestamp provenance.
    #[must_use]
    pub fn new(product: &Product, created: NaiveDateTime, modified: Option<NaiveDateTime>) -> Self {
        Self {
            reference: product.key().to_string(),
            name: product.name.clone(),
            packing: product.packing.clone(),
            packing_to: product.packing_to.clone(),
            vat: product.vat,
            vat_group: product.vat_group.clone(),
            convertion_rate: product.convertion_rate,
            is_active: product.is_active,
            created,
            modified,
        }
    }
}
