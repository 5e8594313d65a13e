// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Field rules for products leaving the staging store.
//!
//! Validation is pure and collects every violation instead of stopping at the
//! first one, so a single audit event tells the operator everything that needs
//! fixing in the staging row.
//!
//! # Example
//!
//! ```
//! use product_sync::{validate, Product, Timestamp};
//!
//! let product = Product {
//!     reference: "PRD001".into(),
//!     name: "Widget".into(),
//!     packing: "UNI".into(),
//!     packing_to: "BOX".into(),
//!     vat: 150.0,
//!     vat_group: "A".into(),
//!     convertion_rate: 1.0,
//!     is_active: 1,
//!     created: Some(Timestamp::parse("2024-01-15 10:30:00")),
//!     modified: None,
//! };
//!
//! let result = validate(&product);
//! assert!(!result.is_valid());
//! assert_eq!(result.violations().len(), 1);
//! assert!(result.violations()[0].contains("vat"));
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::product::{Product, Timestamp};

pub const REFERENCE_MAX_LEN: usize = 20;
pub const NAME_MAX_LEN: usize = 50;
pub const VAT_GROUP_MAX_LEN: usize = 10;
pub const VAT_MAX: f64 = 99.99;
pub const CONVERTION_RATE_MAX: f64 = 9_999_999.999_999_99;

fn packing_pattern() -> &'static Regex {
    static PACKING: OnceLock<Regex> = OnceLock::new();
    PACKING.get_or_init(|| Regex::new(r"^[A-Z]{1,3}$").expect("static pattern"))
}

/// Outcome of validating one product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    violations: Vec<String>,
}

impl Validation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    fn check(&mut self, ok: bool, message: impl FnOnce() -> String) {
        if !ok {
            self.violations.push(message());
        }
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.violations.join("; "))
    }
}

fn bounded_text(v: &mut Validation, field: &str, value: &str, max: usize) {
    let trimmed = value.trim();
    v.check(!trimmed.is_empty(), || format!("{field} must not be empty (got {value:?})"));
    let len = trimmed.chars().count();
    v.check(len <= max, || {
        format!("{field} must be at most {max} characters (got {len}: {value:?})")
    });
}

fn packing_code(v: &mut Validation, field: &str, value: &str) {
    if value.is_empty() {
        v.check(false, || format!("{field} must not be empty"));
        return;
    }
    v.check(packing_pattern().is_match(value), || {
        format!("{field} must be 1 to 3 uppercase letters (got {value:?})")
    });
}

fn ranged_number(v: &mut Validation, field: &str, value: f64, max: f64) {
    v.check(value.is_finite() && (0.0..=max).contains(&value), || {
        format!("{field} must be a finite number between 0 and {max} (got {value})")
    });
}

/// Validate a staging product against the destination field rules.
#[must_use]
pub fn validate(product: &Product) -> Validation {
    let mut v = Validation::default();

    bounded_text(&mut v, "reference", &product.reference, REFERENCE_MAX_LEN);
    bounded_text(&mut v, "name", &product.name, NAME_MAX_LEN);
    packing_code(&mut v, "packing", &product.packing);
    packing_code(&mut v, "packing_to", &product.packing_to);
    ranged_number(&mut v, "convertion_rate", product.convertion_rate, CONVERTION_RATE_MAX);
    bounded_text(&mut v, "vat_group", &product.vat_group, VAT_GROUP_MAX_LEN);
    ranged_number(&mut v, "vat", product.vat, VAT_MAX);

    let is_active = product.is_active;
    v.check(is_active == 0 || is_active == 1, || {
        format!("is_active must be 0 or 1 (got {is_active})")
    });

    if let Some(Timestamp::Invalid(raw)) = &product.modified {
        v.check(false, || format!("modified must be null or a valid date (got {raw:?})"));
    }

    match &product.created {
        Some(Timestamp::Valid(_)) => {}
        Some(Timestamp::Invalid(raw)) => {
            v.check(false, || format!("created must be a valid date (got {raw:?})"));
        }
        None => v.check(false, || "created must be a valid date (got null)".to_string()),
    }

    v
}
