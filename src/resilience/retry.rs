// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backoff for process startup.
//!
//! Only pool creation and schema bootstrap go through here. Steady-state store
//! calls are never retried in-line: a failed record stays in staging and the
//! next scheduled cycle picks it up again.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use product_sync::RetryConfig;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, 5);
//!
//! // Waits between the five attempts
//! let waits: Vec<_> = startup.backoff().collect();
//! assert_eq!(waits.len(), 4);
//! assert_eq!(waits[0], Duration::from_millis(200));
//! assert_eq!(waits[3], Duration::from_millis(1600));
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryConfig {
    /// Five attempts over roughly three seconds, so a wrong URL fails the
    /// process quickly instead of hanging it.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            max_attempts: 5,
        }
    }

    /// Sleep before each retry, in order. Yields `max_attempts - 1` values.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> + '_ {
        let retries = self.max_attempts.saturating_sub(1) as usize;
        std::iter::successors(Some(self.initial_delay), move |prev| {
            Some(prev.mul_f64(self.factor).min(self.max_delay))
        })
        .take(retries)
    }
}

/// Run `operation` until it succeeds or the attempts in `config` run out.
/// The last error is returned unchanged.
pub async fn retry<F, Fut, T, E>(what: &str, config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = config.backoff();
    let mut attempt = 1u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(what, attempt, "Startup step recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let Some(wait) = backoff.next() else {
            warn!(what, attempt, error = %err, "Startup step failed, giving up");
            return Err(err);
        };
        warn!(what, attempt, max = config.max_attempts, error = %err, wait = ?wait, "Startup step failed, retrying");
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
