//! Retry backoff policy and the background retry scheduler.
//!
//! Failed transactions carry a `next_retry_at`; the scheduler scans for due
//! rows and reopens them through the engine with bounded concurrency. Reopen
//! failures are logged and reported on the audit stream, and leave the row
//! eligible (it receives a fresh `next_retry_at` from the failed attempt).

use crate::audit::{AuditEmitter, AuditEvent};
use crate::config::RetryConfig;
use crate::engine::TransactionEngine;
use crate::store::Store;
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff policy with ±10% jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base: Duration,
    /// Backoff ceiling.
    pub max: Duration,
    /// Retry budget per transaction.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Build from configuration.
    #[must_use]
    pub const fn from_config(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            max: Duration::from_millis(config.max_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before attempt `retry_count + 1`.
    ///
    /// `min(base * 2^retry_count, max)`, then ±10% jitter so simultaneous
    /// failures do not retry in lockstep.
    #[must_use]
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(31);
        let raw_ms = self
            .base
            .as_millis()
            .saturating_mul(1u128 << exponent)
            .min(self.max.as_millis());
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered = (raw_ms as f64 * jitter) as u64;
        Duration::from_millis(jittered)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
            max_attempts: 3,
        }
    }
}

/// Background worker that reopens eligible failed transactions.
pub struct RetryScheduler {
    engine: Arc<TransactionEngine>,
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditEmitter>,
    scan_interval: Duration,
    scan_limit: u32,
    scan_concurrency: usize,
}

impl RetryScheduler {
    /// Create a scheduler from configuration.
    #[must_use]
    pub fn new(
        engine: Arc<TransactionEngine>,
        store: Arc<dyn Store>,
        audit: Arc<dyn AuditEmitter>,
        config: &RetryConfig,
    ) -> Self {
        Self {
            engine,
            store,
            audit,
            scan_interval: config.scan_interval,
            scan_limit: config.scan_limit,
            scan_concurrency: config.scan_concurrency.max(1),
        }
    }

    /// Run forever; callers spawn this and drop the handle on shutdown.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.scan_once().await;
        }
    }

    /// One scan pass; exposed for tests.
    pub async fn scan_once(&self) {
        let now = self.engine.clock_now();
        let due = match self.store.due_retries(now, self.scan_limit).await {
            Ok(due) => due,
            Err(err) => {
                tracing::error!(error = %err, "retry scan failed");
                self.audit.emit(AuditEvent::SystemError {
                    component: "retry_scheduler".to_string(),
                    message: format!("retry scan failed: {err}"),
                });
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        tracing::info!(count = due.len(), "reopening due transactions");
        stream::iter(due)
            .for_each_concurrent(self.scan_concurrency, |id| {
                let engine = Arc::clone(&self.engine);
                let audit = Arc::clone(&self.audit);
                async move {
                    if let Err(err) = engine.retry(id).await {
                        // The failed attempt stamped a fresh next_retry_at;
                        // the row stays eligible.
                        tracing::warn!(transaction_id = %id, error = %err, "retry attempt failed");
                        audit.emit(AuditEvent::SystemError {
                            component: "retry_scheduler".to_string(),
                            message: format!("retry of transaction {id} failed: {err}"),
                        });
                    }
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_within_the_cap() {
        let policy = RetryPolicy::default();
        for retry_count in 0..6 {
            let delay = policy.backoff_delay(retry_count).as_millis() as u64;
            let nominal = (1_000u64 << retry_count).min(30_000);
            let low = nominal * 9 / 10;
            let high = nominal * 11 / 10;
            assert!(
                (low..=high).contains(&delay),
                "attempt {retry_count}: {delay}ms outside [{low}, {high}]"
            );
        }
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let policy = RetryPolicy::default();
        let delay = policy.backoff_delay(30);
        assert!(delay.as_millis() as u64 <= 33_000);
    }

    #[test]
    fn jitter_varies_between_calls() {
        let policy = RetryPolicy::default();
        let samples: Vec<u128> = (0..32)
            .map(|_| policy.backoff_delay(3).as_millis())
            .collect();
        let first = samples[0];
        assert!(
            samples.iter().any(|s| *s != first),
            "no jitter variation across 32 samples"
        );
    }
}
