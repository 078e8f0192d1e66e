//! Retry policies for ZooKeeper operations.
//!
//! Transient connectivity errors are retried inside the client facade with
//! standardized jittered exponential backoff from the `backon` crate.
//!
//! # Available Policies
//!
//! | Policy | Min Delay | Max Delay | Retries | Use Case |
//! |--------|-----------|-----------|---------|----------|
//! | `op_policy` | 50ms | 2s | 8 | Steady-state ZK reads/writes |
//! | `bootstrap_policy` | 100ms | 5s | 10 | Base-path creation on join |
//!
//! Retries are exhausted only while the connection stays flapping; a real
//! session expiry short-circuits them immediately.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Policy for steady-state ZooKeeper operations (event-log reads and
/// writes, ack record updates, watch re-registration reads).
///
/// Moderate initial delay to let the connection settle, bounded max delay
/// so a genuinely dead ensemble escalates within seconds. Jitter prevents
/// a reconnecting cluster from hammering the ensemble in lockstep.
pub fn op_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(8)
        .with_jitter()
}

/// Policy for join-time base-path creation.
///
/// More patient than [`op_policy`]: many processes may race to create the
/// same directory skeleton when a cluster cold-starts.
pub fn bootstrap_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(10)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use backon::Retryable;

    use crate::zk::ZkError;

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_errors() {
        let attempts = AtomicU32::new(0);

        let result = (|| async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                Err(ZkError::ConnectionLoss)
            } else {
                Ok(42)
            }
        })
        .retry(op_policy())
        .when(ZkError::is_transient)
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_touch_logical_errors() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), ZkError> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ZkError::NoNode("/gone".into()))
        })
        .retry(op_policy())
        .when(ZkError::is_transient)
        .await;

        assert!(matches!(result, Err(ZkError::NoNode(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_on_persistent_flapping() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), ZkError> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ZkError::ConnectionLoss)
        })
        .retry(op_policy())
        .when(ZkError::is_transient)
        .await;

        assert!(matches!(result, Err(ZkError::ConnectionLoss)));
        // Initial attempt + 8 retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 9);
    }
}
