//! Environment-variable handling for the acknowledgement threshold.
//!
//! Environment variables are process-global, so these tests serialize
//! access through a mutex and restore the prior value afterwards.

use std::env;
use std::sync::Mutex;

use menagerie::constants::{ACK_THRESHOLD_ENV, DEFAULT_ACK_THRESHOLD};
use menagerie::discovery::DiscoveryConfig;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Run a closure with the ack-threshold variable set (or unset), restoring
/// the previous value afterwards.
fn with_ack_threshold<F: FnOnce() -> R, R>(value: Option<&str>, f: F) -> R {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let original = env::var(ACK_THRESHOLD_ENV).ok();

    match value {
        Some(v) => unsafe { env::set_var(ACK_THRESHOLD_ENV, v) },
        None => unsafe { env::remove_var(ACK_THRESHOLD_ENV) },
    }

    let result = f();

    match original {
        Some(v) => unsafe { env::set_var(ACK_THRESHOLD_ENV, v) },
        None => unsafe { env::remove_var(ACK_THRESHOLD_ENV) },
    }

    result
}

fn threshold_with(value: Option<&str>) -> u64 {
    with_ack_threshold(value, || {
        DiscoveryConfig::new("/menagerie", "env-test", "127.0.0.1:2181").ack_threshold
    })
}

#[test]
fn test_default_when_unset() {
    assert_eq!(threshold_with(None), DEFAULT_ACK_THRESHOLD);
}

#[test]
fn test_explicit_value() {
    assert_eq!(threshold_with(Some("17")), 17);
}

#[test]
fn test_zero_clamped_to_one() {
    assert_eq!(threshold_with(Some("0")), 1);
}

#[test]
fn test_garbage_falls_back_to_default() {
    assert_eq!(threshold_with(Some("not-a-number")), DEFAULT_ACK_THRESHOLD);
    assert_eq!(threshold_with(Some("-3")), DEFAULT_ACK_THRESHOLD);
}
