//! Discovery engine configuration.
//!
//! # Fields
//!
//! | Field | Meaning | Default |
//! |-------|---------|---------|
//! | `base_path` | ZooKeeper path all clusters nest under | required |
//! | `cluster_name` | This cluster's directory name | required |
//! | `connect_string` | Ensemble address for the host's ZK client | required |
//! | `session_timeout` | Session timeout for the host's ZK client | 10s |
//! | `ack_threshold` | Events processed between ack write-backs | 5, env-overridable |
//! | `join_warn_interval` | How often join logs a still-waiting warning | 10s |
//!
//! # Environment Variables
//!
//! - `MENAGERIE_ACK_THRESHOLD`: overrides `ack_threshold`; clamped to ≥ 1.

use std::time::Duration;

use tracing::warn;

use crate::constants::{
    ACK_THRESHOLD_ENV, DEFAULT_ACK_THRESHOLD, DEFAULT_JOIN_WARN_INTERVAL_SECS,
    DEFAULT_SESSION_TIMEOUT_MS, MIN_ACK_THRESHOLD,
};
use crate::error::{Error, Result};

/// Configuration for one discovery instance.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// ZooKeeper path all clusters nest under. Must be a valid ZooKeeper
    /// path.
    pub base_path: String,
    /// Name of this cluster; becomes a directory under `base_path`.
    pub cluster_name: String,
    /// Ensemble connect string, passed through to the host's ZooKeeper
    /// client.
    pub connect_string: String,
    /// Session timeout, passed through to the host's ZooKeeper client.
    pub session_timeout: Duration,
    /// How many processed events a member batches before writing its
    /// acknowledgement record back.
    pub ack_threshold: u64,
    /// How often the join call warns while still waiting for the local
    /// join event.
    pub join_warn_interval: Duration,
}

impl DiscoveryConfig {
    /// Configuration with defaults, reading the ack threshold from the
    /// environment.
    pub fn new(
        base_path: impl Into<String>,
        cluster_name: impl Into<String>,
        connect_string: impl Into<String>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            cluster_name: cluster_name.into(),
            connect_string: connect_string.into(),
            session_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
            ack_threshold: ack_threshold_from_env(),
            join_warn_interval: Duration::from_secs(DEFAULT_JOIN_WARN_INTERVAL_SECS),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validate_zk_path(&self.base_path)?;

        if self.cluster_name.is_empty() {
            return Err(Error::Config("cluster name is empty".to_string()));
        }
        if self.cluster_name.contains('/') {
            return Err(Error::Config(format!(
                "cluster name must not contain '/': {}",
                self.cluster_name
            )));
        }
        if self.ack_threshold < MIN_ACK_THRESHOLD {
            return Err(Error::Config(format!(
                "ack threshold must be at least {MIN_ACK_THRESHOLD}"
            )));
        }

        Ok(())
    }
}

/// Read the ack threshold from `MENAGERIE_ACK_THRESHOLD`, clamping to the
/// minimum. Unparseable values fall back to the default.
pub fn ack_threshold_from_env() -> u64 {
    let threshold = match std::env::var(ACK_THRESHOLD_ENV) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(
                value = %raw,
                "ignoring unparseable {ACK_THRESHOLD_ENV}, using default"
            );
            DEFAULT_ACK_THRESHOLD
        }),
        Err(_) => DEFAULT_ACK_THRESHOLD,
    };

    threshold.max(MIN_ACK_THRESHOLD)
}

/// Validate a ZooKeeper path: absolute, no empty or relative segments, no
/// trailing slash, no control characters.
fn validate_zk_path(path: &str) -> Result<()> {
    let fail = |reason: &str| {
        Err(Error::Config(format!(
            "invalid zookeeper path {path:?}: {reason}"
        )))
    };

    if path.is_empty() {
        return fail("empty");
    }
    if !path.starts_with('/') {
        return fail("must start with '/'");
    }
    if path.len() > 1 && path.ends_with('/') {
        return fail("must not end with '/'");
    }
    if path.chars().any(|c| c.is_control()) {
        return fail("contains control characters");
    }
    if path == "/" {
        return Ok(());
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return fail("contains an empty segment"),
            "." | ".." => return fail("contains a relative segment"),
            _ => {}
        }
    }

    Ok(())
}
