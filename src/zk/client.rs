//! Retrying ZooKeeper client facade.
//!
//! [`ZkClient`] wraps a raw [`ZooKeeperApi`] session and is the only thing
//! the discovery engine talks to. It adds:
//!
//! - automatic retries of transient connectivity errors with the policies
//!   from [`crate::zk::retry`]
//! - a terminal failed state: after a session expiry (or exhausted
//!   retries) every further operation fails fast with
//!   [`ZkError::ClientFailed`]
//! - the convenience operations the join and cleanup paths need
//!   (`create_if_needed`, `create_all_if_needed`, `delete_if_exists`,
//!   `delete_children`)
//!
//! Connection loss itself is not reported through return values; the
//! engine observes the terminal [`SessionEvent::ConnectionLost`] on the
//! session event stream, exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use backon::Retryable;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::zk::api::{CreateMode, SessionEvent, Stat, ZkError, ZkResult, ZooKeeperApi};
use crate::zk::retry::{bootstrap_policy, op_policy};

/// Retrying facade over a raw ZooKeeper session.
///
/// Cheap to clone; clones share the session and the failed flag.
pub struct ZkClient<Z> {
    api: Arc<Z>,
    failed: Arc<AtomicBool>,
}

impl<Z> Clone for ZkClient<Z> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            failed: Arc::clone(&self.failed),
        }
    }
}

impl<Z: ZooKeeperApi> ZkClient<Z> {
    /// Wrap a raw session.
    pub fn new(api: Z) -> Self {
        Self {
            api: Arc::new(api),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take the underlying session's event stream. `Some` exactly once.
    pub fn take_session_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.api.take_session_events()
    }

    /// True once the session is past a terminal disconnect.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Mark the client terminally failed. Called by the engine when it
    /// consumes the connection-loss event, and internally on expiry.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Close the underlying session. Idempotent; ephemerals are released.
    pub async fn close(&self) {
        self.mark_failed();
        self.api.close().await;
    }

    async fn run<T, F, Fut>(&self, policy: backon::ExponentialBuilder, op: F) -> ZkResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ZkResult<T>>,
    {
        if self.is_failed() {
            return Err(ZkError::ClientFailed);
        }

        match op.retry(policy).when(ZkError::is_transient).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_transient() || e.is_terminal() => {
                warn!(error = %e, "zookeeper session is gone, failing client");
                self.mark_failed();
                Err(ZkError::ClientFailed)
            }
            Err(e) => Err(e),
        }
    }

    /// Create a znode, returning the actual (sequence-suffixed) path.
    pub async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> ZkResult<String> {
        self.run(op_policy(), || self.api.create(path, data, mode))
            .await
    }

    /// Create a znode unless it already exists. Returns the actual path
    /// for sequential modes, the requested path otherwise.
    pub async fn create_if_needed(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> ZkResult<String> {
        match self.create(path, data, mode).await {
            Err(ZkError::NodeExists(_)) => {
                debug!(path, "znode already exists");
                Ok(path.to_string())
            }
            other => other,
        }
    }

    /// Create every path in order, ignoring the ones that already exist.
    /// Used for the base-path skeleton on join.
    pub async fn create_all_if_needed(&self, paths: &[String], mode: CreateMode) -> ZkResult<()> {
        for path in paths {
            self.run(bootstrap_policy(), || async {
                match self.api.create(path, &[], mode).await {
                    Err(ZkError::NodeExists(_)) => Ok(String::new()),
                    other => other,
                }
            })
            .await?;
        }
        Ok(())
    }

    /// Read a znode's data, optionally registering a one-shot watch.
    pub async fn get_data(&self, path: &str, watch: bool) -> ZkResult<Bytes> {
        self.run(op_policy(), || self.api.get_data(path, watch))
            .await
    }

    /// Overwrite a znode's data. Version -1 skips the check.
    pub async fn set_data(&self, path: &str, data: &[u8], version: i32) -> ZkResult<()> {
        self.run(op_policy(), || self.api.set_data(path, data, version))
            .await
    }

    /// List direct child names, optionally registering a one-shot watch.
    pub async fn get_children(&self, path: &str, watch: bool) -> ZkResult<Vec<String>> {
        self.run(op_policy(), || self.api.get_children(path, watch))
            .await
    }

    /// Stat a znode, optionally registering a one-shot watch (which also
    /// fires on later creation when the znode does not exist yet).
    pub async fn exists(&self, path: &str, watch: bool) -> ZkResult<Option<Stat>> {
        self.run(op_policy(), || self.api.exists(path, watch)).await
    }

    /// Delete a znode. Version -1 skips the check.
    pub async fn delete(&self, path: &str, version: i32) -> ZkResult<()> {
        self.run(op_policy(), || self.api.delete(path, version))
            .await
    }

    /// Delete a znode, treating "already gone" as success.
    pub async fn delete_if_exists(&self, path: &str, version: i32) -> ZkResult<()> {
        match self.delete(path, version).await {
            Err(ZkError::NoNode(_)) => Ok(()),
            other => other,
        }
    }

    /// Delete every direct child of `path` (children must themselves be
    /// leaves). Used when wiping a previous cluster's leftovers.
    pub async fn delete_children(&self, path: &str) -> ZkResult<()> {
        for child in self.get_children(path, false).await? {
            self.delete_if_exists(&format!("{path}/{child}"), -1).await?;
        }
        Ok(())
    }
}
