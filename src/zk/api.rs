//! Raw ZooKeeper client interface.
//!
//! The discovery engine does not speak the ZooKeeper wire protocol itself;
//! it is written against the [`ZooKeeperApi`] trait, which models the small
//! slice of the ZooKeeper API the engine needs:
//!
//! - the six primitive operations (`create`, `get_data`, `set_data`,
//!   `get_children`, `exists`, `delete`)
//! - one-shot watches on the read operations, delivered through a single
//!   per-session event stream (ZooKeeper's default-watcher model)
//! - a terminal [`SessionEvent::ConnectionLost`] on session expiry
//!
//! Production deployments implement this trait over a real client;
//! [`MockZooKeeper`](crate::zk::MockZooKeeper) provides a full in-memory
//! implementation for tests. The engine itself only ever talks to the
//! retrying facade in [`crate::zk::client`].

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Result alias for raw client operations.
pub type ZkResult<T> = Result<T, ZkError>;

/// Errors surfaced by the ZooKeeper client layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ZkError {
    /// The znode does not exist.
    #[error("no node: {0}")]
    NoNode(String),

    /// The znode already exists (non-sequential create).
    #[error("node exists: {0}")]
    NodeExists(String),

    /// The expected version did not match.
    #[error("bad version: {0}")]
    BadVersion(String),

    /// Delete of a znode that still has children.
    #[error("node not empty: {0}")]
    NotEmpty(String),

    /// Malformed path argument.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Transient loss of connectivity; the session may still be alive.
    /// Retried inside the facade.
    #[error("connection loss")]
    ConnectionLoss,

    /// The session expired. Terminal.
    #[error("session expired")]
    SessionExpired,

    /// The client is past a terminal disconnect; no operation will ever
    /// succeed again on this session.
    #[error("zookeeper client failed")]
    ClientFailed,
}

impl ZkError {
    /// True for errors the facade retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, ZkError::ConnectionLoss)
    }

    /// True for errors that end the session for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ZkError::SessionExpired | ZkError::ClientFailed)
    }
}

/// Znode creation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Plain persistent znode.
    Persistent,
    /// Persistent znode with a server-assigned monotonic name suffix.
    PersistentSequential,
    /// Removed automatically when the creating session ends.
    Ephemeral,
    /// Ephemeral with a server-assigned monotonic name suffix.
    EphemeralSequential,
}

impl CreateMode {
    /// Whether the server appends a sequence suffix to the name.
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }

    /// Whether the znode dies with its session.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }
}

/// Subset of the znode stat the engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Data version, bumped on every `set_data`.
    pub version: i32,
    /// Whether the znode is ephemeral.
    pub ephemeral: bool,
}

/// What changed under a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// The znode's data changed.
    DataChanged,
    /// The znode's direct children changed.
    ChildrenChanged,
    /// The znode was created (exists-watch only).
    Created,
    /// The znode was deleted.
    Deleted,
}

/// A fired one-shot watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// What happened.
    pub kind: WatchKind,
    /// Absolute path of the znode the watch was registered on.
    pub path: String,
}

/// Events delivered on the per-session stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A registered watch fired. Watches are one-shot; re-register on the
    /// next read if continued observation is needed.
    Watch(WatchEvent),
    /// The session is gone. Delivered exactly once; every subsequent
    /// operation fails with [`ZkError::SessionExpired`] or
    /// [`ZkError::ClientFailed`].
    ConnectionLost,
}

/// Raw ZooKeeper session operations.
///
/// All paths are absolute. Read operations take a `watch` flag; a watch is
/// registered atomically with the read and fires at most once on the
/// session's event stream.
#[async_trait]
pub trait ZooKeeperApi: Send + Sync + 'static {
    /// Create a znode, returning the actual path (which differs from the
    /// requested one for sequential modes).
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> ZkResult<String>;

    /// Read a znode's data, optionally watching for data changes and
    /// deletion.
    async fn get_data(&self, path: &str, watch: bool) -> ZkResult<Bytes>;

    /// Overwrite a znode's data. `version` of -1 skips the version check.
    async fn set_data(&self, path: &str, data: &[u8], version: i32) -> ZkResult<()>;

    /// List a znode's direct children (names, not paths), optionally
    /// watching for membership changes.
    async fn get_children(&self, path: &str, watch: bool) -> ZkResult<Vec<String>>;

    /// Stat a znode, optionally watching for creation and deletion. The
    /// watch is registered even when the znode does not exist.
    async fn exists(&self, path: &str, watch: bool) -> ZkResult<Option<Stat>>;

    /// Delete a znode. `version` of -1 skips the version check.
    async fn delete(&self, path: &str, version: i32) -> ZkResult<()>;

    /// Take the session event stream. Yields `Some` exactly once; the
    /// stream carries watch events and the terminal connection loss.
    fn take_session_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>>;

    /// Close the session, releasing its ephemeral znodes. Idempotent.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mode_flags() {
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
        assert!(!CreateMode::PersistentSequential.is_ephemeral());
        assert!(!CreateMode::Persistent.is_sequential());
        assert!(CreateMode::Ephemeral.is_ephemeral());
    }

    #[test]
    fn test_error_classification() {
        assert!(ZkError::ConnectionLoss.is_transient());
        assert!(!ZkError::ConnectionLoss.is_terminal());
        assert!(ZkError::SessionExpired.is_terminal());
        assert!(ZkError::ClientFailed.is_terminal());
        assert!(!ZkError::NoNode("/x".into()).is_transient());
        assert!(!ZkError::NoNode("/x".into()).is_terminal());
    }
}
