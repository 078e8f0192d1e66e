//! Crate level errors.
//!
//! # Error Hierarchy
//!
//! The crate uses a two-layer error hierarchy:
//!
//! ## Engine Layer (`crate::error`)
//!
//! - [`Error`]: discovery engine errors: configuration problems, join
//!   failures, segmentation, protocol invariant violations
//!
//! ## Client / Serialization Layer
//!
//! - [`ZkError`](crate::zk::ZkError): ZooKeeper client errors, including
//!   the terminal `ClientFailed` state after session loss
//! - [`CodecError`](crate::discovery::CodecError): serialization failures
//!   on the engine's own wire records
//!
//! Both convert into [`Error`] via `From`, so client and codec errors
//! propagate through the engine with `?`.
//!
//! # Error Handling Patterns
//!
//! Three kinds of failure, handled differently:
//!
//! 1. **Transient ZooKeeper errors** are retried inside the client facade
//!    and never reach this layer.
//! 2. **Session loss** is terminal: the engine emits a single `Segmented`
//!    notification (or fails a pending join) and stops.
//! 3. **Invariant violations** (internal decode failures, impossible
//!    callback states) are fatal: logged, the join wait is failed, and the
//!    dispatch loop stops. The host is expected to restart the instance.

use thiserror::Error as ThisError;

use crate::discovery::CodecError;
use crate::zk::ZkError;

/// Result alias for discovery engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Discovery engine errors.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// Invalid configuration (bad base path, empty cluster name, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// Error reported by the ZooKeeper client layer.
    #[error("zookeeper error: {0}")]
    Zk(#[from] ZkError),

    /// Failed to encode or decode one of the engine's own wire records.
    ///
    /// Internal records are written only by this engine, so a decode
    /// failure is an invariant violation and is treated as fatal.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The ZooKeeper session was lost; the local node is segmented from
    /// the cluster and no further events will be delivered.
    #[error("local node is segmented")]
    Segmented,

    /// The discovery instance was stopped before the operation completed.
    #[error("discovery instance is stopped")]
    Stopped,

    /// A protocol invariant did not hold. Fatal.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    /// True if the error is terminal for the discovery instance (no retry
    /// or recovery is possible short of restarting it).
    pub fn is_terminal(&self) -> bool {
        match self {
            Error::Segmented | Error::Stopped | Error::Protocol(_) | Error::Codec(_) => true,
            Error::Zk(e) => e.is_terminal(),
            Error::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = Error::Config("cluster name is empty".to_string());
        assert!(err.to_string().contains("cluster name is empty"));
    }

    #[test]
    fn test_zk_error_converts() {
        let err: Error = ZkError::NoNode("/a/b".to_string()).into();
        assert!(matches!(err, Error::Zk(ZkError::NoNode(_))));
    }

    #[test]
    fn test_terminal_classification() {
        assert!(Error::Segmented.is_terminal());
        assert!(Error::Protocol("x".into()).is_terminal());
        assert!(Error::Zk(ZkError::ClientFailed).is_terminal());
        assert!(!Error::Zk(ZkError::NoNode("/x".into())).is_terminal());
        assert!(!Error::Config("x".into()).is_terminal());
    }

    #[test]
    fn test_error_is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(Error::Stopped);
        assert!(err.to_string().contains("stopped"));
    }
}
