//! ZooKeeper client layer.
//!
//! The engine is written against the raw [`ZooKeeperApi`] trait and only
//! ever calls it through the retrying [`ZkClient`] facade:
//!
//! - [`api`]: the raw session interface (operations, watches, session
//!   events) an actual ZooKeeper client implements
//! - [`retry`]: named backoff policies for transient errors
//! - [`client`]: the facade: retries, terminal failed state, convenience
//!   helpers
//! - [`memory`]: a full in-memory implementation for tests
//!   (`test-utilities` feature)

pub mod api;
pub mod client;
pub mod retry;

#[cfg(any(test, feature = "test-utilities"))]
pub mod memory;

pub use api::{
    CreateMode, SessionEvent, Stat, WatchEvent, WatchKind, ZkError, ZkResult, ZooKeeperApi,
};
pub use client::ZkClient;
#[cfg(any(test, feature = "test-utilities"))]
pub use memory::{MockZkSession, MockZooKeeper};
