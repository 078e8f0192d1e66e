//! # Menagerie
//! ZooKeeper-backed cluster membership and discovery.
//!
//! Participating processes (*members*) use a shared ZooKeeper ensemble as
//! the single source of truth for which members are alive, for a
//! totally-ordered log of *discovery events* (joins, failures, opaque
//! custom broadcasts), and for the data exchanged between a new member and
//! the cluster at join time.
//!
//! # Goals
//! - A strict total order of discovery events, observed identically by
//!   every surviving member
//! - Coordinator failover without herd effects (next-in-line election on
//!   the alive-set)
//! - Bounded ZooKeeper footprint: event payloads are garbage-collected
//!   once every member has acknowledged them
//! - A serialized, message-driven core: no state is ever touched from two
//!   tasks at once
//!
//! ## Getting started
//!
//! The engine is written against two host-supplied collaborators (a
//! [`DiscoveryListener`](discovery::DiscoveryListener) receiving
//! notifications and a [`DataExchange`](discovery::DataExchange) supplying
//! join-time payloads) plus a raw ZooKeeper session implementing
//! [`ZooKeeperApi`](zk::ZooKeeperApi).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use menagerie::prelude::*;
//!
//! struct PrintListener;
//!
//! impl DiscoveryListener for PrintListener {
//!     fn on_discovery(&self, n: DiscoveryNotification) {
//!         println!("{} v{} {}", n.event_type, n.topology_version, n.node.id);
//!     }
//! }
//!
//! # async fn run(session: impl menagerie::zk::ZooKeeperApi) -> menagerie::Result<()> {
//! let config = DiscoveryConfig::new("/menagerie", "my-cluster", "zk-1:2181,zk-2:2181");
//! let engine = DiscoveryEngine::new(
//!     config,
//!     session,
//!     NodeId::random(),
//!     Arc::new(PrintListener),
//!     Arc::new(NoopExchange),
//! )?;
//!
//! engine.join().await?;
//! println!("joined as {:?}", engine.local_node().await);
//! # Ok(())
//! # }
//! ```
//!
//! Session loss is terminal: a joined member receives exactly one
//! `Segmented` notification and the instance stops. The host restarts a
//! fresh discovery instance if it wants back into the cluster.
//!
//! The `test-utilities` feature exposes
//! [`MockZooKeeper`](zk::MockZooKeeper), an in-memory ensemble used by
//! this crate's own integration tests to drive multi-member scenarios
//! in-process, including coordinator failover via session expiry.

#![forbid(unsafe_code)]

pub mod constants;
pub mod discovery;
pub mod error;
pub mod telemetry;
pub mod types;
pub mod zk;

pub use error::{Error, Result};

pub mod prelude {
    //! The types most hosts need to join a cluster.

    pub use crate::discovery::{
        ClusterNode, DataExchange, DiscoveryConfig, DiscoveryDataBag, DiscoveryEngine,
        DiscoveryEventType, DiscoveryListener, DiscoveryNotification, JsonCodec, NoopExchange,
    };
    pub use crate::error::{Error, Result};
    pub use crate::types::{EventId, InternalId, NodeId, TopologyVersion};

    pub use bytes;
}
