//! Cluster membership and discovery engine.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────┐
//!                     │  ZooKeeper   │  single source of truth
//!                     └──────┬───────┘
//!        watches / ops       │
//!          ┌─────────────────┼──────────────────┐
//!          ▼                 ▼                  ▼
//!   ┌────────────┐    ┌────────────┐     ┌────────────┐
//!   │  member A  │    │  member B  │     │  member C  │
//!   │(coordinator│    │  (replays  │     │  (replays  │
//!   │ writes log)│    │   /evts)   │     │   /evts)   │
//!   └────────────┘    └────────────┘     └────────────┘
//! ```
//!
//! The member holding the minimum internal id is the coordinator: it turns
//! alive-set changes and custom submissions into a totally-ordered event
//! log at `/evts`, which every member (the coordinator included) replays
//! to produce identical listener notifications. Members acknowledge replay
//! progress through their alive tokens; fully-acknowledged event payloads
//! are garbage-collected.
//!
//! Module map:
//!
//! - [`config`]: engine configuration and validation
//! - [`paths`]: the ZooKeeper path schema and name codecs
//! - [`node`] / [`view`]: members and the three-index membership view
//! - [`events`]: the event log model and ack accounting
//! - [`codec`]: the injected serialization capability
//! - [`listener`] / [`exchange`]: host-side collaborator contracts
//! - [`engine`]: the public [`DiscoveryEngine`], join protocol and
//!   dispatch lane (election and replay live in sibling private impls)

pub mod codec;
pub mod config;
mod coordinator;
pub mod engine;
pub mod events;
pub mod exchange;
pub mod listener;
pub mod node;
pub mod paths;
mod replay;
pub mod view;

pub use codec::{Codec, CodecError, JsonCodec};
pub use config::DiscoveryConfig;
pub use engine::DiscoveryEngine;
pub use events::{
    AliveNodeRecord, DiscoveryEvent, DiscoveryEventsData, EventKind, JoinedNodeData,
    JoiningNodeData,
};
pub use exchange::{DataExchange, DiscoveryDataBag, NoopExchange};
pub use listener::{DiscoveryEventType, DiscoveryListener, DiscoveryNotification};
pub use node::ClusterNode;
pub use paths::DiscoveryPaths;
pub use view::ClusterView;
