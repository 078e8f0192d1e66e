//! Centralized protocol and configuration constants.
//!
//! This module consolidates the magic numbers and name fragments used
//! throughout the discovery engine. Having them in one place makes it
//! easier to:
//!
//! - Understand the ZooKeeper layout constraints
//! - Update values consistently
//! - Document the rationale for each constant
//!
//! # Categories
//!
//! - **Path Constants**: znode names under `<base>/<cluster>`
//! - **Name Encoding Constants**: separators and padding in znode names
//! - **Engine Constants**: acknowledgement and join-wait tuning

// =============================================================================
// Path Constants
// =============================================================================

/// Znode holding the serialized discovery event log.
///
/// Written exclusively by the coordinator (version -1); every member holds
/// a data watch on it.
pub const EVENTS_NODE: &str = "evts";

/// Parent of the per-member alive tokens (ephemeral-sequential children).
///
/// Created last during base-path setup, so its existence implies the whole
/// layout exists.
pub const ALIVE_NODES_NODE: &str = "aliveNodes";

/// Scratch area where joining members park their joining payload before
/// creating an alive token.
pub const JOIN_DATA_NODE: &str = "joinData";

/// Parent of custom-event submissions (persistent-sequential children).
pub const CUSTOM_EVENTS_NODE: &str = "customEvts";

/// Child of `/evts/<event_id>` holding the raw joining payload for the
/// member that joined in that event.
pub const JOIN_PAYLOAD_CHILD: &str = "joinData";

/// Child of `/evts/<event_id>` holding the topology snapshot and common
/// data handed to the joiner.
pub const JOINED_DATA_CHILD: &str = "joined";

// =============================================================================
// Name Encoding Constants
// =============================================================================

/// Separator between the member UUID and the sequence fields in znode
/// names (`<uuid>|<seq>` and `<uuid>|<joinSeq>|<aliveSeq>`).
pub const NAME_SEPARATOR: char = '|';

/// Width ZooKeeper pads sequential-znode suffixes to, and the width the
/// coordinator pads the join sequence to when reconstructing a join-data
/// path.
pub const SEQUENCE_PAD_WIDTH: usize = 10;

// =============================================================================
// Engine Constants
// =============================================================================

/// Environment variable overriding how many processed events a member
/// batches before writing its acknowledgement record back to ZooKeeper.
pub const ACK_THRESHOLD_ENV: &str = "MENAGERIE_ACK_THRESHOLD";

/// Default acknowledgement batching threshold.
pub const DEFAULT_ACK_THRESHOLD: u64 = 5;

/// Lower clamp for the acknowledgement threshold: every event acked
/// individually.
pub const MIN_ACK_THRESHOLD: u64 = 1;

/// How often the join call logs a warning while still waiting for the
/// local join event. There is no hard deadline.
pub const DEFAULT_JOIN_WARN_INTERVAL_SECS: u64 = 10;

/// Default ZooKeeper session timeout handed to the client.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 10_000;
