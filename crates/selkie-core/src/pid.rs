//! Process identities and reply tokens
//!
//! TigerStyle: Explicit types, immutable after creation.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Pid
// =============================================================================

/// Unique identifier for a process
///
/// Pids consist of the owning node's id and a per-node monotonic sequence
/// number. They are cheap to copy and round-trip byte-exact through serde.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Pid {
    node: u32,
    seq: u64,
}

impl Pid {
    /// Create a Pid from raw parts
    ///
    /// Intended for the node allocator and for tests; application code
    /// receives pids from `Node::register` and never fabricates them.
    pub fn from_parts(node: u32, seq: u64) -> Self {
        Self { node, seq }
    }

    /// Get the node id
    pub fn node(&self) -> u32 {
        self.node
    }

    /// Get the per-node sequence number
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}>", self.node, self.seq)
    }
}

// =============================================================================
// ReplyToken
// =============================================================================

/// Opaque identifier correlating a call with its reply
///
/// A token is the caller's pid plus a monotonic per-caller counter, so it is
/// unique within the caller's lifetime without coordination. Tokens must
/// round-trip byte-exact through serde: the server echoes the token it
/// received and the caller matches on the exact value.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReplyToken {
    caller: Pid,
    seq: u64,
}

impl ReplyToken {
    /// Create a token for the given caller and call sequence number
    pub fn new(caller: Pid, seq: u64) -> Self {
        Self { caller, seq }
    }

    /// Get the caller's pid
    pub fn caller(&self) -> Pid {
        self.caller
    }

    /// Get the call sequence number
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for ReplyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.caller, self.seq)
    }
}
