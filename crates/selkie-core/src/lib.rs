//! Selkie Core
//!
//! Core types and in-process messaging substrate for the Selkie
//! managed-process framework.
//!
//! # Overview
//!
//! This crate provides the primitives the managed-process engine
//! (`selkie-process`) is built on:
//!
//! - Process identities and reply tokens
//! - Opaque envelopes with typed projection
//! - Mailboxes with selective receive
//! - Typed channels with erasable send-ports
//! - The local node: process table, links, monitors, exit signals
//! - Exit reasons and the wire-level envelope codec
//!
//! # TigerStyle
//!
//! - Explicit limits with units in the name (`constants`)
//! - Bounded mailboxes, no silent drops
//! - Duration measurements and sleeps behind `TimeProvider`

pub mod channel;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod exit;
pub mod io;
pub mod mailbox;
pub mod node;
pub mod pid;
pub mod telemetry;
pub mod wire;

pub use channel::{channel, AnySendPort, ReceivePort, SendPort};
pub use constants::*;
pub use envelope::{Envelope, Message, ReplySink, Tag, TagKind};
pub use error::{Error, Result};
pub use exit::{Down, ExitReason};
pub use io::{ManualClock, TimeProvider, WallClockTime};
pub use mailbox::{Mailbox, MatchFn, Recv};
pub use node::Node;
pub use pid::{Pid, ReplyToken};
pub use telemetry::{init_telemetry, init_test_telemetry, TelemetryConfig};
pub use wire::{decode, encode, WireFrame};
