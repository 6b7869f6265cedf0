//! Selkie Process
//!
//! OTP-style managed processes: an event loop that consumes a mailbox,
//! dispatches typed messages to user-registered handlers, speaks the
//! call/cast protocol, and terminates through a structured exit protocol a
//! supervisor can observe.
//!
//! # Overview
//!
//! - [`ProcessDefinition`]: handler registry (call, cast, info, exit) plus
//!   timeout handler, shutdown handler, and unhandled-message policy
//! - [`spawn`]: the plain receive loop
//! - [`spawn_prioritised`]: drain-then-dispatch with strict priorities
//! - [`spawn_with_control`]: a typed side-band polled ahead of the mailbox
//! - [`Client`]: call/cast clients with timeout-bearing variants
//!
//! # Example
//!
//! ```no_run
//! use selkie_core::node::Node;
//! use selkie_process::{
//!     spawn, Client, InitResult, ProcessAction, ProcessDefinition, ProcessReply,
//! };
//!
//! # async fn demo() -> selkie_core::error::Result<()> {
//! struct Inc;
//! struct Get;
//!
//! let node = Node::new();
//! let definition = ProcessDefinition::<u64>::new()
//!     .handle_cast(|count, _: Inc| ProcessAction::Continue(count + 1))
//!     .handle_call(|count, _: Get| ProcessReply::Reply(count, count));
//! let server = spawn(&node, definition, || InitResult::Ok(0, None))?;
//!
//! let mut client = Client::new(&node)?;
//! client.cast(server.pid(), Inc)?;
//! let count: u64 = client.call(server.pid(), Get).await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod client;
pub mod control;
pub mod definition;
mod handlers;
pub mod priority;
pub mod server;

pub use action::{
    reply_to, CallRef, InitResult, ProcessAction, ProcessReply, UnhandledPolicy,
};
pub use client::Client;
pub use control::{control_channel, spawn_with_control};
pub use definition::ProcessDefinition;
pub use priority::{
    spawn_prioritised, PrioritisedProcessDefinition, RecvTimeoutPolicy,
};
pub use server::{spawn, ProcessHandle};
