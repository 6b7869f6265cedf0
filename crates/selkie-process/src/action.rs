//! Handler result types and the reply obligation
//!
//! TigerStyle: Tagged sums, no subclass hierarchies.

use selkie_core::envelope::{Envelope, Message, ReplySink};
use selkie_core::error::{Error, Result};
use selkie_core::exit::ExitReason;
use selkie_core::node::Node;
use selkie_core::pid::Pid;
use std::fmt;
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Process actions
// =============================================================================

/// What the receive loop does after a handler runs
#[derive(Debug)]
pub enum ProcessAction<S> {
    /// Loop with new state.
    Continue(S),
    /// Loop with a receive deadline; if it elapses with no message, the
    /// timeout handler fires.
    TimeoutAfter(S, Duration),
    /// Release spare loop-held memory and sleep at least the given duration;
    /// resume on the next iteration. A zero duration is `Continue`.
    Hibernate(S, Duration),
    /// Run the shutdown handler, then terminate with the reason.
    Stop(S, ExitReason),
}

impl<S> ProcessAction<S> {
    /// Stop with `ExitReason::Normal`
    pub fn stop_normal(state: S) -> Self {
        Self::Stop(state, ExitReason::Normal)
    }
}

/// What a call handler tells the loop
#[derive(Debug)]
pub enum ProcessReply<S, R> {
    /// Send the value to the caller and continue.
    Reply(R, S),
    /// Do not reply now; the handler has taken responsibility for replying
    /// later through a kept [`CallRef`].
    NoReply(S),
    /// Send the value, then stop with the reason.
    StopReply(R, S, ExitReason),
}

/// Outcome of a process's init function
#[derive(Debug)]
pub enum InitResult<S> {
    /// Enter the loop with this state and an optional initial deadline.
    Ok(S, Option<Duration>),
    /// Do not enter the loop; terminate with `Other(reason)`.
    Stop(String),
    /// Do not enter the loop; terminate silently with `Normal`.
    Ignore,
}

/// Rule applied when no handler matches a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnhandledPolicy {
    /// Stop with `Other("unhandled")`.
    #[default]
    Terminate,
    /// Discard the message and continue.
    Drop,
    /// Forward the opaque envelope to the given address and continue.
    DeadLetter(Pid),
}

// =============================================================================
// Reply obligation
// =============================================================================

/// Handle for replying to one call
///
/// Owns the reply sink; replying consumes the handle, so a token is answered
/// at most once. A `CallRef` dropped without replying (and without
/// [`forget`](Self::forget)) logs a warning: the caller is left waiting and
/// will only recover through its own timeout.
pub struct CallRef {
    caller: Pid,
    sink: Option<ReplySink>,
    node: Node,
}

impl CallRef {
    pub(crate) fn new(caller: Pid, sink: ReplySink, node: Node) -> Self {
        Self {
            caller,
            sink: Some(sink),
            node,
        }
    }

    /// The calling process
    pub fn caller(&self) -> Pid {
        self.caller
    }

    /// Send the reply
    pub fn reply<R: Message>(mut self, value: R) -> Result<()> {
        let sink = self.sink.take().ok_or(Error::ReplyAlreadySent {
            caller: self.caller,
        })?;
        match sink {
            ReplySink::Mailbox { reply_to, token } => {
                self.node.send(reply_to, Envelope::reply(token, value))
            }
            ReplySink::Port { port, .. } => {
                port.try_send_boxed(Box::new(value), std::any::type_name::<R>())
            }
        }
    }

    /// Abandon the reply obligation explicitly
    ///
    /// The caller will time out; use this when a request is intentionally
    /// left unanswered.
    pub fn forget(mut self) {
        self.sink = None;
    }
}

impl Drop for CallRef {
    fn drop(&mut self) {
        if self.sink.is_some() {
            warn!(caller = %self.caller, "call dropped without a reply");
        }
    }
}

impl fmt::Debug for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRef")
            .field("caller", &self.caller)
            .field("pending", &self.sink.is_some())
            .finish()
    }
}

/// Reply to a kept call
///
/// The deferred-reply primitive: a handler that returned
/// [`ProcessReply::NoReply`] after stashing its [`CallRef`] answers the
/// caller with this.
pub fn reply_to<R: Message>(call: CallRef, value: R) -> Result<()> {
    call.reply(value)
}
