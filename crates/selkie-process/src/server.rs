//! The managed-process receive loop
//!
//! One cooperative task per process: consume one envelope per iteration,
//! dispatch it through the handler registry, apply the returned action.
//! Handler evaluation is strictly sequential; nothing else reads the
//! mailbox.

use crate::action::{InitResult, ProcessAction};
use crate::definition::ProcessDefinition;
use crate::handlers::{dispatch_envelope, Dispatched};
use futures::FutureExt;
use selkie_core::envelope::Envelope;
use selkie_core::error::{Error, Result};
use selkie_core::exit::ExitReason;
use selkie_core::mailbox::{Mailbox, MatchFn, Recv};
use selkie_core::node::Node;
use selkie_core::pid::Pid;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, debug_span, error, info, Instrument};

/// What one receive step produced
pub(crate) enum Received {
    Message(Envelope),
    TimedOut(Duration),
    Closed,
}

/// Receive the next envelope, honouring the current deadline
///
/// A zero deadline is a single non-blocking poll: the mailbox is checked
/// once before the timeout handler may fire.
pub(crate) async fn recv_next(mailbox: &mut Mailbox, deadline: Option<Duration>) -> Received {
    let accept_all: &MatchFn = &|_| true;
    match mailbox.receive_wait(&[accept_all], deadline).await {
        Recv::Message(_, envelope) => Received::Message(envelope),
        Recv::TimedOut => Received::TimedOut(deadline.unwrap_or_default()),
        Recv::Closed => Received::Closed,
    }
}

/// Loop continuation after applying an action
pub(crate) enum Flow<S> {
    /// Keep looping with this state and deadline.
    Next(S, Option<Duration>),
    /// The loop is done.
    Stopped(ExitReason),
}

/// Apply a dispatch result to the loop
///
/// `Stop` runs the shutdown handler exactly once; `Fatal` terminates
/// without it. `Hibernate` releases spare mailbox memory and sleeps through
/// the definition's time provider; a zero hibernate is `Continue`.
pub(crate) async fn apply<S>(
    dispatched: Dispatched<S>,
    definition: &mut ProcessDefinition<S>,
    mailbox: &mut Mailbox,
    pid: Pid,
) -> Flow<S> {
    let action = match dispatched {
        Dispatched::Action(action) => action,
        Dispatched::Fatal(reason) => return Flow::Stopped(reason),
    };
    match action {
        ProcessAction::Continue(state) => Flow::Next(state, None),
        ProcessAction::TimeoutAfter(state, deadline) => Flow::Next(state, Some(deadline)),
        ProcessAction::Hibernate(state, duration) => {
            if duration.is_zero() {
                return Flow::Next(state, None);
            }
            mailbox.shrink();
            debug!(pid = %pid, sleep_ms = duration.as_millis() as u64, "hibernating");
            definition.time.sleep_ms(duration.as_millis() as u64).await;
            Flow::Next(state, None)
        }
        ProcessAction::Stop(state, reason) => {
            (definition.shutdown_handler)(state, reason.clone());
            Flow::Stopped(reason)
        }
    }
}

/// Run the non-prioritised receive loop to completion
pub(crate) async fn run_loop<S, I>(
    mut definition: ProcessDefinition<S>,
    node: Node,
    pid: Pid,
    mut mailbox: Mailbox,
    init: I,
) -> ExitReason
where
    S: Send + 'static,
    I: FnOnce() -> InitResult<S>,
{
    let (mut state, mut deadline) = match init() {
        InitResult::Ok(state, deadline) => (state, deadline),
        InitResult::Stop(reason) => {
            debug!(pid = %pid, reason, "init refused");
            return ExitReason::other(reason);
        }
        InitResult::Ignore => return ExitReason::Normal,
    };
    info!(pid = %pid, "process started");

    loop {
        let received = recv_next(&mut mailbox, deadline).await;
        let dispatched = match received {
            Received::Message(envelope) => {
                dispatch_envelope(&mut definition, &node, pid, state, envelope)
            }
            Received::TimedOut(elapsed) => {
                Dispatched::Action((definition.timeout_handler)(state, elapsed))
            }
            Received::Closed => Dispatched::Action(ProcessAction::stop_normal(state)),
        };
        match apply(dispatched, &mut definition, &mut mailbox, pid).await {
            Flow::Next(next_state, next_deadline) => {
                state = next_state;
                deadline = next_deadline;
            }
            Flow::Stopped(reason) => {
                info!(pid = %pid, reason = %reason, "process stopped");
                return reason;
            }
        }
    }
}

/// Spawn a managed process
///
/// Runs `init` inside the new task; `InitResult::Stop` reports
/// `Other(reason)` without entering the loop, `InitResult::Ignore`
/// terminates silently. Must be called from within a tokio runtime.
pub fn spawn<S, I>(node: &Node, definition: ProcessDefinition<S>, init: I) -> Result<ProcessHandle>
where
    S: Send + 'static,
    I: FnOnce() -> InitResult<S> + Send + 'static,
{
    let (pid, mailbox) = node.register(definition.mailbox_capacity)?;
    let loop_future = run_loop(definition, node.clone(), pid, mailbox, init);
    Ok(launch(node.clone(), pid, loop_future))
}

/// Wrap a loop future in panic containment and termination broadcast
///
/// An unwinding handler is unstructured termination: the shutdown handler
/// does NOT run, but links and monitors are still notified.
pub(crate) fn launch(
    node: Node,
    pid: Pid,
    loop_future: impl Future<Output = ExitReason> + Send + 'static,
) -> ProcessHandle {
    let (done_tx, done_rx) = oneshot::channel();
    let task_node = node.clone();
    let task = async move {
        let reason = match AssertUnwindSafe(loop_future).catch_unwind().await {
            Ok(reason) => reason,
            Err(_payload) => {
                error!(pid = %pid, "process panicked");
                ExitReason::other("panic")
            }
        };
        task_node.finish(pid, &reason);
        let _ = done_tx.send(reason);
    };
    tokio::spawn(task.instrument(debug_span!("process", pid = %pid)));

    ProcessHandle {
        pid,
        node,
        done: done_rx,
    }
}

/// Handle to a spawned managed process
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    node: Node,
    done: oneshot::Receiver<ExitReason>,
}

impl ProcessHandle {
    /// The process's pid
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Check whether the process is still registered
    pub fn is_alive(&self) -> bool {
        self.node.is_registered(self.pid)
    }

    /// Request a graceful stop by sending a `Shutdown` exit signal
    pub fn stop(&self) -> Result<()> {
        self.node.exit(self.pid, self.pid, ExitReason::Shutdown)
    }

    /// Wait for termination and return the exit reason
    pub async fn join(self) -> Result<ExitReason> {
        self.done
            .await
            .map_err(|_| Error::internal("process task dropped before reporting an exit reason"))
    }
}
