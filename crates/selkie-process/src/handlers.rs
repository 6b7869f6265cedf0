//! Handler descriptors and envelope dispatch
//!
//! Handlers are stored existentially: each is a closure that inspects an
//! opaque envelope, projects it to its payload type, checks its guard, and
//! either handles the message or hands state and envelope back untouched so
//! the next handler in insertion order can try.

use crate::action::{ProcessAction, UnhandledPolicy};
use crate::definition::ProcessDefinition;
use selkie_core::envelope::{Envelope, TagKind};
use selkie_core::exit::ExitReason;
use selkie_core::node::Node;
use selkie_core::pid::Pid;
use tracing::{debug, trace, warn};

/// What one handler did with an envelope
pub(crate) enum HandlerOutcome<S> {
    /// The handler matched and ran.
    Handled(ProcessAction<S>),
    /// Not this handler's message; state and envelope returned intact.
    Skip(S, Envelope),
}

pub(crate) type HandlerFn<S> = Box<dyn FnMut(S, Envelope, &Node, Pid) -> HandlerOutcome<S> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandlerKind {
    Call,
    Cast,
    Info,
    Exit,
}

pub(crate) struct Handler<S> {
    pub(crate) kind: HandlerKind,
    pub(crate) payload_type: &'static str,
    pub(crate) f: HandlerFn<S>,
}

/// Result of dispatching one envelope
pub(crate) enum Dispatched<S> {
    /// Apply this action; `Stop` runs the shutdown handler.
    Action(ProcessAction<S>),
    /// Terminate with this reason WITHOUT running the shutdown handler
    /// (unrecognised exit signals re-raise fatally).
    Fatal(ExitReason),
}

/// Route an envelope through the definition's handler chains
///
/// Ordering across kinds is fixed: the control lane is consumed before this
/// function is reached, calls and casts share the api chain in insertion
/// order, exit signals go through the exit machinery, and everything else is
/// info-class.
pub(crate) fn dispatch_envelope<S>(
    definition: &mut ProcessDefinition<S>,
    node: &Node,
    self_pid: Pid,
    state: S,
    envelope: Envelope,
) -> Dispatched<S> {
    match envelope.kind() {
        TagKind::Call | TagKind::Cast => run_chain(
            &mut definition.api_handlers,
            definition.unhandled_policy,
            node,
            self_pid,
            state,
            envelope,
        ),
        TagKind::Exit => dispatch_exit(definition, node, self_pid, state, envelope),
        TagKind::Info | TagKind::Reply => run_chain(
            &mut definition.info_handlers,
            definition.unhandled_policy,
            node,
            self_pid,
            state,
            envelope,
        ),
    }
}

fn run_chain<S>(
    handlers: &mut [Handler<S>],
    policy: UnhandledPolicy,
    node: &Node,
    self_pid: Pid,
    state: S,
    envelope: Envelope,
) -> Dispatched<S> {
    let mut state = state;
    let mut envelope = envelope;
    for handler in handlers.iter_mut() {
        match (handler.f)(state, envelope, node, self_pid) {
            HandlerOutcome::Handled(action) => {
                trace!(
                    kind = ?handler.kind,
                    payload_type = handler.payload_type,
                    "handler matched"
                );
                return Dispatched::Action(action);
            }
            HandlerOutcome::Skip(s, e) => {
                state = s;
                envelope = e;
            }
        }
    }
    apply_unhandled(policy, node, self_pid, state, envelope)
}

fn dispatch_exit<S>(
    definition: &mut ProcessDefinition<S>,
    node: &Node,
    self_pid: Pid,
    state: S,
    envelope: Envelope,
) -> Dispatched<S> {
    // A reason that decodes as ExitReason takes the shutdown path directly;
    // exit handlers only see user-defined payloads.
    let envelope = match envelope.into_exit::<ExitReason>() {
        Ok((from, reason)) => {
            debug!(from = %from, reason = %reason, "structured exit");
            return Dispatched::Action(ProcessAction::Stop(state, reason));
        }
        Err(envelope) => envelope,
    };

    let mut state = state;
    let mut envelope = envelope;
    for handler in definition.exit_handlers.iter_mut() {
        match (handler.f)(state, envelope, node, self_pid) {
            HandlerOutcome::Handled(action) => {
                trace!(payload_type = handler.payload_type, "exit handler matched");
                return Dispatched::Action(action);
            }
            HandlerOutcome::Skip(s, e) => {
                state = s;
                envelope = e;
            }
        }
    }

    let payload_type = envelope.payload_type();
    warn!(payload_type, "unhandled exit signal; re-raising");
    Dispatched::Fatal(ExitReason::other(format!("unhandled exit: {payload_type}")))
}

fn apply_unhandled<S>(
    policy: UnhandledPolicy,
    node: &Node,
    self_pid: Pid,
    state: S,
    envelope: Envelope,
) -> Dispatched<S> {
    match policy {
        UnhandledPolicy::Terminate => {
            warn!(
                pid = %self_pid,
                payload_type = envelope.payload_type(),
                "no handler matched; terminating"
            );
            Dispatched::Action(ProcessAction::Stop(state, ExitReason::other("unhandled")))
        }
        UnhandledPolicy::Drop => {
            debug!(
                pid = %self_pid,
                payload_type = envelope.payload_type(),
                "no handler matched; dropped"
            );
            Dispatched::Action(ProcessAction::Continue(state))
        }
        UnhandledPolicy::DeadLetter(addr) => {
            if let Err(e) = node.send(addr, envelope) {
                debug!(dead_letter = %addr, error = %e, "dead letter delivery failed");
            }
            Dispatched::Action(ProcessAction::Continue(state))
        }
    }
}
