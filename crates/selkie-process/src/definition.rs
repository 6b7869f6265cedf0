//! Process definitions
//!
//! A `ProcessDefinition` collects the typed dispatchers a managed process
//! runs: call/cast handlers (one interleaved, insertion-ordered chain),
//! info handlers for non-protocol traffic, exit handlers keyed by payload
//! type, plus the timeout handler, the shutdown handler, and the
//! unhandled-message policy.

use crate::action::{CallRef, ProcessAction, ProcessReply, UnhandledPolicy};
use crate::handlers::{Handler, HandlerKind, HandlerOutcome};
use selkie_core::constants::MAILBOX_DEPTH_DEFAULT;
use selkie_core::envelope::{Envelope, Message};
use selkie_core::exit::ExitReason;
use selkie_core::io::{TimeProvider, WallClockTime};
use selkie_core::node::Node;
use selkie_core::pid::Pid;
use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Definition of a managed process over state `S`
///
/// Built with the `handle_*` registration methods; insertion order is
/// preserved and determines dispatch preference among equally-matching
/// handlers.
pub struct ProcessDefinition<S> {
    pub(crate) api_handlers: Vec<Handler<S>>,
    pub(crate) info_handlers: Vec<Handler<S>>,
    pub(crate) exit_handlers: Vec<Handler<S>>,
    pub(crate) timeout_handler: Box<dyn FnMut(S, Duration) -> ProcessAction<S> + Send>,
    pub(crate) shutdown_handler: Box<dyn FnMut(S, ExitReason) + Send>,
    pub(crate) unhandled_policy: UnhandledPolicy,
    pub(crate) mailbox_capacity: usize,
    pub(crate) time: Arc<dyn TimeProvider>,
}

impl<S: Send + 'static> ProcessDefinition<S> {
    /// Create an empty definition with defaults
    ///
    /// Defaults: terminate on unhandled messages, continue on timeout, no-op
    /// shutdown handler, default mailbox depth, wall-clock time.
    pub fn new() -> Self {
        Self {
            api_handlers: Vec::new(),
            info_handlers: Vec::new(),
            exit_handlers: Vec::new(),
            timeout_handler: Box::new(|state, elapsed| {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "timeout ignored");
                ProcessAction::Continue(state)
            }),
            shutdown_handler: Box::new(|_state, _reason| {}),
            unhandled_policy: UnhandledPolicy::Terminate,
            mailbox_capacity: MAILBOX_DEPTH_DEFAULT,
            time: Arc::new(WallClockTime::new()),
        }
    }

    /// Set the mailbox capacity
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Set the unhandled-message policy
    pub fn unhandled(mut self, policy: UnhandledPolicy) -> Self {
        self.unhandled_policy = policy;
        self
    }

    /// Inject a time provider (hibernate sleeps and drain budgets)
    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Set the timeout handler, fired when a receive deadline elapses
    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: FnMut(S, Duration) -> ProcessAction<S> + Send + 'static,
    {
        self.timeout_handler = Box::new(f);
        self
    }

    /// Set the shutdown handler
    ///
    /// Runs exactly once on every termination via a `Stop` action or a
    /// recognised structured exit signal. It must not panic.
    pub fn on_shutdown<F>(mut self, f: F) -> Self
    where
        F: FnMut(S, ExitReason) + Send + 'static,
    {
        self.shutdown_handler = Box::new(f);
        self
    }

    // =========================================================================
    // Call handlers
    // =========================================================================

    /// Register a call handler for requests of type `Req`
    pub fn handle_call<Req, Rep, F>(self, f: F) -> Self
    where
        Req: Message,
        Rep: Message,
        F: FnMut(S, Req) -> ProcessReply<S, Rep> + Send + 'static,
    {
        self.handle_call_when(|_: &S, _: &Req, _: Pid| true, f)
    }

    /// Register a guarded call handler
    ///
    /// The handler matches only when the payload projects to `Req` AND the
    /// guard holds for `(state, request, caller)`.
    pub fn handle_call_when<Req, Rep, G, F>(mut self, guard: G, mut f: F) -> Self
    where
        Req: Message,
        Rep: Message,
        G: Fn(&S, &Req, Pid) -> bool + Send + 'static,
        F: FnMut(S, Req) -> ProcessReply<S, Rep> + Send + 'static,
    {
        let body = move |state: S, envelope: Envelope, node: &Node, _self_pid: Pid| {
            if !call_matches::<S, Req, G>(&state, &envelope, &guard) {
                return HandlerOutcome::Skip(state, envelope);
            }
            match envelope.into_call::<Req>() {
                Err(envelope) => HandlerOutcome::Skip(state, envelope),
                Ok((from, sink, request)) => {
                    let call_ref = CallRef::new(from, sink, node.clone());
                    match f(state, request) {
                        ProcessReply::Reply(value, state) => {
                            deliver_reply(call_ref, value);
                            HandlerOutcome::Handled(ProcessAction::Continue(state))
                        }
                        ProcessReply::NoReply(state) => {
                            // This registration form cannot reply later; the
                            // CallRef drop will warn. Use handle_call_from for
                            // deferred replies.
                            drop(call_ref);
                            HandlerOutcome::Handled(ProcessAction::Continue(state))
                        }
                        ProcessReply::StopReply(value, state, reason) => {
                            deliver_reply(call_ref, value);
                            HandlerOutcome::Handled(ProcessAction::Stop(state, reason))
                        }
                    }
                }
            }
        };
        self.api_handlers.push(Handler {
            kind: HandlerKind::Call,
            payload_type: type_name::<Req>(),
            f: Box::new(body),
        });
        self
    }

    /// Register a call handler that owns its reply obligation
    ///
    /// The handler receives the [`CallRef`] and replies itself, immediately
    /// or later via [`reply_to`](crate::action::reply_to) after stashing the
    /// ref in its state.
    pub fn handle_call_from<Req, F>(mut self, mut f: F) -> Self
    where
        Req: Message,
        F: FnMut(S, CallRef, Req) -> ProcessAction<S> + Send + 'static,
    {
        let body = move |state: S, envelope: Envelope, node: &Node, _self_pid: Pid| {
            if !envelope.is_call() || !envelope.payload_is::<Req>() {
                return HandlerOutcome::Skip(state, envelope);
            }
            match envelope.into_call::<Req>() {
                Err(envelope) => HandlerOutcome::Skip(state, envelope),
                Ok((from, sink, request)) => {
                    let call_ref = CallRef::new(from, sink, node.clone());
                    HandlerOutcome::Handled(f(state, call_ref, request))
                }
            }
        };
        self.api_handlers.push(Handler {
            kind: HandlerKind::Call,
            payload_type: type_name::<Req>(),
            f: Box::new(body),
        });
        self
    }

    // =========================================================================
    // Cast handlers
    // =========================================================================

    /// Register a cast handler for messages of type `M`
    pub fn handle_cast<M, F>(self, f: F) -> Self
    where
        M: Message,
        F: FnMut(S, M) -> ProcessAction<S> + Send + 'static,
    {
        self.handle_cast_when(|_: &S, _: &M| true, f)
    }

    /// Register a guarded cast handler
    pub fn handle_cast_when<M, G, F>(mut self, guard: G, mut f: F) -> Self
    where
        M: Message,
        G: Fn(&S, &M) -> bool + Send + 'static,
        F: FnMut(S, M) -> ProcessAction<S> + Send + 'static,
    {
        let body = move |state: S, envelope: Envelope, _node: &Node, _self_pid: Pid| {
            if !envelope.is_cast() || !payload_passes::<S, M, G>(&state, &envelope, &guard) {
                return HandlerOutcome::Skip(state, envelope);
            }
            match envelope.into_payload::<M>() {
                Err(envelope) => HandlerOutcome::Skip(state, envelope),
                Ok(msg) => HandlerOutcome::Handled(f(state, msg)),
            }
        };
        self.api_handlers.push(Handler {
            kind: HandlerKind::Cast,
            payload_type: type_name::<M>(),
            f: Box::new(body),
        });
        self
    }

    // =========================================================================
    // Info handlers
    // =========================================================================

    /// Register an info handler for non-protocol messages of type `M`
    pub fn handle_info<M, F>(self, f: F) -> Self
    where
        M: Message,
        F: FnMut(S, M) -> ProcessAction<S> + Send + 'static,
    {
        self.handle_info_when(|_: &S, _: &M| true, f)
    }

    /// Register a guarded info handler
    pub fn handle_info_when<M, G, F>(mut self, guard: G, mut f: F) -> Self
    where
        M: Message,
        G: Fn(&S, &M) -> bool + Send + 'static,
        F: FnMut(S, M) -> ProcessAction<S> + Send + 'static,
    {
        let body = move |state: S, envelope: Envelope, _node: &Node, _self_pid: Pid| {
            if !envelope.is_info_class() || !payload_passes::<S, M, G>(&state, &envelope, &guard) {
                return HandlerOutcome::Skip(state, envelope);
            }
            match envelope.into_payload::<M>() {
                Err(envelope) => HandlerOutcome::Skip(state, envelope),
                Ok(msg) => HandlerOutcome::Handled(f(state, msg)),
            }
        };
        self.info_handlers.push(Handler {
            kind: HandlerKind::Info,
            payload_type: type_name::<M>(),
            f: Box::new(body),
        });
        self
    }

    // =========================================================================
    // Exit handlers
    // =========================================================================

    /// Register an exit handler for exit payloads of type `P`
    ///
    /// Exit signals whose payload decodes as [`ExitReason`] never reach
    /// these handlers; they take the shutdown path directly.
    pub fn handle_exit<P, F>(self, f: F) -> Self
    where
        P: Message,
        F: FnMut(S, Pid, P) -> ProcessAction<S> + Send + 'static,
    {
        self.handle_exit_when(|_: &S, _: &P| true, f)
    }

    /// Register a guarded exit handler
    pub fn handle_exit_when<P, G, F>(mut self, guard: G, mut f: F) -> Self
    where
        P: Message,
        G: Fn(&S, &P) -> bool + Send + 'static,
        F: FnMut(S, Pid, P) -> ProcessAction<S> + Send + 'static,
    {
        let body = move |state: S, envelope: Envelope, _node: &Node, _self_pid: Pid| {
            if !envelope.is_exit() || !payload_passes::<S, P, G>(&state, &envelope, &guard) {
                return HandlerOutcome::Skip(state, envelope);
            }
            match envelope.into_exit::<P>() {
                Err(envelope) => HandlerOutcome::Skip(state, envelope),
                Ok((from, payload)) => HandlerOutcome::Handled(f(state, from, payload)),
            }
        };
        self.exit_handlers.push(Handler {
            kind: HandlerKind::Exit,
            payload_type: type_name::<P>(),
            f: Box::new(body),
        });
        self
    }
}

impl<S: Send + 'static> Default for ProcessDefinition<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for ProcessDefinition<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessDefinition")
            .field("api_handlers", &self.api_handlers.len())
            .field("info_handlers", &self.info_handlers.len())
            .field("exit_handlers", &self.exit_handlers.len())
            .field("unhandled_policy", &self.unhandled_policy)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .finish_non_exhaustive()
    }
}

fn call_matches<S, Req, G>(state: &S, envelope: &Envelope, guard: &G) -> bool
where
    Req: Message,
    G: Fn(&S, &Req, Pid) -> bool,
{
    if !envelope.is_call() {
        return false;
    }
    let (Some(request), Some(caller)) = (envelope.payload_ref::<Req>(), envelope.sender()) else {
        return false;
    };
    guard(state, request, caller)
}

fn payload_passes<S, M, G>(state: &S, envelope: &Envelope, guard: &G) -> bool
where
    M: Message,
    G: Fn(&S, &M) -> bool,
{
    match envelope.payload_ref::<M>() {
        Some(msg) => guard(state, msg),
        None => false,
    }
}

fn deliver_reply<R: Message>(call_ref: CallRef, value: R) {
    let caller = call_ref.caller();
    if let Err(e) = call_ref.reply(value) {
        debug!(caller = %caller, error = %e, "reply delivery failed");
    }
}
