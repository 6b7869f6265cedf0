//! Control channels
//!
//! A typed side-band receive-port owned by the loop and polled at strictly
//! higher preference than the mailbox, giving the control plane precedence
//! over ordinary traffic. Control channels compose with the plain receive
//! loop only; a prioritised process cannot carry one (the two disciplines
//! are separate types, so the combination cannot be expressed).

use crate::action::{InitResult, ProcessAction};
use crate::definition::ProcessDefinition;
use crate::handlers::{dispatch_envelope, Dispatched};
use crate::server::{apply, launch, recv_next, Flow, ProcessHandle, Received};
use selkie_core::channel::{channel, ReceivePort, SendPort};
use selkie_core::constants::CONTROL_CHANNEL_DEPTH_DEFAULT;
use selkie_core::envelope::Message;
use selkie_core::error::Result;
use selkie_core::exit::ExitReason;
use selkie_core::mailbox::Mailbox;
use selkie_core::node::Node;
use selkie_core::pid::Pid;
use tracing::{debug, info};

/// Create a control channel with the default depth
///
/// The send half is clonable and shareable; the receive half is handed to
/// [`spawn_with_control`] and owned by the loop.
pub fn control_channel<B: Message>() -> (SendPort<B>, ReceivePort<B>) {
    channel(CONTROL_CHANNEL_DEPTH_DEFAULT)
}

/// What one control-loop receive step produced
enum ControlReceived<B> {
    Control(B),
    Mailbox(Received),
    ControlClosed,
}

async fn recv_control_or_mail<B: Message>(
    control: &mut ReceivePort<B>,
    control_open: bool,
    mailbox: &mut Mailbox,
    deadline: Option<std::time::Duration>,
) -> ControlReceived<B> {
    if !control_open {
        return ControlReceived::Mailbox(recv_next(mailbox, deadline).await);
    }
    tokio::select! {
        biased;
        maybe = control.recv() => match maybe {
            Some(msg) => ControlReceived::Control(msg),
            None => ControlReceived::ControlClosed,
        },
        received = recv_next(mailbox, deadline) => ControlReceived::Mailbox(received),
    }
}

async fn run_control_loop<S, B, H, I>(
    mut definition: ProcessDefinition<S>,
    mut control: ReceivePort<B>,
    mut control_handler: H,
    node: Node,
    pid: Pid,
    mut mailbox: Mailbox,
    init: I,
) -> ExitReason
where
    S: Send + 'static,
    B: Message,
    H: FnMut(S, B) -> ProcessAction<S> + Send + 'static,
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
    info!(pid = %pid, "control-channel process started");

    let mut control_open = true;

    loop {
        let received =
            recv_control_or_mail(&mut control, control_open, &mut mailbox, deadline).await;
        let dispatched = match received {
            ControlReceived::ControlClosed => {
                // Every send-port dropped: stop polling the lane and keep
                // serving the mailbox.
                debug!(pid = %pid, "control channel closed; continuing on mailbox only");
                control_open = false;
                continue;
            }
            ControlReceived::Control(msg) => Dispatched::Action(control_handler(state, msg)),
            ControlReceived::Mailbox(Received::Message(envelope)) => {
                dispatch_envelope(&mut definition, &node, pid, state, envelope)
            }
            ControlReceived::Mailbox(Received::TimedOut(elapsed)) => {
                Dispatched::Action((definition.timeout_handler)(state, elapsed))
            }
            ControlReceived::Mailbox(Received::Closed) => {
                Dispatched::Action(ProcessAction::stop_normal(state))
            }
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

/// Spawn a managed process with a control channel
///
/// `control_handler` runs for every control payload; everything else
/// behaves as in [`spawn`](crate::server::spawn).
pub fn spawn_with_control<S, B, H, I>(
    node: &Node,
    definition: ProcessDefinition<S>,
    control: ReceivePort<B>,
    control_handler: H,
    init: I,
) -> Result<ProcessHandle>
where
    S: Send + 'static,
    B: Message,
    H: FnMut(S, B) -> ProcessAction<S> + Send + 'static,
    I: FnOnce() -> InitResult<S> + Send + 'static,
{
    let (pid, mailbox) = node.register(definition.mailbox_capacity)?;
    let loop_future = run_control_loop(
        definition,
        control,
        control_handler,
        node.clone(),
        pid,
        mailbox,
        init,
    );
    Ok(launch(node.clone(), pid, loop_future))
}
