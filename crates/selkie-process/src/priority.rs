//! Prioritised receive loop
//!
//! Replaces the single blocking receive with a drain-then-dispatch cycle:
//! the mailbox is drained (bounded by the recv-timeout policy) into an
//! internal strict-priority queue, then the head of the highest non-empty
//! bucket is dispatched through the ordinary handler chain. FIFO holds
//! within a bucket; a lower-priority message is never dispatched while a
//! higher-priority one is queued.

use crate::action::{InitResult, ProcessAction};
use crate::definition::ProcessDefinition;
use crate::handlers::{dispatch_envelope, Dispatched};
use crate::server::{apply, launch, recv_next, Flow, ProcessHandle, Received};
use selkie_core::constants::{
    DRAIN_BUDGET_MS_MAX, DRAIN_MESSAGES_COUNT_DEFAULT, DRAIN_MESSAGES_COUNT_MAX,
    PRIORITY_LEVEL_MAX, PRIORITY_RULES_COUNT_MAX,
};
use selkie_core::envelope::{Envelope, Message};
use selkie_core::error::{Error, Result};
use selkie_core::exit::ExitReason;
use selkie_core::io::TimeProvider;
use selkie_core::mailbox::Mailbox;
use selkie_core::node::Node;
use selkie_core::pid::Pid;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Bound on how much one drain step may move before dispatch resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutPolicy {
    /// Move at most this many messages per drain step.
    Counter(u32),
    /// Spend at most this much wall time per drain step.
    Timer(Duration),
}

impl Default for RecvTimeoutPolicy {
    fn default() -> Self {
        Self::Counter(DRAIN_MESSAGES_COUNT_DEFAULT)
    }
}

pub(crate) struct PriorityRule {
    /// Level declared at registration; `None` for raw-inspection rules,
    /// whose output is clamped at classification time instead.
    pub(crate) level: Option<u8>,
    pub(crate) f: Box<dyn Fn(&Envelope) -> Option<u8> + Send>,
}

/// A process definition with priority-driven mailbox draining
///
/// Wraps a [`ProcessDefinition`]: dispatch semantics are unchanged, only
/// the order messages reach the handlers differs.
pub struct PrioritisedProcessDefinition<S> {
    pub(crate) definition: ProcessDefinition<S>,
    pub(crate) rules: Vec<PriorityRule>,
    pub(crate) policy: RecvTimeoutPolicy,
}

impl<S: Send + 'static> PrioritisedProcessDefinition<S> {
    /// Wrap a definition with an empty rule list and the default policy
    pub fn new(definition: ProcessDefinition<S>) -> Self {
        Self {
            definition,
            rules: Vec::new(),
            policy: RecvTimeoutPolicy::default(),
        }
    }

    /// Assign a priority level to every message of type `M`
    ///
    /// Rules are tried in registration order; the first match assigns the
    /// level, and messages no rule matches run at priority 0. Levels are
    /// bounded by `PRIORITY_LEVEL_MAX`, checked at spawn.
    pub fn prioritise<M: Message>(self, level: u8) -> Self {
        self.prioritise_when::<M, _>(level, |_| true)
    }

    /// Assign a priority level to messages of type `M` passing a predicate
    pub fn prioritise_when<M, P>(mut self, level: u8, predicate: P) -> Self
    where
        M: Message,
        P: Fn(&M) -> bool + Send + 'static,
    {
        self.rules.push(PriorityRule {
            level: Some(level),
            f: Box::new(move |envelope| match envelope.payload_ref::<M>() {
                Some(msg) if predicate(msg) => Some(level),
                _ => None,
            }),
        });
        self
    }

    /// Assign priorities from a raw envelope inspection
    ///
    /// Levels the closure produces are clamped to `PRIORITY_LEVEL_MAX`.
    pub fn prioritise_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Envelope) -> Option<u8> + Send + 'static,
    {
        self.rules.push(PriorityRule {
            level: None,
            f: Box::new(f),
        });
        self
    }

    /// Set the drain budget
    pub fn recv_timeout_policy(mut self, policy: RecvTimeoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.rules.len() > PRIORITY_RULES_COUNT_MAX {
            return Err(Error::invalid_configuration(
                "priorities",
                format!(
                    "{} rules exceed limit {PRIORITY_RULES_COUNT_MAX}",
                    self.rules.len()
                ),
            ));
        }
        for rule in &self.rules {
            if let Some(level) = rule.level {
                if level > PRIORITY_LEVEL_MAX {
                    return Err(Error::invalid_configuration(
                        "priorities",
                        format!("level {level} exceeds limit {PRIORITY_LEVEL_MAX}"),
                    ));
                }
            }
        }
        match self.policy {
            RecvTimeoutPolicy::Counter(0) => Err(Error::invalid_configuration(
                "recv_timeout_policy",
                "counter budget must be positive",
            )),
            RecvTimeoutPolicy::Counter(n) if n > DRAIN_MESSAGES_COUNT_MAX => {
                Err(Error::invalid_configuration(
                    "recv_timeout_policy",
                    format!("counter budget {n} exceeds limit {DRAIN_MESSAGES_COUNT_MAX}"),
                ))
            }
            RecvTimeoutPolicy::Timer(d) if d.as_millis() as u64 > DRAIN_BUDGET_MS_MAX => {
                Err(Error::invalid_configuration(
                    "recv_timeout_policy",
                    format!(
                        "timer budget {} ms exceeds limit {DRAIN_BUDGET_MS_MAX} ms",
                        d.as_millis()
                    ),
                ))
            }
            _ => Ok(()),
        }
    }
}

impl<S> std::fmt::Debug for PrioritisedProcessDefinition<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrioritisedProcessDefinition")
            .field("rules", &self.rules.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Internal priority queue
// =============================================================================

/// Strict-priority buckets, FIFO within each level
#[derive(Default)]
pub(crate) struct PriorityBuckets {
    buckets: BTreeMap<u8, VecDeque<Envelope>>,
    len: usize,
}

impl PriorityBuckets {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn push(&mut self, level: u8, envelope: Envelope) {
        self.buckets.entry(level).or_default().push_back(envelope);
        self.len += 1;
    }

    /// Dequeue the head of the highest non-empty bucket
    pub(crate) fn pop_highest(&mut self) -> Option<Envelope> {
        let (&level, _) = self.buckets.iter().next_back()?;
        let queue = self.buckets.get_mut(&level)?;
        let envelope = queue.pop_front();
        if queue.is_empty() {
            self.buckets.remove(&level);
        }
        if envelope.is_some() {
            self.len -= 1;
        }
        envelope
    }
}

fn classify(rules: &[PriorityRule], envelope: &Envelope) -> u8 {
    for rule in rules {
        if let Some(level) = (rule.f)(envelope) {
            // Declared levels are validated at spawn; raw-inspection rules
            // are clamped here.
            return level.min(PRIORITY_LEVEL_MAX);
        }
    }
    0
}

/// One bounded drain step: mailbox → priority queue
///
/// Ends when the mailbox is empty or the policy budget is exhausted.
fn drain_step(
    mailbox: &mut Mailbox,
    queue: &mut PriorityBuckets,
    rules: &[PriorityRule],
    policy: RecvTimeoutPolicy,
    time: &dyn TimeProvider,
) {
    let started_ms = time.monotonic_ms();
    let mut moved: u32 = 0;

    loop {
        match policy {
            RecvTimeoutPolicy::Counter(budget) if moved >= budget => break,
            RecvTimeoutPolicy::Timer(budget) => {
                let elapsed = time.monotonic_ms().saturating_sub(started_ms);
                if elapsed >= budget.as_millis() as u64 {
                    break;
                }
            }
            _ => {}
        }
        let Some(envelope) = mailbox.try_next() else {
            break;
        };
        let level = classify(rules, &envelope);
        trace!(level, payload_type = envelope.payload_type(), "drained");
        queue.push(level, envelope);
        moved += 1;
    }

    if moved > 0 {
        debug!(moved, queued = queue.len(), "drain step complete");
    }
}

/// Run the prioritised receive loop to completion
pub(crate) async fn run_prioritised_loop<S, I>(
    mut prioritised: PrioritisedProcessDefinition<S>,
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
    info!(pid = %pid, "prioritised process started");

    let mut queue = PriorityBuckets::new();
    let time = prioritised.definition.time.clone();

    loop {
        // Block only when there is nothing to dispatch anywhere; the
        // first arrival is classified like any other.
        if queue.is_empty() {
            match recv_next(&mut mailbox, deadline).await {
                Received::Message(envelope) => {
                    let level = classify(&prioritised.rules, &envelope);
                    queue.push(level, envelope);
                }
                Received::TimedOut(elapsed) => {
                    let action = (prioritised.definition.timeout_handler)(state, elapsed);
                    match apply(
                        Dispatched::Action(action),
                        &mut prioritised.definition,
                        &mut mailbox,
                        pid,
                    )
                    .await
                    {
                        Flow::Next(next_state, next_deadline) => {
                            state = next_state;
                            deadline = next_deadline;
                            continue;
                        }
                        Flow::Stopped(reason) => {
                            info!(pid = %pid, reason = %reason, "process stopped");
                            return reason;
                        }
                    }
                }
                Received::Closed => {
                    let action = ProcessAction::stop_normal(state);
                    match apply(
                        Dispatched::Action(action),
                        &mut prioritised.definition,
                        &mut mailbox,
                        pid,
                    )
                    .await
                    {
                        Flow::Next(next_state, next_deadline) => {
                            state = next_state;
                            deadline = next_deadline;
                            continue;
                        }
                        Flow::Stopped(reason) => return reason,
                    }
                }
            }
        }

        // At most one drain step between consecutive dispatches.
        drain_step(
            &mut mailbox,
            &mut queue,
            &prioritised.rules,
            prioritised.policy,
            time.as_ref(),
        );

        let Some(envelope) = queue.pop_highest() else {
            continue;
        };
        let dispatched =
            dispatch_envelope(&mut prioritised.definition, &node, pid, state, envelope);
        match apply(dispatched, &mut prioritised.definition, &mut mailbox, pid).await {
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

/// Spawn a prioritised managed process
pub fn spawn_prioritised<S, I>(
    node: &Node,
    prioritised: PrioritisedProcessDefinition<S>,
    init: I,
) -> Result<ProcessHandle>
where
    S: Send + 'static,
    I: FnOnce() -> InitResult<S> + Send + 'static,
{
    prioritised.validate()?;
    let (pid, mailbox) = node.register(prioritised.definition.mailbox_capacity)?;
    let loop_future = run_prioritised_loop(prioritised, node.clone(), pid, mailbox, init);
    Ok(launch(node.clone(), pid, loop_future))
}
