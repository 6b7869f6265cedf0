//! In-process messaging substrate
//!
//! TigerStyle: Explicit process table, no silent drops.
//!
//! The node allocates pids, owns the process table, and provides the
//! primitives the managed-process engine builds on: `send`, `link`,
//! `monitor`, and `exit`. It is strictly single-process: cluster membership,
//! discovery, and transports live elsewhere.

use crate::constants::MAILBOX_DEPTH_MAX;
use crate::envelope::{Envelope, Message};
use crate::error::{Error, Result};
use crate::exit::{Down, ExitReason};
use crate::mailbox::Mailbox;
use crate::pid::Pid;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

static NODE_ID_SEQ: AtomicU32 = AtomicU32::new(1);

struct ProcEntry {
    sender: mpsc::Sender<Envelope>,
    capacity: usize,
    links: HashSet<Pid>,
    monitors: Vec<Pid>,
}

struct NodeInner {
    node_id: u32,
    next_seq: AtomicU64,
    procs: Mutex<HashMap<Pid, ProcEntry>>,
}

/// Handle to the local node
///
/// Cheap to clone; all clones address the same process table.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a new node
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NodeInner {
                node_id: NODE_ID_SEQ.fetch_add(1, Ordering::Relaxed),
                next_seq: AtomicU64::new(1),
                procs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The node's id (embedded in every pid it allocates)
    pub fn id(&self) -> u32 {
        self.inner.node_id
    }

    /// Number of registered processes
    pub fn process_count(&self) -> usize {
        self.lock_procs().len()
    }

    /// Check whether a pid is currently registered
    pub fn is_registered(&self, pid: Pid) -> bool {
        self.lock_procs().contains_key(&pid)
    }

    /// Allocate a pid and its mailbox
    ///
    /// The returned mailbox is owned by the caller (normally a receive
    /// loop); the node keeps the send side for routing.
    pub fn register(&self, capacity: usize) -> Result<(Pid, Mailbox)> {
        if capacity == 0 || capacity > MAILBOX_DEPTH_MAX {
            return Err(Error::invalid_configuration(
                "mailbox_capacity",
                format!("{capacity} not in 1..={MAILBOX_DEPTH_MAX}"),
            ));
        }

        let pid = Pid::from_parts(
            self.inner.node_id,
            self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
        );
        let (tx, rx) = mpsc::channel(capacity);
        let entry = ProcEntry {
            sender: tx,
            capacity,
            links: HashSet::new(),
            monitors: Vec::new(),
        };

        let previous = self.lock_procs().insert(pid, entry);
        debug_assert!(previous.is_none(), "pid allocated twice");
        trace!(pid = %pid, capacity, "process registered");
        Ok((pid, Mailbox::new(rx, capacity)))
    }

    /// Deliver an envelope to a process's mailbox
    ///
    /// Asynchronous and non-blocking: a full mailbox is an explicit error,
    /// never a silent drop or a blocked sender.
    pub fn send(&self, target: Pid, envelope: Envelope) -> Result<()> {
        let (sender, capacity) = {
            let procs = self.lock_procs();
            let entry = procs
                .get(&target)
                .ok_or(Error::ProcessNotFound { pid: target })?;
            (entry.sender.clone(), entry.capacity)
        };

        sender.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::mailbox_full(target, capacity),
            mpsc::error::TrySendError::Closed(_) => Error::ProcessNotFound { pid: target },
        })
    }

    /// Send a plain (info-class) message
    pub fn send_info<M: Message>(&self, target: Pid, msg: M) -> Result<()> {
        self.send(target, Envelope::info(msg))
    }

    /// Send a cast
    pub fn cast<M: Message>(&self, target: Pid, msg: M) -> Result<()> {
        self.send(target, Envelope::cast(msg))
    }

    /// Link two processes
    ///
    /// Links are bidirectional: when either side terminates for a
    /// non-`Normal` reason, the other receives a structured exit signal.
    pub fn link(&self, a: Pid, b: Pid) -> Result<()> {
        let mut procs = self.lock_procs();
        if !procs.contains_key(&a) {
            return Err(Error::ProcessNotFound { pid: a });
        }
        if !procs.contains_key(&b) {
            return Err(Error::ProcessNotFound { pid: b });
        }
        if let Some(entry) = procs.get_mut(&a) {
            entry.links.insert(b);
        }
        if let Some(entry) = procs.get_mut(&b) {
            entry.links.insert(a);
        }
        Ok(())
    }

    /// Watch a process
    ///
    /// One-way: when `target` terminates for any reason, `watcher` receives
    /// a [`Down`] info message. Prefer monitors over links when the watcher
    /// must survive the target's failure.
    pub fn monitor(&self, watcher: Pid, target: Pid) -> Result<()> {
        let mut procs = self.lock_procs();
        if !procs.contains_key(&watcher) {
            return Err(Error::ProcessNotFound { pid: watcher });
        }
        let entry = procs
            .get_mut(&target)
            .ok_or(Error::ProcessNotFound { pid: target })?;
        entry.monitors.push(watcher);
        Ok(())
    }

    /// Deliver a structured exit signal
    ///
    /// The payload may be an [`ExitReason`] (recognised by the receiving
    /// loop's shutdown path) or any other typed value routed through the
    /// receiver's exit handlers. Exit signals never kill a task directly.
    pub fn exit<M: Message>(&self, from: Pid, target: Pid, payload: M) -> Result<()> {
        self.send(target, Envelope::exit(from, payload))
    }

    /// Deregister a terminated process and notify its links and monitors
    ///
    /// Linked processes receive an exit signal unless the reason is
    /// `Normal`; monitors always receive a [`Down`] message.
    pub fn finish(&self, pid: Pid, reason: &ExitReason) {
        let entry = match self.lock_procs().remove(&pid) {
            Some(entry) => entry,
            None => return,
        };
        debug!(pid = %pid, reason = %reason, "process finished");

        if !reason.is_normal() {
            for linked in &entry.links {
                // Remove the reverse edge first so a cascade cannot echo.
                self.unlink_oneway(*linked, pid);
                if let Err(e) = self.exit(pid, *linked, reason.clone()) {
                    debug!(pid = %linked, error = %e, "exit propagation skipped");
                }
            }
        } else {
            for linked in &entry.links {
                self.unlink_oneway(*linked, pid);
            }
        }

        for watcher in &entry.monitors {
            let down = Down {
                process: pid,
                reason: reason.clone(),
            };
            if let Err(e) = self.send_info(*watcher, down) {
                debug!(pid = %watcher, error = %e, "down notification skipped");
            }
        }
    }

    fn unlink_oneway(&self, holder: Pid, gone: Pid) {
        if let Some(entry) = self.lock_procs().get_mut(&holder) {
            entry.links.remove(&gone);
        }
    }

    fn lock_procs(&self) -> std::sync::MutexGuard<'_, HashMap<Pid, ProcEntry>> {
        match self.inner.procs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("process table lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.inner.node_id)
            .field("process_count", &self.process_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{MatchFn, Recv};

    #[tokio::test]
    async fn test_register_and_send() {
        let node = Node::new();
        let (pid, mut mailbox) = node.register(8).unwrap();
        assert!(node.is_registered(pid));

        node.cast(pid, 41_i64).unwrap();
        let any: &MatchFn = &|_| true;
        match mailbox.receive_wait(&[any], None).await {
            Recv::Message(_, env) => assert_eq!(env.into_payload::<i64>().unwrap(), 41),
            other => panic!("unexpected receive outcome: {other:?}"),
        }
    }

    #[test]
    fn test_register_rejects_bad_capacity() {
        let node = Node::new();
        assert!(matches!(
            node.register(0),
            Err(Error::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            node.register(MAILBOX_DEPTH_MAX + 1),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_to_unknown_pid() {
        let node = Node::new();
        let ghost = Pid::from_parts(node.id(), 999);
        assert!(matches!(
            node.cast(ghost, 1_i64),
            Err(Error::ProcessNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_mailbox_full_is_explicit() {
        let node = Node::new();
        let (pid, _mailbox) = node.register(1).unwrap();
        node.cast(pid, 1_i64).unwrap();
        assert!(matches!(
            node.cast(pid, 2_i64),
            Err(Error::MailboxFull { limit: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_link_propagates_non_normal_exit() {
        let node = Node::new();
        let (a, mut mailbox_a) = node.register(8).unwrap();
        let (b, _mailbox_b) = node.register(8).unwrap();
        node.link(a, b).unwrap();

        node.finish(b, &ExitReason::other("crashed"));

        let any: &MatchFn = &|_| true;
        match mailbox_a.receive_wait(&[any], None).await {
            Recv::Message(_, env) => {
                assert!(env.is_exit());
                let (from, reason) = env.into_exit::<ExitReason>().unwrap();
                assert_eq!(from, b);
                assert_eq!(reason, ExitReason::other("crashed"));
            }
            other => panic!("unexpected receive outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_link_skips_normal_exit() {
        let node = Node::new();
        let (a, mut mailbox_a) = node.register(8).unwrap();
        let (b, _mailbox_b) = node.register(8).unwrap();
        node.link(a, b).unwrap();

        node.finish(b, &ExitReason::Normal);

        let any: &MatchFn = &|_| true;
        let got = mailbox_a
            .receive_wait(&[any], Some(std::time::Duration::from_millis(20)))
            .await;
        assert!(matches!(got, Recv::TimedOut));
    }

    #[tokio::test]
    async fn test_monitor_observes_every_reason() {
        let node = Node::new();
        let (watcher, mut mailbox) = node.register(8).unwrap();
        let (target, _target_mailbox) = node.register(8).unwrap();
        node.monitor(watcher, target).unwrap();

        node.finish(target, &ExitReason::Normal);

        let any: &MatchFn = &|_| true;
        match mailbox.receive_wait(&[any], None).await {
            Recv::Message(_, env) => {
                assert!(env.is_info_class());
                let down = env.into_payload::<Down>().unwrap();
                assert_eq!(down.process, target);
                assert_eq!(down.reason, ExitReason::Normal);
            }
            other => panic!("unexpected receive outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_finish_deregisters() {
        let node = Node::new();
        let (pid, _mailbox) = node.register(8).unwrap();
        assert_eq!(node.process_count(), 1);
        node.finish(pid, &ExitReason::Normal);
        assert_eq!(node.process_count(), 0);
        assert!(!node.is_registered(pid));
    }
}
