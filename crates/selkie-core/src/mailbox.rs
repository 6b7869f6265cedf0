//! Process mailbox with selective receive
//!
//! TigerStyle: Bounded queues with explicit limits, no silent drops.
//!
//! The mailbox is fed by a bounded channel and keeps an owned stash of
//! envelopes that were pulled but not yet wanted by any matcher. Selective
//! receive scans the stash in arrival order first, then pulls fresh
//! envelopes, parking the ones nothing matched. This is what lets a caller
//! wait for one specific reply token while unrelated traffic keeps
//! accumulating.

use crate::envelope::Envelope;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Matcher consulted by [`Mailbox::receive_wait`]
pub type MatchFn = dyn Fn(&Envelope) -> bool + Send + Sync;

/// Outcome of a selective receive
#[derive(Debug)]
pub enum Recv {
    /// An envelope was selected; the index says which matcher accepted it.
    Message(usize, Envelope),
    /// The deadline elapsed with no acceptable envelope.
    TimedOut,
    /// The mailbox was deregistered (every sender dropped).
    Closed,
}

/// A process mailbox
///
/// Owned by exactly one receive loop; no other task reads it.
pub struct Mailbox {
    rx: mpsc::Receiver<Envelope>,
    stash: VecDeque<Envelope>,
    capacity: usize,
    received_count: u64,
}

impl Mailbox {
    pub(crate) fn new(rx: mpsc::Receiver<Envelope>, capacity: usize) -> Self {
        debug_assert!(capacity > 0, "mailbox capacity must be positive");
        Self {
            rx,
            stash: VecDeque::new(),
            capacity,
            received_count: 0,
        }
    }

    /// The mailbox capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total envelopes pulled off the channel so far
    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    /// Number of envelopes parked by selective receive
    pub fn stashed_len(&self) -> usize {
        self.stash.len()
    }

    /// Block until a matcher accepts an envelope, or the deadline elapses
    ///
    /// Envelopes are considered in arrival order; for each envelope the
    /// matchers are tried in list order and the first acceptance wins.
    /// Envelopes no matcher wants are parked and re-examined only by later
    /// calls with different matchers. A zero timeout performs a single
    /// non-blocking poll.
    pub async fn receive_wait(&mut self, matchers: &[&MatchFn], timeout: Option<Duration>) -> Recv {
        debug_assert!(!matchers.is_empty(), "matcher list must not be empty");

        // Arrival order: the stash holds the oldest envelopes.
        if let Some(found) = self.take_from_stash(matchers) {
            return Recv::Message(found.0, found.1);
        }

        match timeout {
            Some(d) if d.is_zero() => {
                while let Ok(env) = self.rx.try_recv() {
                    self.received_count = self.received_count.wrapping_add(1);
                    match select(matchers, &env) {
                        Some(idx) => return Recv::Message(idx, env),
                        None => self.park(env),
                    }
                }
                Recv::TimedOut
            }
            Some(d) => {
                let deadline = tokio::time::Instant::now() + d;
                loop {
                    let env = match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                        Err(_) => return Recv::TimedOut,
                        Ok(None) => return Recv::Closed,
                        Ok(Some(env)) => env,
                    };
                    self.received_count = self.received_count.wrapping_add(1);
                    match select(matchers, &env) {
                        Some(idx) => return Recv::Message(idx, env),
                        None => self.park(env),
                    }
                }
            }
            None => loop {
                let env = match self.rx.recv().await {
                    None => return Recv::Closed,
                    Some(env) => env,
                };
                self.received_count = self.received_count.wrapping_add(1);
                match select(matchers, &env) {
                    Some(idx) => return Recv::Message(idx, env),
                    None => self.park(env),
                }
            },
        }
    }

    /// Pull the next envelope in arrival order without blocking
    ///
    /// Used by the prioritised drain step, which classifies envelopes itself
    /// instead of matching them.
    pub fn try_next(&mut self) -> Option<Envelope> {
        if let Some(env) = self.stash.pop_front() {
            return Some(env);
        }
        match self.rx.try_recv() {
            Ok(env) => {
                self.received_count = self.received_count.wrapping_add(1);
                Some(env)
            }
            Err(_) => None,
        }
    }

    /// Release spare stash memory
    ///
    /// Called on hibernate; an optimisation, not a contract.
    pub fn shrink(&mut self) {
        self.stash.shrink_to_fit();
    }

    fn take_from_stash(&mut self, matchers: &[&MatchFn]) -> Option<(usize, Envelope)> {
        for pos in 0..self.stash.len() {
            if let Some(idx) = select(matchers, &self.stash[pos]) {
                let env = self
                    .stash
                    .remove(pos)
                    .unwrap_or_else(|| unreachable!("index {pos} checked above"));
                return Some((idx, env));
            }
        }
        None
    }

    fn park(&mut self, env: Envelope) {
        trace!(payload_type = env.payload_type(), "envelope parked");
        self.stash.push_back(env);
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("capacity", &self.capacity)
            .field("stashed", &self.stash.len())
            .field("received_count", &self.received_count)
            .finish()
    }
}

fn select(matchers: &[&MatchFn], env: &Envelope) -> Option<usize> {
    matchers.iter().position(|m| m(env))
}
