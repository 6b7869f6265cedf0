//! Call/cast protocol clients
//!
//! A `Client` owns a pid and mailbox of its own, which is what lets replies
//! come back through ordinary message routing: a call sends an envelope
//! carrying the client's reply address and a fresh token, then selectively
//! receives the reply matching that token AND the expected reply type.
//!
//! The type-mismatch hazard follows directly: a reply of the wrong type
//! never matches the wait, so the plain `call` blocks forever on a
//! misbehaving server. Use the `_timeout` variants anywhere liveness
//! matters. `call_chan` sidesteps the mailbox entirely with a private typed
//! channel embedded in the call envelope.

use selkie_core::channel::channel;
use selkie_core::constants::{CALL_TIMEOUT_MS_MAX, REPLY_CHANNEL_DEPTH_DEFAULT};
use selkie_core::envelope::{Envelope, Message, ReplySink};
use selkie_core::error::{Error, Result};
use selkie_core::mailbox::{Mailbox, MatchFn, Recv};
use selkie_core::node::Node;
use selkie_core::pid::{Pid, ReplyToken};
use std::time::Duration;
use tracing::trace;

/// A call/cast client with its own mailbox
pub struct Client {
    pid: Pid,
    node: Node,
    mailbox: Mailbox,
    next_call_seq: u64,
}

impl Client {
    /// Register a client process on the node
    pub fn new(node: &Node) -> Result<Self> {
        let (pid, mailbox) = node.register(selkie_core::constants::MAILBOX_DEPTH_DEFAULT)?;
        Ok(Self {
            pid,
            node: node.clone(),
            mailbox,
            next_call_seq: 0,
        })
    }

    /// The client's pid
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send a cast (fire-and-forget)
    pub fn cast<M: Message>(&self, target: Pid, msg: M) -> Result<()> {
        self.node.cast(target, msg)
    }

    /// Call a server and wait indefinitely for the reply
    ///
    /// Blocks forever if the server never replies or replies with a value of
    /// a different type; prefer [`call_timeout`](Self::call_timeout).
    pub async fn call<Req, Rep>(&mut self, target: Pid, request: Req) -> Result<Rep>
    where
        Req: Message,
        Rep: Message,
    {
        self.call_inner(target, request, None).await
    }

    /// Call a server, giving up after `timeout`
    pub async fn call_timeout<Req, Rep>(
        &mut self,
        target: Pid,
        request: Req,
        timeout: Duration,
    ) -> Result<Rep>
    where
        Req: Message,
        Rep: Message,
    {
        debug_assert!(
            timeout.as_millis() as u64 <= CALL_TIMEOUT_MS_MAX,
            "call timeout exceeds CALL_TIMEOUT_MS_MAX"
        );
        self.call_inner(target, request, Some(timeout)).await
    }

    async fn call_inner<Req, Rep>(
        &mut self,
        target: Pid,
        request: Req,
        timeout: Option<Duration>,
    ) -> Result<Rep>
    where
        Req: Message,
        Rep: Message,
    {
        let token = self.fresh_token();
        let sink = ReplySink::Mailbox {
            reply_to: self.pid,
            token,
        };
        self.node
            .send(target, Envelope::call(request, self.pid, sink))?;
        trace!(target = %target, token = %token, "call sent");

        // Match on token value AND reply type: a wrong-typed reply is
        // unroutable to this wait by design.
        let matcher = move |envelope: &Envelope| {
            envelope.reply_token() == Some(token) && envelope.payload_is::<Rep>()
        };
        match self.mailbox.receive_wait(&[&matcher], timeout).await {
            Recv::Message(_, envelope) => envelope
                .into_payload::<Rep>()
                .map_err(|_| Error::internal("matched reply failed typed projection")),
            Recv::TimedOut => Err(Error::call_timeout(
                target,
                timeout.unwrap_or_default().as_millis() as u64,
            )),
            Recv::Closed => Err(Error::ReplyChannelClosed { target }),
        }
    }

    /// Call a server over a private typed channel
    ///
    /// The reply bypasses this client's mailbox, avoiding the full-mailbox
    /// scan on busy clients.
    pub async fn call_chan<Req, Rep>(&mut self, target: Pid, request: Req) -> Result<Rep>
    where
        Req: Message,
        Rep: Message,
    {
        self.call_chan_inner(target, request, None).await
    }

    /// Call over a private typed channel, giving up after `timeout`
    pub async fn call_chan_timeout<Req, Rep>(
        &mut self,
        target: Pid,
        request: Req,
        timeout: Duration,
    ) -> Result<Rep>
    where
        Req: Message,
        Rep: Message,
    {
        debug_assert!(
            timeout.as_millis() as u64 <= CALL_TIMEOUT_MS_MAX,
            "call timeout exceeds CALL_TIMEOUT_MS_MAX"
        );
        self.call_chan_inner(target, request, Some(timeout)).await
    }

    async fn call_chan_inner<Req, Rep>(
        &mut self,
        target: Pid,
        request: Req,
        timeout: Option<Duration>,
    ) -> Result<Rep>
    where
        Req: Message,
        Rep: Message,
    {
        let token = self.fresh_token();
        let (reply_tx, mut reply_rx) = channel::<Rep>(REPLY_CHANNEL_DEPTH_DEFAULT);
        let sink = ReplySink::Port {
            token,
            port: reply_tx.erase(),
        };
        self.node
            .send(target, Envelope::call(request, self.pid, sink))?;
        trace!(target = %target, token = %token, "call_chan sent");

        match timeout {
            None => reply_rx
                .recv()
                .await
                .ok_or(Error::ReplyChannelClosed { target }),
            Some(d) => match tokio::time::timeout(d, reply_rx.recv()).await {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) => Err(Error::ReplyChannelClosed { target }),
                Err(_) => Err(Error::call_timeout(target, d.as_millis() as u64)),
            },
        }
    }

    fn fresh_token(&mut self) -> ReplyToken {
        let token = ReplyToken::new(self.pid, self.next_call_seq);
        self.next_call_seq = self.next_call_seq.wrapping_add(1);
        token
    }

    /// Receive the next info-class message addressed to this client
    ///
    /// Lets a client observe `Down` notifications and other plain traffic.
    /// Returns `None` when the timeout elapses without a matching message.
    pub async fn recv_info<M: Message>(&mut self, timeout: Duration) -> Option<M> {
        let matcher =
            |envelope: &Envelope| envelope.is_info_class() && envelope.payload_is::<M>();
        let m: &MatchFn = &matcher;
        match self.mailbox.receive_wait(&[m], Some(timeout)).await {
            Recv::Message(_, envelope) => envelope.into_payload::<M>().ok(),
            Recv::TimedOut | Recv::Closed => None,
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.node
            .finish(self.pid, &selkie_core::exit::ExitReason::Normal);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pid", &self.pid)
            .field("next_call_seq", &self.next_call_seq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_tokens_are_unique() {
        let node = Node::new();
        let mut client = Client::new(&node).unwrap();
        let a = client.fresh_token();
        let b = client.fresh_token();
        assert_ne!(a, b);
        assert_eq!(a.caller(), client.pid());
    }

    #[tokio::test]
    async fn test_call_to_unknown_target() {
        let node = Node::new();
        let mut client = Client::new(&node).unwrap();
        let ghost = Pid::from_parts(node.id(), 4242);
        let err = client
            .call_timeout::<i64, i64>(ghost, 1, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProcessNotFound { .. }));
    }

    #[tokio::test]
    async fn test_client_drop_deregisters() {
        let node = Node::new();
        let pid = {
            let client = Client::new(&node).unwrap();
            client.pid()
        };
        assert!(!node.is_registered(pid));
    }
}
