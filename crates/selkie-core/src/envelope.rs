//! Opaque message envelopes
//!
//! Payload types are erased when a message enters a mailbox and recovered by
//! typed projection at dispatch time. An envelope also carries a tag telling
//! the receive loop which protocol lane it belongs to (call, cast, exit, or
//! plain info traffic), and for calls, where the reply goes.

use crate::channel::AnySendPort;
use crate::pid::{Pid, ReplyToken};
use std::any::Any;
use std::fmt;

/// Capability required of message payloads
///
/// Blanket-implemented for every `Any + Send + 'static` type; payloads do not
/// need to opt in.
pub trait Message: Any + Send + 'static {}

impl<T: Any + Send + 'static> Message for T {}

/// Where a call's reply is delivered
#[derive(Debug)]
pub enum ReplySink {
    /// Reply goes to the caller's mailbox, correlated by token.
    Mailbox { reply_to: Pid, token: ReplyToken },
    /// Reply goes to a private typed channel embedded in the call.
    Port { token: ReplyToken, port: AnySendPort },
}

impl ReplySink {
    /// The token correlating this call with its reply
    pub fn token(&self) -> ReplyToken {
        match self {
            Self::Mailbox { token, .. } | Self::Port { token, .. } => *token,
        }
    }
}

/// Protocol lane of an envelope
#[derive(Debug)]
pub enum Tag {
    /// Request expecting a reply.
    Call { from: Pid, sink: ReplySink },
    /// Reply to an earlier call.
    Reply { token: ReplyToken },
    /// Fire-and-forget message.
    Cast,
    /// Structured exit signal.
    Exit { from: Pid },
    /// Plain (non-protocol) message.
    Info,
}

/// Coarse envelope classification used for dispatch routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Call,
    Reply,
    Cast,
    Exit,
    Info,
}

/// An opaque message wrapper
///
/// The payload type is erased; the original type name is kept for dead-letter
/// forwarding and logging.
pub struct Envelope {
    tag: Tag,
    payload: Box<dyn Any + Send>,
    payload_type: &'static str,
}

impl Envelope {
    /// Wrap a cast payload
    pub fn cast<M: Message>(msg: M) -> Self {
        Self {
            tag: Tag::Cast,
            payload: Box::new(msg),
            payload_type: std::any::type_name::<M>(),
        }
    }

    /// Wrap a plain (info) payload
    pub fn info<M: Message>(msg: M) -> Self {
        Self {
            tag: Tag::Info,
            payload: Box::new(msg),
            payload_type: std::any::type_name::<M>(),
        }
    }

    /// Wrap a call payload with its reply sink
    pub fn call<M: Message>(msg: M, from: Pid, sink: ReplySink) -> Self {
        Self {
            tag: Tag::Call { from, sink },
            payload: Box::new(msg),
            payload_type: std::any::type_name::<M>(),
        }
    }

    /// Wrap a reply payload correlated by token
    pub fn reply<M: Message>(token: ReplyToken, value: M) -> Self {
        Self {
            tag: Tag::Reply { token },
            payload: Box::new(value),
            payload_type: std::any::type_name::<M>(),
        }
    }

    /// Wrap an exit-signal payload
    pub fn exit<M: Message>(from: Pid, payload: M) -> Self {
        Self {
            tag: Tag::Exit { from },
            payload: Box::new(payload),
            payload_type: std::any::type_name::<M>(),
        }
    }

    /// The envelope's protocol lane
    pub fn kind(&self) -> TagKind {
        match self.tag {
            Tag::Call { .. } => TagKind::Call,
            Tag::Reply { .. } => TagKind::Reply,
            Tag::Cast => TagKind::Cast,
            Tag::Exit { .. } => TagKind::Exit,
            Tag::Info => TagKind::Info,
        }
    }

    /// True for call envelopes
    pub fn is_call(&self) -> bool {
        self.kind() == TagKind::Call
    }

    /// True for cast envelopes
    pub fn is_cast(&self) -> bool {
        self.kind() == TagKind::Cast
    }

    /// True for exit signals
    pub fn is_exit(&self) -> bool {
        self.kind() == TagKind::Exit
    }

    /// True for envelopes outside the call/cast/exit protocol
    ///
    /// Late replies (after a caller gave up) land here too, the way stray
    /// replies arrive as ordinary messages in OTP.
    pub fn is_info_class(&self) -> bool {
        matches!(self.kind(), TagKind::Info | TagKind::Reply)
    }

    /// The sending process, for calls and exit signals
    pub fn sender(&self) -> Option<Pid> {
        match &self.tag {
            Tag::Call { from, .. } | Tag::Exit { from } => Some(*from),
            _ => None,
        }
    }

    /// The reply token, for calls and replies
    pub fn reply_token(&self) -> Option<ReplyToken> {
        match &self.tag {
            Tag::Call { sink, .. } => Some(sink.token()),
            Tag::Reply { token } => Some(*token),
            _ => None,
        }
    }

    /// The erased payload's original type name
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// Check the payload type without consuming the envelope
    pub fn payload_is<M: Message>(&self) -> bool {
        self.payload.is::<M>()
    }

    /// Borrow the payload as `M` if the types line up
    pub fn payload_ref<M: Message>(&self) -> Option<&M> {
        self.payload.downcast_ref::<M>()
    }

    /// Project the payload to `M`, returning the envelope intact on mismatch
    pub fn into_payload<M: Message>(self) -> std::result::Result<M, Self> {
        let Self {
            tag,
            payload,
            payload_type,
        } = self;
        match payload.downcast::<M>() {
            Ok(v) => Ok(*v),
            Err(payload) => Err(Self {
                tag,
                payload,
                payload_type,
            }),
        }
    }

    /// Decompose a call envelope into caller, sink, and typed request
    ///
    /// Returns the envelope intact if it is not a call or the payload type
    /// does not match.
    pub fn into_call<M: Message>(self) -> std::result::Result<(Pid, ReplySink, M), Self> {
        if !self.is_call() || !self.payload_is::<M>() {
            return Err(self);
        }
        let Self {
            tag,
            payload,
            payload_type,
        } = self;
        match tag {
            Tag::Call { from, sink } => match payload.downcast::<M>() {
                Ok(v) => Ok((from, sink, *v)),
                Err(payload) => Err(Self {
                    tag: Tag::Call { from, sink },
                    payload,
                    payload_type,
                }),
            },
            other => Err(Self {
                tag: other,
                payload,
                payload_type,
            }),
        }
    }

    /// Decompose an exit envelope into sender and typed payload
    pub fn into_exit<M: Message>(self) -> std::result::Result<(Pid, M), Self> {
        if !self.is_exit() {
            return Err(self);
        }
        let from = match &self.tag {
            Tag::Exit { from } => *from,
            _ => return Err(self),
        };
        match self.into_payload::<M>() {
            Ok(v) => Ok((from, v)),
            Err(env) => Err(env),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("kind", &self.kind())
            .field("payload_type", &self.payload_type)
            .finish_non_exhaustive()
    }
}
