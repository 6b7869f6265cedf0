//! Wire-level envelope codec
//!
//! The seam a transport would plug into. Frames are a one-byte discriminator
//! followed by a JSON body; a call carries its reply address and token, and
//! the token must round-trip byte-exact so the caller's reply matcher fires
//! on the echoed value. No transport is provided here.

use crate::error::{Error, Result};
use crate::exit::ExitReason;
use crate::pid::{Pid, ReplyToken};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator byte for call frames
pub const FRAME_TAG_CALL: u8 = 0x01;
/// Discriminator byte for cast frames
pub const FRAME_TAG_CAST: u8 = 0x02;
/// Discriminator byte for exit frames
pub const FRAME_TAG_EXIT: u8 = 0x03;
/// Discriminator byte for reply frames
pub const FRAME_TAG_REPLY: u8 = 0x04;

/// A decoded wire frame
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// Request expecting a reply at `reply_to`, correlated by `token`.
    Call {
        reply_to: Pid,
        token: ReplyToken,
        payload: Value,
    },
    /// Fire-and-forget message.
    Cast { payload: Value },
    /// Reply to an earlier call.
    Reply { token: ReplyToken, payload: Value },
    /// Structured exit signal.
    Exit { from: Pid, reason: ExitReason },
}

#[derive(Serialize, Deserialize)]
struct CallBody {
    reply_to: Pid,
    token: ReplyToken,
    payload: Value,
}

#[derive(Serialize, Deserialize)]
struct CastBody {
    payload: Value,
}

#[derive(Serialize, Deserialize)]
struct ReplyBody {
    token: ReplyToken,
    payload: Value,
}

#[derive(Serialize, Deserialize)]
struct ExitBody {
    from: Pid,
    reason: ExitReason,
}

/// Encode a frame to bytes
pub fn encode(frame: &WireFrame) -> Result<Bytes> {
    let (tag, body) = match frame {
        WireFrame::Call {
            reply_to,
            token,
            payload,
        } => (
            FRAME_TAG_CALL,
            to_body(&CallBody {
                reply_to: *reply_to,
                token: *token,
                payload: payload.clone(),
            })?,
        ),
        WireFrame::Cast { payload } => (
            FRAME_TAG_CAST,
            to_body(&CastBody {
                payload: payload.clone(),
            })?,
        ),
        WireFrame::Reply { token, payload } => (
            FRAME_TAG_REPLY,
            to_body(&ReplyBody {
                token: *token,
                payload: payload.clone(),
            })?,
        ),
        WireFrame::Exit { from, reason } => (
            FRAME_TAG_EXIT,
            to_body(&ExitBody {
                from: *from,
                reason: reason.clone(),
            })?,
        ),
    };

    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(tag);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Decode a frame from bytes
pub fn decode(buf: &[u8]) -> Result<WireFrame> {
    let (&tag, body) = buf.split_first().ok_or_else(|| Error::DecodeFailed {
        reason: "empty frame".to_string(),
    })?;

    match tag {
        FRAME_TAG_CALL => {
            let body: CallBody = from_body(body)?;
            Ok(WireFrame::Call {
                reply_to: body.reply_to,
                token: body.token,
                payload: body.payload,
            })
        }
        FRAME_TAG_CAST => {
            let body: CastBody = from_body(body)?;
            Ok(WireFrame::Cast {
                payload: body.payload,
            })
        }
        FRAME_TAG_REPLY => {
            let body: ReplyBody = from_body(body)?;
            Ok(WireFrame::Reply {
                token: body.token,
                payload: body.payload,
            })
        }
        FRAME_TAG_EXIT => {
            let body: ExitBody = from_body(body)?;
            Ok(WireFrame::Exit {
                from: body.from,
                reason: body.reason,
            })
        }
        other => Err(Error::DecodeFailed {
            reason: format!("unknown frame tag: {other:#04x}"),
        }),
    }
}

fn to_body<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| Error::EncodeFailed {
        reason: e.to_string(),
    })
}

fn from_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::DecodeFailed {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_frame_round_trip() {
        let caller = Pid::from_parts(1, 7);
        let frame = WireFrame::Call {
            reply_to: caller,
            token: ReplyToken::new(caller, 3),
            payload: json!({"op": "get", "key": 12}),
        };
        let bytes = encode(&frame).unwrap();
        assert_eq!(bytes[0], FRAME_TAG_CALL);
        assert_eq!(decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_token_round_trips_byte_exact() {
        let caller = Pid::from_parts(9, 1);
        let token = ReplyToken::new(caller, u64::MAX);
        let frame = WireFrame::Reply {
            token,
            payload: json!(null),
        };
        let first = encode(&frame).unwrap();
        let decoded = decode(&first).unwrap();
        let second = encode(&decoded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cast_frame_discriminator() {
        let frame = WireFrame::Cast {
            payload: json!("inc"),
        };
        let bytes = encode(&frame).unwrap();
        assert_eq!(bytes[0], FRAME_TAG_CAST);
        assert_eq!(decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_exit_frame_round_trip() {
        let frame = WireFrame::Exit {
            from: Pid::from_parts(2, 2),
            reason: ExitReason::other("unhandled"),
        };
        let bytes = encode(&frame).unwrap();
        assert_eq!(bytes[0], FRAME_TAG_EXIT);
        assert_eq!(decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(&[]), Err(Error::DecodeFailed { .. })));
        assert!(matches!(decode(&[0xFF]), Err(Error::DecodeFailed { .. })));
        assert!(matches!(
            decode(&[FRAME_TAG_CALL, b'n', b'o']),
            Err(Error::DecodeFailed { .. })
        ));
    }
}
