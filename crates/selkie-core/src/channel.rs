//! Typed channels
//!
//! A send-port/receive-port pair carrying one concrete payload type. The
//! send-port is clonable and can be type-erased so it may travel inside a
//! call envelope (`call_chan`); the receive-port is owned by exactly one
//! task.

use crate::envelope::Message;
use crate::error::{Error, Result};
use std::any::Any;
use std::fmt;
use tokio::sync::mpsc;

/// Create a typed channel with the given capacity
pub fn channel<T: Message>(capacity: usize) -> (SendPort<T>, ReceivePort<T>) {
    debug_assert!(capacity > 0, "channel capacity must be positive");
    let (tx, rx) = mpsc::channel(capacity);
    (
        SendPort { tx, capacity },
        ReceivePort { rx },
    )
}

/// Sending half of a typed channel
pub struct SendPort<T> {
    tx: mpsc::Sender<T>,
    capacity: usize,
}

impl<T> Clone for SendPort<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: Message> SendPort<T> {
    /// Send a value, waiting for capacity
    pub async fn send(&self, value: T) -> Result<()> {
        self.tx.send(value).await.map_err(|_| Error::ChannelClosed)
    }

    /// Send a value without blocking
    pub fn try_send(&self, value: T) -> Result<()> {
        self.tx.try_send(value).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::ChannelFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
        })
    }

    /// Check whether the receive half has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Erase the payload type so the port can travel inside an envelope
    pub fn erase(self) -> AnySendPort {
        AnySendPort {
            payload_type: std::any::type_name::<T>(),
            inner: Box::new(self),
        }
    }
}

impl<T> fmt::Debug for SendPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendPort")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Receiving half of a typed channel
pub struct ReceivePort<T> {
    rx: mpsc::Receiver<T>,
}

impl<T: Message> ReceivePort<T> {
    /// Receive the next value, or `None` when every send-port is dropped
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receive without blocking
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> fmt::Debug for ReceivePort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivePort").finish_non_exhaustive()
    }
}

// =============================================================================
// Type-erased send port
// =============================================================================

trait ErasedPort: Send {
    fn try_send_boxed(&self, value: Box<dyn Any + Send>, actual: &'static str) -> Result<()>;
    fn payload_type(&self) -> &'static str;
}

impl<T: Message> ErasedPort for SendPort<T> {
    fn try_send_boxed(&self, value: Box<dyn Any + Send>, actual: &'static str) -> Result<()> {
        match value.downcast::<T>() {
            Ok(v) => self.try_send(*v),
            Err(_) => Err(Error::ReplyTypeMismatch {
                expected: std::any::type_name::<T>(),
                actual,
            }),
        }
    }

    fn payload_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A send-port with its payload type erased
///
/// Produced by [`SendPort::erase`]; a value sent through it is downcast back
/// to the original payload type, and a mismatch is an explicit error rather
/// than a silent drop.
pub struct AnySendPort {
    payload_type: &'static str,
    inner: Box<dyn ErasedPort>,
}

impl AnySendPort {
    /// Send a boxed value without blocking
    pub fn try_send_boxed(&self, value: Box<dyn Any + Send>, actual: &'static str) -> Result<()> {
        self.inner.try_send_boxed(value, actual)
    }

    /// The type name of the payload this port carries
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }
}

impl fmt::Debug for AnySendPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnySendPort")
            .field("payload_type", &self.payload_type)
            .finish()
    }
}
