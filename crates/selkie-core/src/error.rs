//! Error types for Selkie
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use crate::pid::Pid;
use thiserror::Error;

/// Result type alias for Selkie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Selkie error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Routing Errors
    // =========================================================================
    #[error("Process not found: {pid}")]
    ProcessNotFound { pid: Pid },

    #[error("Mailbox full: {pid}, limit: {limit}")]
    MailboxFull { pid: Pid, limit: usize },

    // =========================================================================
    // Call Protocol Errors
    // =========================================================================
    #[error("Call timed out: target {target} after {timeout_ms} ms")]
    CallTimeout { target: Pid, timeout_ms: u64 },

    #[error("Reply channel closed: target {target}")]
    ReplyChannelClosed { target: Pid },

    #[error("Reply type mismatch: expected {expected}, got {actual}")]
    ReplyTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Reply already sent: caller {caller}")]
    ReplyAlreadySent { caller: Pid },

    // =========================================================================
    // Channel Errors
    // =========================================================================
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Channel full: capacity {capacity}")]
    ChannelFull { capacity: usize },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    #[error("Frame encoding failed: {reason}")]
    EncodeFailed { reason: String },

    #[error("Frame decoding failed: {reason}")]
    DecodeFailed { reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a process not found error
    pub fn process_not_found(pid: Pid) -> Self {
        Self::ProcessNotFound { pid }
    }

    /// Create a mailbox full error
    pub fn mailbox_full(pid: Pid, limit: usize) -> Self {
        Self::MailboxFull { pid, limit }
    }

    /// Create a call timeout error
    pub fn call_timeout(target: Pid, timeout_ms: u64) -> Self {
        Self::CallTimeout { target, timeout_ms }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CallTimeout { .. })
    }

    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::CallTimeout { .. } | Self::MailboxFull { .. } | Self::ChannelFull { .. }
        )
    }
}
