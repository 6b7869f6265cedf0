//! Exit reasons and monitor notifications

use crate::pid::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a process terminated
///
/// A closed sum carried by structured exit signals. User-defined exit
/// payloads are not part of this type: they travel as opaque envelope
/// payloads and are routed through a process's exit handlers instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Orderly termination; not propagated to linked processes.
    Normal,
    /// Supervisor-requested shutdown.
    Shutdown,
    /// Any other reason, with a describing payload.
    Other(String),
}

impl ExitReason {
    /// Create an `Other` reason
    pub fn other(reason: impl Into<String>) -> Self {
        Self::Other(reason.into())
    }

    /// Check whether this reason is `Normal`
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Monitor notification
///
/// Delivered to a watcher's mailbox as an ordinary (info-class) message when
/// a monitored process terminates, whatever the reason. Register an info
/// handler for `Down` to observe it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Down {
    /// The process that terminated
    pub process: Pid,
    /// Why it terminated
    pub reason: ExitReason,
}
