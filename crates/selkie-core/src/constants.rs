//! TigerStyle constants for Selkie
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Mailbox Limits
// =============================================================================

/// Maximum depth of a process mailbox
pub const MAILBOX_DEPTH_MAX: usize = 10_000;

/// Default depth of a process mailbox
pub const MAILBOX_DEPTH_DEFAULT: usize = 1_024;

/// Default depth of a control channel
pub const CONTROL_CHANNEL_DEPTH_DEFAULT: usize = 64;

/// Default capacity of a private reply channel created by `call_chan`
pub const REPLY_CHANNEL_DEPTH_DEFAULT: usize = 1;

// =============================================================================
// Call Protocol Limits
// =============================================================================

/// Default timeout for a call in milliseconds (5 sec)
pub const CALL_TIMEOUT_MS_DEFAULT: u64 = 5 * 1000;

/// Maximum timeout accepted for a call in milliseconds (5 min)
pub const CALL_TIMEOUT_MS_MAX: u64 = 5 * 60 * 1000;

// =============================================================================
// Prioritised Drain Limits
// =============================================================================

/// Default number of messages moved per drain step (counter policy)
pub const DRAIN_MESSAGES_COUNT_DEFAULT: u32 = 128;

/// Maximum number of messages moved per drain step (counter policy)
pub const DRAIN_MESSAGES_COUNT_MAX: u32 = 4_096;

/// Maximum wall-time budget for a drain step in milliseconds (timer policy)
pub const DRAIN_BUDGET_MS_MAX: u64 = 1_000;

/// Maximum number of priority rules on one prioritised process
pub const PRIORITY_RULES_COUNT_MAX: usize = 64;

/// Maximum priority level assignable by a dispatch-priority rule
pub const PRIORITY_LEVEL_MAX: u8 = 100;

// Compile-time assertions for constant validity
const _: () = {
    assert!(MAILBOX_DEPTH_DEFAULT <= MAILBOX_DEPTH_MAX);
    assert!(CONTROL_CHANNEL_DEPTH_DEFAULT <= MAILBOX_DEPTH_MAX);
    assert!(REPLY_CHANNEL_DEPTH_DEFAULT >= 1);
    assert!(CALL_TIMEOUT_MS_DEFAULT <= CALL_TIMEOUT_MS_MAX);
    assert!(DRAIN_MESSAGES_COUNT_DEFAULT <= DRAIN_MESSAGES_COUNT_MAX);
    assert!(DRAIN_MESSAGES_COUNT_DEFAULT >= 1);
    assert!(PRIORITY_LEVEL_MAX >= 1);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_have_units_in_names() {
        // This test documents the naming convention
        // All time limits end in _MS_
        // All count limits end in _COUNT_ or _DEPTH_
        let _: usize = MAILBOX_DEPTH_MAX;
        let _: u64 = CALL_TIMEOUT_MS_DEFAULT;
        let _: u32 = DRAIN_MESSAGES_COUNT_MAX;
    }

    #[test]
    fn test_defaults_within_limits() {
        assert!(MAILBOX_DEPTH_DEFAULT <= MAILBOX_DEPTH_MAX);
        assert!(DRAIN_MESSAGES_COUNT_DEFAULT <= DRAIN_MESSAGES_COUNT_MAX);
        assert!(PRIORITY_LEVEL_MAX >= 1);
    }
}
