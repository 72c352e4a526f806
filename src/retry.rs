//! Fixed-budget retry policy for transient transfer failures.

use std::time::Duration;

use crate::response::TransferError;

/// Retry budget applied inside `perform`.
///
/// `retries` additional attempts are made after the first, with a fixed
/// `delay` between attempts. Only transient engine failures are retried;
/// HTTP statuses come back as ordinary responses whatever their code, and
/// re-polling on a 5xx is the caller's schedule to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(1),
        }
    }
}

/// True for failures worth a fresh attempt: resolve and connect failures,
/// mid-transfer resets, timeouts, short bodies, stalls and size-limit
/// aborts. Caller cancellation and sink failures are final.
pub fn is_transient(error: &TransferError) -> bool {
    match error {
        TransferError::Engine(e) => {
            e.is_operation_timedout()
                || e.is_couldnt_connect()
                || e.is_couldnt_resolve_host()
                || e.is_couldnt_resolve_proxy()
                || e.is_read_error()
                || e.is_recv_error()
                || e.is_send_error()
                || e.is_got_nothing()
                || e.is_partial_file()
        }
        TransferError::Stalled | TransferError::TooLarge { .. } => true,
        TransferError::Cancelled | TransferError::Sink { .. } => false,
    }
}
