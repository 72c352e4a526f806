//! The retry loop every transfer goes through.

use curl::easy::Easy2;

use crate::response::{HttpResponse, TransferError};
use crate::retry::{is_transient, RetryPolicy};

/// Per-attempt hooks the retry loop needs from a handler.
pub(crate) trait TransferHandler: curl::easy::Handler {
    /// Clear attempt state before a(nother) try. An error here is a local
    /// condition (sink reset failure) and ends the transfer without retry.
    fn begin_attempt(&mut self) -> Result<(), TransferError>;

    /// Classify a failed perform, folding in the handler's own verdicts
    /// (stall, cancellation, size limit, sink failure).
    fn failure(&mut self, error: curl::Error) -> TransferError;

    /// Build the response after a successful perform.
    fn take_response(&mut self, status: u32) -> HttpResponse;
}

/// Run one configured transfer to completion.
///
/// Transient failures are retried in place until the budget is spent, with
/// the policy's fixed pause between attempts; the handler's attempt state is
/// reset each time so nothing leaks across tries. HTTP error statuses are
/// successful transfers here: a 404 or 500 comes back as a response with
/// that code and its body, and re-polling is the caller's schedule to keep.
pub(crate) fn perform_with_retry<H: TransferHandler>(
    handle: &mut Easy2<H>,
    retry: &RetryPolicy,
    url: &str,
) -> HttpResponse {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if let Err(error) = handle.get_mut().begin_attempt() {
            return HttpResponse::from_error(error);
        }
        match handle.perform() {
            Ok(()) => {
                let status = handle.response_code().unwrap_or(0);
                tracing::trace!(url, status, attempt, "transfer complete");
                return handle.get_mut().take_response(status);
            }
            Err(e) => {
                let error = handle.get_mut().failure(e);
                if is_transient(&error) && attempt <= retry.retries {
                    tracing::warn!(url, attempt, %error, "transient transfer failure, retrying");
                    std::thread::sleep(retry.delay);
                    continue;
                }
                tracing::warn!(url, attempt, %error, "transfer failed");
                return HttpResponse::from_error(error);
            }
        }
    }
}
