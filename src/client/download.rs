//! Streaming downloads: caller sinks, resume offsets, async offload.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use curl::easy::{Handler, WriteError};

use crate::creds::TlsMaterial;
use crate::error::HttpError;
use crate::headers::{capture_header_line, CaptureSet};
use crate::response::{HttpResponse, TransferError};
use crate::retry::RetryPolicy;
use crate::stall::StallPolicy;

use super::collector::ProgressGate;
use super::handle::{build_handle, HandleMode, HandleOptions};
use super::perform::{perform_with_retry, TransferHandler};

/// Receives download bytes as they arrive.
///
/// The body streams through `write` instead of buffering in the response;
/// the engine delivers whatever the server sends, so on an HTTP error status
/// the sink sees the error body and the caller decides what to keep after
/// checking the response.
pub trait DownloadSink {
    /// Consume the next body chunk. An error ends the transfer for good; a
    /// failing sink is a local condition, never retried.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Transfer progress: expected total (0 when unknown) and bytes received
    /// so far in this attempt. Return false to cancel the download.
    fn progress(&mut self, total: u64, transferred: u64) -> bool {
        let _ = (total, transferred);
        true
    }

    /// Called before each retry attempt so the sink can discard partial
    /// output from the failed one.
    fn reset(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DownloadSink for Vec<u8> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn reset(&mut self) -> io::Result<()> {
        self.clear();
        Ok(())
    }
}

impl<D: DownloadSink + ?Sized> DownloadSink for &mut D {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn progress(&mut self, total: u64, transferred: u64) -> bool {
        (**self).progress(total, transferred)
    }

    fn reset(&mut self) -> io::Result<()> {
        (**self).reset()
    }
}

/// Handler for streaming transfers: body bytes go to the sink, not memory.
pub(crate) struct StreamCollector<S> {
    sink: S,
    capture: CaptureSet,
    captured: HashMap<String, String>,
    sink_error: Option<String>,
    gate: ProgressGate,
}

impl<S: DownloadSink> StreamCollector<S> {
    pub(crate) fn new(
        sink: S,
        capture: CaptureSet,
        stall: StallPolicy,
        abort: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            sink,
            capture,
            captured: HashMap::new(),
            sink_error: None,
            gate: ProgressGate::new(stall, abort),
        }
    }
}

impl<S: DownloadSink> Handler for StreamCollector<S> {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        match self.sink.write(data) {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                self.sink_error = Some(e.to_string());
                Ok(0)
            }
        }
    }

    fn header(&mut self, data: &[u8]) -> bool {
        capture_header_line(&self.capture, &mut self.captured, data);
        true
    }

    fn progress(&mut self, dltotal: f64, dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        if !self.gate.observe(dlnow as u64) {
            return false;
        }
        if !self.sink.progress(dltotal as u64, dlnow as u64) {
            self.gate.cancel();
            return false;
        }
        true
    }
}

impl<S: DownloadSink> TransferHandler for StreamCollector<S> {
    fn begin_attempt(&mut self) -> Result<(), TransferError> {
        self.captured.clear();
        self.sink_error = None;
        self.gate.reset();
        self.sink.reset().map_err(|e| TransferError::Sink {
            message: e.to_string(),
        })
    }

    fn failure(&mut self, error: curl::Error) -> TransferError {
        if let Some(message) = self.sink_error.take() {
            TransferError::Sink { message }
        } else if self.gate.stalled() {
            TransferError::Stalled
        } else if self.gate.cancelled() {
            TransferError::Cancelled
        } else {
            TransferError::Engine(error)
        }
    }

    fn take_response(&mut self, status: u32) -> HttpResponse {
        HttpResponse {
            status,
            body: Vec::new(),
            headers: std::mem::take(&mut self.captured),
            error: None,
        }
    }
}

/// Run a streaming GET on a freshly built handle.
///
/// `from > 0` asks the server for the remainder via the engine's resume
/// offset, for continuing a partial image download.
pub(super) fn run_download<S: DownloadSink>(
    sink: S,
    url: &str,
    from: u64,
    options: &HandleOptions,
    tls: Option<&TlsMaterial>,
    mode: &HandleMode,
    stall: StallPolicy,
    retry: &RetryPolicy,
    abort: Option<Arc<AtomicBool>>,
) -> Result<HttpResponse, HttpError> {
    let collector = StreamCollector::new(sink, options.capture.clone(), stall, abort);
    let mut handle = build_handle(collector, options, tls, mode)?;
    handle.url(url)?;
    handle.get(true)?;
    if from > 0 {
        handle.resume_from(from)?;
    }
    Ok(perform_with_retry(&mut handle, retry, url))
}

/// Requests cancellation of an in-flight download.
///
/// The transfer's progress callback observes the flag and makes the engine
/// abort; a caller abort is final and never retried.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub(super) fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(super) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn request_abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// A download running on its own worker thread.
///
/// `wait` joins the worker and yields the response together with the sink.
/// Dropping without waiting detaches the worker: the transfer runs to
/// completion and its result is discarded.
pub struct PendingDownload<S> {
    worker: Option<JoinHandle<Result<(HttpResponse, S), HttpError>>>,
    abort: AbortHandle,
}

impl<S> PendingDownload<S> {
    pub(super) fn new(
        worker: JoinHandle<Result<(HttpResponse, S), HttpError>>,
        abort: AbortHandle,
    ) -> Self {
        Self {
            worker: Some(worker),
            abort,
        }
    }

    /// Handle for aborting the transfer from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Block until the download finishes.
    pub fn wait(mut self) -> Result<(HttpResponse, S), HttpError> {
        let worker = self.worker.take().expect("pending download already waited");
        worker
            .join()
            .unwrap_or_else(|e| panic!("download worker panicked: {:?}", e))
    }
}

impl<S> Drop for PendingDownload<S> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            tracing::debug!("pending download dropped without wait, detaching worker");
        }
    }
}
