//! Easy2 handler for buffered requests.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use curl::easy::{Handler, ReadError, SeekResult, WriteError};

use crate::headers::{capture_header_line, CaptureSet};
use crate::response::{HttpResponse, TransferError};
use crate::stall::{StallPolicy, StallTracker};

use super::perform::TransferHandler;

/// Progress bookkeeping shared by the buffered and streaming handlers:
/// the stall verdict and caller aborts, both signalled to the engine by
/// returning false from the progress callback.
pub(crate) struct ProgressGate {
    policy: StallPolicy,
    tracker: StallTracker,
    abort: Option<Arc<AtomicBool>>,
    stalled: bool,
    cancelled: bool,
}

impl ProgressGate {
    pub(crate) fn new(policy: StallPolicy, abort: Option<Arc<AtomicBool>>) -> Self {
        Self {
            tracker: StallTracker::new(policy),
            policy,
            abort,
            stalled: false,
            cancelled: false,
        }
    }

    pub(crate) fn set_policy(&mut self, policy: StallPolicy) {
        self.policy = policy;
    }

    /// Fresh tracker and verdicts for the next attempt.
    pub(crate) fn reset(&mut self) {
        self.tracker = StallTracker::new(self.policy);
        self.stalled = false;
        self.cancelled = false;
    }

    /// Record cumulative progress; returns false when the transfer must stop.
    pub(crate) fn observe(&mut self, transferred: u64) -> bool {
        if let Some(flag) = &self.abort {
            if flag.load(Ordering::Relaxed) {
                self.cancelled = true;
                return false;
            }
        }
        if self.tracker.observe(Instant::now(), transferred) {
            self.stalled = true;
            return false;
        }
        true
    }

    /// Mark a caller cancellation decided outside the abort flag.
    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn stalled(&self) -> bool {
        self.stalled
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Handler state for the client's own reusable handle: accumulates the
/// response body (bounded by an optional size limit), captures the requested
/// response headers, and feeds uploads from an in-memory seekable source so
/// redirects and retries can rewind.
pub(crate) struct Collector {
    capture: CaptureSet,
    captured: HashMap<String, String>,
    body: Vec<u8>,
    size_limit: Option<u64>,
    too_large: bool,
    upload: Option<Cursor<Vec<u8>>>,
    gate: ProgressGate,
}

impl Collector {
    pub(crate) fn new(capture: CaptureSet, stall: StallPolicy) -> Self {
        Self {
            capture,
            captured: HashMap::new(),
            body: Vec::new(),
            size_limit: None,
            too_large: false,
            upload: None,
            gate: ProgressGate::new(stall, None),
        }
    }

    /// Configure the next request: response size limit and upload body.
    pub(crate) fn prepare(&mut self, size_limit: Option<u64>, upload: Option<Vec<u8>>) {
        self.size_limit = size_limit;
        self.upload = upload.map(Cursor::new);
    }

    pub(crate) fn set_stall_policy(&mut self, policy: StallPolicy) {
        self.gate.set_policy(policy);
    }
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if let Some(limit) = self.size_limit {
            if self.body.len() as u64 + data.len() as u64 > limit {
                self.too_large = true;
                // Short write makes the engine abort the transfer.
                return Ok(0);
            }
        }
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn read(&mut self, into: &mut [u8]) -> Result<usize, ReadError> {
        match &mut self.upload {
            Some(source) => source.read(into).map_err(|_| ReadError::Abort),
            None => Ok(0),
        }
    }

    fn seek(&mut self, whence: SeekFrom) -> SeekResult {
        match &mut self.upload {
            Some(source) => match source.seek(whence) {
                Ok(_) => SeekResult::Ok,
                Err(_) => SeekResult::Fail,
            },
            None => SeekResult::CantSeek,
        }
    }

    fn header(&mut self, data: &[u8]) -> bool {
        capture_header_line(&self.capture, &mut self.captured, data);
        true
    }

    fn progress(&mut self, _dltotal: f64, dlnow: f64, _ultotal: f64, ulnow: f64) -> bool {
        self.gate.observe((dlnow + ulnow) as u64)
    }
}

impl TransferHandler for Collector {
    fn begin_attempt(&mut self) -> Result<(), TransferError> {
        self.body.clear();
        self.captured.clear();
        self.too_large = false;
        if let Some(source) = &mut self.upload {
            source.set_position(0);
        }
        self.gate.reset();
        Ok(())
    }

    fn failure(&mut self, error: curl::Error) -> TransferError {
        if self.too_large {
            TransferError::TooLarge {
                limit: self.size_limit.unwrap_or(0),
            }
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
            body: std::mem::take(&mut self.body),
            headers: std::mem::take(&mut self.captured),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> Collector {
        Collector::new(CaptureSet::new(["x-meta"]), StallPolicy::default())
    }

    #[test]
    fn write_accumulates_until_size_limit() {
        let mut c = collector();
        c.prepare(Some(10), None);
        assert_eq!(c.write(b"12345").unwrap(), 5);
        assert_eq!(c.write(b"67890").unwrap(), 5);
        assert_eq!(c.write(b"x").unwrap(), 0, "short write past the limit");
        assert!(c.too_large);
        let error = c.failure(curl::Error::new(curl_sys::CURLE_WRITE_ERROR));
        assert!(matches!(error, TransferError::TooLarge { limit: 10 }));
    }

    #[test]
    fn body_exactly_at_limit_is_kept() {
        let mut c = collector();
        c.prepare(Some(4), None);
        assert_eq!(c.write(b"abcd").unwrap(), 4);
        assert!(!c.too_large);
        let response = c.take_response(200);
        assert_eq!(response.body, b"abcd");
    }

    #[test]
    fn upload_source_reads_and_rewinds() {
        let mut c = collector();
        c.prepare(None, Some(b"payload".to_vec()));
        let mut buf = [0u8; 4];
        assert_eq!(c.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"payl");
        assert!(matches!(c.seek(SeekFrom::Start(0)), SeekResult::Ok));
        assert_eq!(c.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"payl");
    }

    #[test]
    fn no_upload_source_reports_eof_and_cant_seek() {
        let mut c = collector();
        let mut buf = [0u8; 4];
        assert_eq!(c.read(&mut buf).unwrap(), 0);
        assert!(matches!(c.seek(SeekFrom::Start(0)), SeekResult::CantSeek));
    }

    #[test]
    fn begin_attempt_clears_previous_state() {
        let mut c = collector();
        c.prepare(Some(100), Some(b"body".to_vec()));
        let mut buf = [0u8; 4];
        c.read(&mut buf).unwrap();
        c.write(b"partial").unwrap();
        c.header(b"X-Meta: v1\r\n");
        c.begin_attempt().unwrap();
        assert!(c.body.is_empty());
        assert!(c.captured.is_empty());
        assert_eq!(c.read(&mut buf).unwrap(), 4, "upload rewound for retry");
    }

    #[test]
    fn header_capture_respects_set() {
        let mut c = collector();
        c.header(b"HTTP/1.1 200 OK\r\n");
        c.header(b"X-Meta: kept\r\n");
        c.header(b"X-Other: dropped\r\n");
        let response = c.take_response(200);
        assert_eq!(response.header("x-meta"), Some("kept"));
        assert_eq!(response.header("x-other"), None);
    }

    #[test]
    fn abort_flag_cancels_via_progress() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut gate = ProgressGate::new(StallPolicy::default(), Some(Arc::clone(&flag)));
        assert!(gate.observe(100));
        flag.store(true, Ordering::Relaxed);
        assert!(!gate.observe(200));
        assert!(gate.cancelled());
        assert!(!gate.stalled());
    }

    #[test]
    fn gate_reset_clears_verdicts() {
        let mut gate = ProgressGate::new(StallPolicy::default(), None);
        gate.cancel();
        assert!(gate.cancelled());
        gate.reset();
        assert!(!gate.cancelled());
        assert!(!gate.stalled());
    }

    #[test]
    fn failure_prefers_handler_verdict_over_engine_code() {
        let mut c = collector();
        c.gate.stalled = true;
        let error = c.failure(curl::Error::new(curl_sys::CURLE_ABORTED_BY_CALLBACK));
        assert!(matches!(error, TransferError::Stalled));
    }
}
