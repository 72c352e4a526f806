//! Transfer outcomes: the response object and classified transfer errors.

use std::collections::HashMap;
use std::fmt;

/// Why a transfer produced no usable response.
///
/// Carried inside `HttpResponse` after the retry budget is spent; callers
/// never see a raw engine code.
#[derive(Debug, Clone)]
pub enum TransferError {
    /// The engine reported a failure (timeout, reset, resolve, TLS, ...).
    Engine(curl::Error),
    /// Aborted by stall detection: throughput under the floor for a full window.
    Stalled,
    /// Aborted by the caller, via an abort handle or a progress callback.
    Cancelled,
    /// Response body exceeded the caller's size limit.
    TooLarge { limit: u64 },
    /// The caller's sink refused downloaded bytes. Not retried: the sink is
    /// local state, not a network condition.
    Sink { message: String },
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Engine(e) => write!(f, "{}", e),
            TransferError::Stalled => write!(f, "transfer stalled below speed floor"),
            TransferError::Cancelled => write!(f, "transfer cancelled by caller"),
            TransferError::TooLarge { limit } => {
                write!(f, "response exceeded {} byte limit", limit)
            }
            TransferError::Sink { message } => write!(f, "sink write failed: {}", message),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of one request, after all retries.
///
/// HTTP error statuses are not transfer errors: a 404 comes back with
/// `status == 404`, its body, and no `error`. A failed transfer has
/// `status == 0`, an empty body and the error that ended the last attempt.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u32,
    pub body: Vec<u8>,
    /// Captured response headers, keyed by lowercased name.
    pub headers: HashMap<String, String>,
    pub error: Option<TransferError>,
}

impl HttpResponse {
    pub(crate) fn from_error(error: TransferError) -> Self {
        Self {
            status: 0,
            body: Vec::new(),
            headers: HashMap::new(),
            error: Some(error),
        }
    }

    /// True when the transfer succeeded and the status is 2xx or 3xx.
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.status >= 200 && self.status < 400
    }

    /// Body as text, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Captured header by name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.trim().to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_response(status: u32) -> HttpResponse {
        HttpResponse {
            status,
            body: Vec::new(),
            headers: HashMap::new(),
            error: None,
        }
    }

    #[test]
    fn is_ok_bounds() {
        assert!(!ok_response(199).is_ok());
        assert!(ok_response(200).is_ok());
        assert!(ok_response(204).is_ok());
        assert!(ok_response(399).is_ok());
        assert!(!ok_response(404).is_ok());
        assert!(!ok_response(500).is_ok());
    }

    #[test]
    fn transfer_error_is_never_ok() {
        let r = HttpResponse::from_error(TransferError::Stalled);
        assert!(!r.is_ok());
        assert_eq!(r.status, 0);
        assert!(r.body.is_empty());
    }

    #[test]
    fn json_parses_body() {
        let mut r = ok_response(200);
        r.body = br#"{"target":"image-2.1","size":4096}"#.to_vec();
        let v = r.json().unwrap();
        assert_eq!(v["target"], "image-2.1");
        assert_eq!(v["size"], 4096);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut r = ok_response(200);
        r.headers.insert("x-ats-role".to_string(), "director".to_string());
        assert_eq!(r.header("X-ATS-Role"), Some("director"));
        assert_eq!(r.header("x-ats-role"), Some("director"));
        assert_eq!(r.header("missing"), None);
    }

    #[test]
    fn display_names_the_failure() {
        assert_eq!(
            TransferError::TooLarge { limit: 100 }.to_string(),
            "response exceeded 100 byte limit"
        );
        assert_eq!(
            TransferError::Sink { message: "disk full".into() }.to_string(),
            "sink write failed: disk full"
        );
    }
}
