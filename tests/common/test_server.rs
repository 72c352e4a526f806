//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves one configurable response, records every request it answers, and
//! counts accepted connections. Every response carries `Connection: close`,
//! so the connection count equals the client's attempt count. Options cover
//! the failure shapes the client must handle: connections dropped without a
//! response, bodies dripped below the stall floor, a redirect hop before the
//! real response, and Range resumption.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TestServerOptions {
    /// Status line after "HTTP/1.1 ", e.g. "200 OK" or "404 Not Found".
    pub status: &'static str,
    pub body: Vec<u8>,
    /// Extra headers on the (final) response.
    pub headers: Vec<(&'static str, &'static str)>,
    /// If set, any request for a different path is answered with a 302 to
    /// this path; the configured response is served at the path itself.
    pub redirect_path: Option<&'static str>,
    /// Extra headers on the 302 hop.
    pub redirect_headers: Vec<(&'static str, &'static str)>,
    /// Read the request on the first N connections, then close without
    /// responding. The client sees an empty reply.
    pub fail_first_connections: usize,
    /// If nonzero, write the body in chunks of this size...
    pub drip_chunk: usize,
    /// ...sleeping this long after each chunk.
    pub drip_pause: Duration,
    /// Honor `Range: bytes=N-` with a 206 instead of the full body.
    pub support_ranges: bool,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            status: "200 OK",
            body: Vec::new(),
            headers: Vec::new(),
            redirect_path: None,
            redirect_headers: Vec::new(),
            fail_first_connections: 0,
            drip_chunk: 0,
            drip_pause: Duration::ZERO,
            support_ranges: false,
        }
    }
}

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Header value by name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Start offset of an open-ended `Range: bytes=N-` header.
    fn range_start(&self) -> Option<u64> {
        let value = self.header("Range")?;
        let spec = value.trim().strip_prefix("bytes=")?;
        let (start, rest) = spec.split_once('-')?;
        if !rest.is_empty() {
            return None;
        }
        start.trim().parse().ok()
    }
}

struct ServerState {
    options: TestServerOptions,
    requests: Mutex<Vec<RecordedRequest>>,
    connections: AtomicUsize,
}

/// Handle to a server running in background threads until the process exits.
pub struct TestServer {
    /// Base URL, e.g. "http://127.0.0.1:12345/".
    pub url: String,
    state: Arc<ServerState>,
}

impl TestServer {
    /// Requests answered so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Connections accepted so far, including dropped ones.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// URL of `path` on this server.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.url, path.trim_start_matches('/'))
    }
}

/// Starts a server with default options serving `body`.
pub fn start(body: Vec<u8>) -> TestServer {
    start_with_options(TestServerOptions {
        body,
        ..TestServerOptions::default()
    })
}

pub fn start_with_options(options: TestServerOptions) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(ServerState {
        options,
        requests: Mutex::new(Vec::new()),
        connections: AtomicUsize::new(0),
    });
    let accept_state = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
            let state = Arc::clone(&accept_state);
            thread::spawn(move || handle(stream, &state));
        }
    });
    TestServer {
        url: format!("http://127.0.0.1:{}/", port),
        state,
    }
}

/// Like `start_with_options` but listening on a Unix-domain socket. The host
/// in the returned URL is a placeholder; the socket carries the request.
pub fn start_unix(options: TestServerOptions, socket: &Path) -> TestServer {
    let listener = UnixListener::bind(socket).expect("bind unix socket");
    let state = Arc::new(ServerState {
        options,
        requests: Mutex::new(Vec::new()),
        connections: AtomicUsize::new(0),
    });
    let accept_state = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
            let state = Arc::clone(&accept_state);
            thread::spawn(move || handle(stream, &state));
        }
    });
    TestServer {
        url: "http://localhost/".to_string(),
        state,
    }
}

fn handle<S: Read + Write>(mut stream: S, state: &ServerState) {
    let served = state.connections.fetch_add(1, Ordering::SeqCst);
    let mut buf = Vec::new();
    let Some(header_end) = read_header_block(&mut stream, &mut buf) else {
        return;
    };
    let Some(mut request) = parse_request(&buf[..header_end]) else {
        return;
    };
    if served < state.options.fail_first_connections {
        // Request consumed, connection closed, nothing sent back.
        return;
    }
    if request
        .header("Expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    {
        let _ = stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n");
    }
    let content_length: usize = request
        .header("Content-Length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end..].to_vec();
    if !read_body(&mut stream, &mut body, content_length) {
        return;
    }
    request.body = body;
    state.requests.lock().unwrap().push(request.clone());
    respond(&mut stream, state, &request);
}

/// Reads until the `\r\n\r\n` header terminator; returns the index just past it.
fn read_header_block<S: Read>(stream: &mut S, buf: &mut Vec<u8>) -> Option<usize> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            return Some(pos + 4);
        }
        match stream.read(&mut chunk) {
            Ok(0) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => return None,
        }
    }
}

fn read_body<S: Read>(stream: &mut S, body: &mut Vec<u8>, content_length: usize) -> bool {
    let mut chunk = [0u8; 4096];
    while body.len() < content_length {
        match stream.read(&mut chunk) {
            Ok(0) => return false,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
            Err(_) => return false,
        }
    }
    body.truncate(content_length);
    true
}

fn parse_request(header_block: &[u8]) -> Option<RecordedRequest> {
    let text = std::str::from_utf8(header_block).ok()?;
    let mut lines = text.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    let mut headers = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    Some(RecordedRequest {
        method,
        path,
        headers,
        body: Vec::new(),
    })
}

fn respond<S: Write>(stream: &mut S, state: &ServerState, request: &RecordedRequest) {
    let opts = &state.options;
    if let Some(target) = opts.redirect_path {
        if request.path != target {
            let mut response = format!(
                "HTTP/1.1 302 Found\r\nConnection: close\r\nLocation: {}\r\nContent-Length: 0\r\n",
                target
            );
            for (name, value) in &opts.redirect_headers {
                response.push_str(&format!("{}: {}\r\n", name, value));
            }
            response.push_str("\r\n");
            let _ = stream.write_all(response.as_bytes());
            return;
        }
    }
    let total = opts.body.len() as u64;
    let (status, slice, content_range) = match request.range_start() {
        Some(from) if opts.support_ranges && from < total => (
            "206 Partial Content",
            &opts.body[from as usize..],
            Some(format!("bytes {}-{}/{}", from, total - 1, total)),
        ),
        _ => (opts.status, &opts.body[..], None),
    };
    let mut response = format!(
        "HTTP/1.1 {}\r\nConnection: close\r\nContent-Length: {}\r\n",
        status,
        slice.len()
    );
    if let Some(range) = content_range {
        response.push_str(&format!("Content-Range: {}\r\n", range));
    }
    for (name, value) in &opts.headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("\r\n");
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }
    if opts.drip_chunk > 0 {
        for chunk in slice.chunks(opts.drip_chunk) {
            if stream.write_all(chunk).is_err() {
                return;
            }
            thread::sleep(opts.drip_pause);
        }
    } else {
        let _ = stream.write_all(slice);
    }
}
