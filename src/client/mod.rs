//! Managed HTTP(S) client over reusable transfer handles.
//!
//! One client owns one engine handle, reused across its buffered request
//! methods so metadata polls against the update service keep their
//! connection. Streaming downloads run on short-lived handles built from
//! the same retained options, leaving the main handle untouched. Cloning a
//! client duplicates every piece of configuration onto independent
//! resources; clones of a shared-mode client reuse one session cache.

mod collector;
mod download;
mod handle;
mod perform;

pub use download::{AbortHandle, DownloadSink, PendingDownload};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use curl::easy::Easy2;
use serde_json::Value;

use crate::config::HttpConfig;
use crate::creds::{TlsCredentials, TlsMaterial};
use crate::error::HttpError;
use crate::global::{self, EngineInit};
use crate::headers::{CaptureSet, HeaderList};
use crate::response::HttpResponse;
use crate::retry::RetryPolicy;
use crate::share::ShareContext;
use crate::stall::StallPolicy;

use collector::Collector;
use handle::{build_handle, HandleMode, HandleOptions};
use perform::perform_with_retry;

/// Configures and builds an [`HttpClient`].
#[derive(Default)]
pub struct ClientBuilder {
    config: HttpConfig,
    headers: HeaderList,
    capture: CaptureSet,
    unix_socket: Option<PathBuf>,
    share: Option<Arc<ShareContext>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport settings; the defaults are tuned for constrained networks.
    pub fn config(mut self, config: HttpConfig) -> Self {
        self.config = config;
        self
    }

    /// Extra request header sent with every request.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.update(name, value);
        self
    }

    /// Response header names to capture into each response.
    pub fn capture_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.capture = CaptureSet::new(names);
        self
    }

    /// Route requests over a Unix-domain socket instead of DNS + TCP, for
    /// talking to a co-located service without network exposure.
    pub fn unix_socket(mut self, path: impl AsRef<Path>) -> Self {
        self.unix_socket = Some(path.as_ref().to_path_buf());
        self
    }

    /// Attach a shared session/connection cache. Every handle this client
    /// and its clones build will reuse it.
    pub fn share(mut self, context: Arc<ShareContext>) -> Self {
        self.share = Some(context);
        self
    }

    pub fn build(self) -> Result<HttpClient, HttpError> {
        let engine = global::acquire();
        let retry = self.config.retry_policy();
        let stall = self.config.stall_policy();
        let options = HandleOptions::from_config(
            &self.config,
            self.headers,
            self.capture,
            self.unix_socket,
        );
        let mode = match self.share {
            Some(context) => HandleMode::Shared(context),
            None => HandleMode::Plain,
        };
        let handle = build_handle(
            Collector::new(options.capture.clone(), stall),
            &options,
            None,
            &mode,
        )?;
        Ok(HttpClient {
            handle,
            options,
            tls: None,
            mode,
            retry,
            stall,
            engine,
        })
    }
}

/// Managed client for update-service requests and image downloads.
pub struct HttpClient {
    // Declared first so the handle detaches from the share context before
    // the context itself can drop.
    handle: Easy2<Collector>,
    options: HandleOptions,
    tls: Option<TlsMaterial>,
    mode: HandleMode,
    retry: RetryPolicy,
    stall: StallPolicy,
    engine: Arc<EngineInit>,
}

impl HttpClient {
    /// Client with default settings.
    pub fn new() -> Result<Self, HttpError> {
        ClientBuilder::new().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// GET `url`, buffering at most `size_limit` response bytes when set;
    /// a larger body aborts the transfer instead of growing without bound.
    pub fn get(&mut self, url: &str, size_limit: Option<u64>) -> Result<HttpResponse, HttpError> {
        tracing::debug!(url, "GET");
        self.handle.url(url)?;
        self.handle.get(true)?;
        self.handle.http_headers(self.options.headers.to_curl_list()?)?;
        self.handle.get_mut().prepare(size_limit, None);
        Ok(self.perform(url))
    }

    /// POST `body` with the given content type.
    pub fn post(
        &mut self,
        url: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpResponse, HttpError> {
        tracing::debug!(url, content_type, "POST");
        self.handle.url(url)?;
        self.handle.post(true)?;
        self.handle.post_fields_copy(body)?;
        self.handle.http_headers(self.content_headers(content_type)?)?;
        self.handle.get_mut().prepare(None, None);
        Ok(self.perform(url))
    }

    /// POST a JSON document.
    pub fn post_json(&mut self, url: &str, data: &Value) -> Result<HttpResponse, HttpError> {
        let body = serde_json::to_vec(data)?;
        self.post(url, "application/json", &body)
    }

    /// PUT `body` with the given content type. Uses the engine's upload path
    /// with a seekable source so redirects and retries can rewind the body.
    pub fn put(
        &mut self,
        url: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpResponse, HttpError> {
        tracing::debug!(url, content_type, "PUT");
        self.handle.url(url)?;
        self.handle.upload(true)?;
        self.handle.in_filesize(body.len() as u64)?;
        self.handle.http_headers(self.content_headers(content_type)?)?;
        self.handle.get_mut().prepare(None, Some(body.to_vec()));
        Ok(self.perform(url))
    }

    /// PUT a JSON document.
    pub fn put_json(&mut self, url: &str, data: &Value) -> Result<HttpResponse, HttpError> {
        let body = serde_json::to_vec(data)?;
        self.put(url, "application/json", &body)
    }

    /// Insert or replace a default request header. Returns true when an
    /// existing header was replaced rather than appended.
    pub fn update_header(&mut self, name: &str, value: &str) -> bool {
        self.options.headers.update(name, value)
    }

    /// Whole-request deadline for this client, carried over to clones.
    pub fn timeout(&mut self, timeout: Duration) -> Result<(), HttpError> {
        self.options.request_timeout = Some(timeout);
        self.handle.timeout(timeout)?;
        Ok(())
    }

    /// Point the client at TLS credentials, staging inline material into
    /// owner-only temp files. Files staged by an earlier call are removed.
    pub fn set_certs(&mut self, creds: &TlsCredentials) -> Result<(), HttpError> {
        let material = TlsMaterial::materialize(creds)?;
        material.apply(&mut self.handle)?;
        // Replace only after the new options are applied; the old temp
        // files are unlinked by the drop.
        self.tls = Some(material);
        Ok(())
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry = policy;
    }

    pub fn set_stall_policy(&mut self, policy: StallPolicy) {
        self.stall = policy;
        self.handle.get_mut().set_stall_policy(policy);
    }

    /// Duplicate this client: deep-copies the header list, stages fresh
    /// credential temp files from the original sources, and builds an
    /// independent handle. A clone of a shared-mode client attaches to the
    /// same session cache.
    pub fn try_clone(&self) -> Result<Self, HttpError> {
        let options = self.options.clone();
        let tls = match &self.tls {
            Some(material) => Some(TlsMaterial::materialize(material.source())?),
            None => None,
        };
        let handle = build_handle(
            Collector::new(options.capture.clone(), self.stall),
            &options,
            tls.as_ref(),
            &self.mode,
        )?;
        Ok(Self {
            handle,
            options,
            tls,
            mode: self.mode.clone(),
            retry: self.retry,
            stall: self.stall,
            engine: Arc::clone(&self.engine),
        })
    }

    /// Streaming GET writing to `sink`. `from > 0` resumes a partial
    /// download at that byte offset. Runs on its own handle; the client's
    /// main handle and its connection stay untouched.
    pub fn download(
        &self,
        url: &str,
        from: u64,
        sink: &mut dyn DownloadSink,
    ) -> Result<HttpResponse, HttpError> {
        tracing::debug!(url, from, "download");
        download::run_download(
            sink,
            url,
            from,
            &self.options,
            self.tls.as_ref(),
            &self.mode,
            self.stall,
            &self.retry,
            None,
        )
    }

    /// [`download`](Self::download) on a worker thread. The returned handle
    /// waits for the result and exposes cancellation; dropping it detaches
    /// the worker.
    pub fn download_async<S>(
        &self,
        url: &str,
        from: u64,
        sink: S,
    ) -> Result<PendingDownload<S>, HttpError>
    where
        S: DownloadSink + Send + 'static,
    {
        tracing::debug!(url, from, "async download");
        let abort = AbortHandle::new();
        let flag = abort.flag();
        let options = self.options.clone();
        // The worker must not depend on this client staying alive, so it
        // stages its own credential files.
        let tls = match &self.tls {
            Some(material) => Some(TlsMaterial::materialize(material.source())?),
            None => None,
        };
        let mode = self.mode.clone();
        let engine = Arc::clone(&self.engine);
        let retry = self.retry;
        let stall = self.stall;
        let url = url.to_string();
        let worker = thread::Builder::new()
            .name("ota-http-download".to_string())
            .spawn(move || {
                let _engine = engine;
                let mut sink = sink;
                let response = download::run_download(
                    &mut sink,
                    &url,
                    from,
                    &options,
                    tls.as_ref(),
                    &mode,
                    stall,
                    &retry,
                    Some(flag),
                )?;
                Ok((response, sink))
            })
            .map_err(HttpError::Worker)?;
        Ok(PendingDownload::new(worker, abort))
    }

    fn content_headers(&self, content_type: &str) -> Result<curl::easy::List, curl::Error> {
        let mut headers = self.options.headers.clone();
        headers.update("Content-Type", content_type);
        headers.to_curl_list()
    }

    fn perform(&mut self, url: &str) -> HttpResponse {
        perform_with_retry(&mut self.handle, &self.retry, url)
    }
}
