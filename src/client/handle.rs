//! Handle construction from retained options.
//!
//! The engine cannot duplicate a configured handle without aliasing callback
//! state, and generic duplication loses token-engine TLS settings anyway.
//! Duplication here is therefore a rebuild: keep the knobs, apply them to a
//! fresh handle in a fixed order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use curl::easy::{Easy2, Handler};

use crate::config::HttpConfig;
use crate::creds::TlsMaterial;
use crate::error::HttpError;
use crate::headers::{CaptureSet, HeaderList};
use crate::share::ShareContext;

/// Everything a client retains to build (or rebuild) its transfer handle.
#[derive(Debug, Clone)]
pub(crate) struct HandleOptions {
    pub headers: HeaderList,
    pub capture: CaptureSet,
    /// Dial this Unix-domain socket instead of resolving the URL's host.
    pub unix_socket: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub user_agent: Option<String>,
}

impl HandleOptions {
    pub(crate) fn from_config(
        config: &HttpConfig,
        headers: HeaderList,
        capture: CaptureSet,
        unix_socket: Option<PathBuf>,
    ) -> Self {
        Self {
            headers,
            capture,
            unix_socket,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            request_timeout: config.request_timeout_secs.map(Duration::from_secs),
            follow_redirects: config.follow_redirects,
            max_redirects: config.max_redirects,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// How handles built by one client relate to each other: standalone, or all
/// attached to one shared session/connection cache.
#[derive(Debug, Clone)]
pub(crate) enum HandleMode {
    Plain,
    Shared(Arc<ShareContext>),
}

/// Build a fresh handle: signal mode, redirect policy, timeouts, transport,
/// TLS, share attachment, headers, progress reporting, in that order.
pub(crate) fn build_handle<H: Handler>(
    handler: H,
    options: &HandleOptions,
    tls: Option<&TlsMaterial>,
    mode: &HandleMode,
) -> Result<Easy2<H>, HttpError> {
    let mut handle = Easy2::new(handler);
    // Signals are process-global state; timeouts on concurrent handles must
    // not use them.
    handle.signal(false)?;
    handle.follow_location(options.follow_redirects)?;
    if options.follow_redirects {
        handle.max_redirections(options.max_redirects)?;
    }
    handle.connect_timeout(options.connect_timeout)?;
    if let Some(timeout) = options.request_timeout {
        handle.timeout(timeout)?;
    }
    if let Some(agent) = &options.user_agent {
        handle.useragent(agent)?;
    }
    if let Some(path) = &options.unix_socket {
        handle.unix_socket(&path.to_string_lossy())?;
    }
    if let Some(material) = tls {
        material.apply(&mut handle)?;
    }
    if let HandleMode::Shared(context) = mode {
        context.attach(&handle)?;
    }
    handle.http_headers(options.headers.to_curl_list()?)?;
    handle.progress(true)?;
    Ok(handle)
}
