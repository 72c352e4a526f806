//! Local resource failures the client cannot work around.

use std::io;
use thiserror::Error;

/// Error for conditions that mean the local environment is broken.
///
/// Transfer failures (timeouts, resets, stalls) never appear here; they are
/// retried inside `perform` and then reported through `HttpResponse::error`.
/// An `HttpError` is immediate and final: a temp file could not be created,
/// a token id cannot cross the engine boundary, the engine rejected an
/// option. Callers should treat it as fatal for the request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Staging inline credential material to a temp file failed.
    #[error("credential temp file: {0}")]
    Io(#[from] io::Error),

    /// The CA bundle must be file-backed; only cert and key may live on a token.
    #[error("CA bundle cannot be token-backed")]
    CaOnToken,

    /// Token identifier contains a NUL byte.
    #[error("invalid hardware token id: {0:?}")]
    TokenId(String),

    /// Serializing a JSON request body failed.
    #[error("encode json body: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine rejected a handle option.
    #[error("engine option: {0}")]
    Engine(#[from] curl::Error),

    /// The engine share object could not be allocated or configured.
    #[error("share context: {0}")]
    Share(String),

    /// Spawning the download worker thread failed.
    #[error("download worker: {0}")]
    Worker(io::Error),
}
