pub mod config;
pub mod logging;

pub mod client;
pub mod creds;
pub mod error;
pub mod global;
pub mod headers;
pub mod response;
pub mod retry;
pub mod share;
pub mod stall;

pub use client::{AbortHandle, ClientBuilder, DownloadSink, HttpClient, PendingDownload};
pub use config::HttpConfig;
pub use creds::{Credential, TlsCredentials};
pub use error::HttpError;
pub use headers::HeaderList;
pub use response::{HttpResponse, TransferError};
pub use retry::RetryPolicy;
pub use share::ShareContext;
pub use stall::StallPolicy;
