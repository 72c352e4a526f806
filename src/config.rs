use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::stall::StallPolicy;

/// Transport settings for the update agent's HTTP client.
///
/// The agent embeds this as a section of its own config file. Every field
/// has a default tuned for constrained networks, so an empty section works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Additional attempts after a transient transfer failure.
    pub retry_times: u32,
    /// Pause between attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Trailing window for stall detection, in seconds.
    pub stall_window_secs: u64,
    /// Minimum average throughput over the stall window, in bytes per second.
    pub stall_min_bytes_per_sec: u64,
    /// Connect timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request deadline, in seconds. None means no deadline: image
    /// downloads can legitimately run for hours on slow links, and stall
    /// detection already covers dead transfers.
    pub request_timeout_secs: Option<u64>,
    /// Follow HTTP redirects.
    pub follow_redirects: bool,
    /// Redirect hop limit when following.
    pub max_redirects: u32,
    /// User-Agent sent with every request. None keeps the engine default.
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retry_times: 2,
            retry_delay_ms: 1000,
            stall_window_secs: 60,
            stall_min_bytes_per_sec: 5000,
            connect_timeout_secs: 30,
            request_timeout_secs: None,
            follow_redirects: true,
            max_redirects: 10,
            user_agent: None,
        }
    }
}

impl HttpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry_times,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn stall_policy(&self) -> StallPolicy {
        StallPolicy {
            window: Duration::from_secs(self.stall_window_secs),
            min_bytes_per_sec: self.stall_min_bytes_per_sec,
        }
    }
}
