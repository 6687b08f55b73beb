//! Default values for timeouts, retry budgets and intervals
//!
//! Every value here can be overridden from `config/main.toml`; these are only
//! the fallbacks used when a section or field is omitted.

use std::time::Duration;

/// Administrative channel establishment
pub mod connection {
    use super::Duration;

    /// Attempts made for transient network failures (authentication is never retried)
    pub const ATTEMPTS: u32 = 3;

    /// First backoff delay; doubled after every failed attempt
    pub const BACKOFF_BASE_MS: u64 = 2000;

    /// Upper bound for a single backoff delay
    pub const BACKOFF_MAX_MS: u64 = 16_000;

    /// Overall budget for `connect`, all attempts included
    pub const TIMEOUT_SECONDS: u64 = 30;

    /// Default port of the remote execution agent
    pub const AGENT_PORT: u16 = 8745;

    /// Timeout for a single HTTP request to the agent
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Timeout for establishing the TCP connection to the agent
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Timeout for a single port probe during health checks
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
}

/// Helper deployment and health checking
pub mod deployment {
    /// Health check attempts before a deployment is declared failed
    pub const HEALTH_CHECK_ATTEMPTS: u32 = 10;

    /// Delay between two health check attempts
    pub const HEALTH_CHECK_INTERVAL_MS: u64 = 500;

    /// Budget for the whole health check loop
    pub const HEALTH_CHECK_TIMEOUT_SECONDS: u64 = 15;

    /// Binary copy attempts on transient network errors
    pub const COPY_ATTEMPTS: u32 = 3;
    pub const COPY_BACKOFF_BASE_MS: u64 = 1000;
    pub const COPY_BACKOFF_MAX_MS: u64 = 8000;

    /// Remote directory receiving copied helper binaries
    pub const REMOTE_WORK_DIR: &str = "C:\\Windows\\Temp\\acquisition";
}

/// Progress polling
pub mod progress {
    /// Interval between two polls of the same deployment
    pub const POLL_INTERVAL_SECONDS: u64 = 5;

    /// Consecutive failed polls tolerated before the acquisition is declared stalled
    pub const STALL_THRESHOLD: u32 = 12;
}

/// Teardown of remote state
pub mod cleanup {
    /// Attempts per teardown item before it is reported as failed
    pub const TEARDOWN_ATTEMPTS: u32 = 3;

    /// Delay between two teardown attempts of the same item
    pub const RETRY_DELAY_MS: u64 = 1000;

    /// Interval of the background retry for sessions left with residual remote state
    pub const AUTO_RETRY_INTERVAL_SECONDS: u64 = 600;
}

/// Limits and constraints
pub mod limits {
    /// Capacity of the session event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;

    /// Capacity of the per-session progress channel
    pub const PROGRESS_CHANNEL_CAPACITY: usize = 32;
}

/// HTTP surface defaults
pub mod server {
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 8095;
}
