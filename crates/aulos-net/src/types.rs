use std::time::Duration;

/// Configuration for [`HttpClient`](crate::HttpClient).
#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Per-request timeout, covering the full body download.
    pub request_timeout: Duration,
    /// Connection pool size per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 4,
        }
    }
}
