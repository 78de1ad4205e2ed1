#![forbid(unsafe_code)]

use std::time::Duration;

/// Tunables for an HDS stream.
#[derive(Clone, Debug)]
pub struct HdsOptions {
    /// How far ahead of the reader the VOD path keeps fragments queued.
    pub download_leadtime: Duration,
    /// Reported to the host as the stream's pts delay.
    pub network_caching: Duration,
    /// Override for the live bootstrap refresh cadence. `None` tracks the
    /// current fragment duration.
    pub live_refresh_interval: Option<Duration>,
    /// Sanity cap on a single fragment download.
    pub max_fragment_bytes: usize,
}

impl Default for HdsOptions {
    fn default() -> Self {
        Self {
            download_leadtime: Duration::from_secs(15),
            network_caching: Duration::from_millis(1000),
            live_refresh_interval: None,
            max_fragment_bytes: 50 * 1024 * 1024,
        }
    }
}

impl HdsOptions {
    /// Set the VOD prefetch horizon.
    pub fn with_download_leadtime(mut self, leadtime: Duration) -> Self {
        self.download_leadtime = leadtime;
        self
    }

    /// Set the pts delay reported through the control surface.
    pub fn with_network_caching(mut self, caching: Duration) -> Self {
        self.network_caching = caching;
        self
    }

    /// Pin the live refresh cadence instead of tracking fragment duration.
    pub fn with_live_refresh_interval(mut self, interval: Duration) -> Self {
        self.live_refresh_interval = Some(interval);
        self
    }

    /// Set the per-fragment size cap.
    pub fn with_max_fragment_bytes(mut self, max: usize) -> Self {
        self.max_fragment_bytes = max;
        self
    }
}
