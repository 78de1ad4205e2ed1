//! The stream filter façade.
//!
//! [`FlvStream::open`] recognizes HDS input, parses the manifest, pairs a
//! media entry with its bootstrap, and starts the workers. The host then
//! drains one continuous FLV byte stream through [`FlvStream::read`]: the
//! fixed 13-byte header first, then each fragment's `mdat` payload in
//! timeline order.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use aulos_net::Net;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{HdsError, HdsResult};
use crate::flv::FLV_HEADER;
use crate::manifest::{BootstrapInfo, Manifest, MediaInfo};
use crate::options::HdsOptions;
use crate::pipeline::{self, Shared};
use crate::{bootstrap, detect, manifest};

/// What the host may do with this stream.
///
/// The output is forward-only: no seeking, no pausing; the host controls the
/// pace and should buffer `pts_delay` worth of data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamCaps {
    pub can_seek: bool,
    pub can_fastseek: bool,
    pub can_pause: bool,
    pub can_control_pace: bool,
    pub pts_delay: Duration,
}

/// An open HDS stream delivering FLV bytes.
#[derive(Debug)]
pub struct FlvStream {
    shared: Arc<Shared>,
    dl_task: Option<JoinHandle<()>>,
    live_task: Option<JoinHandle<()>>,
    header_sent: usize,
    eof: bool,
}

impl FlvStream {
    /// Fetch and recognize the manifest at `manifest_url`, then set up the
    /// stream.
    ///
    /// Returns [`HdsError::NotHds`] when the document is not an HDS manifest,
    /// so a caller multiplexing filters can try the next one.
    pub async fn open(
        manifest_url: Url,
        opts: HdsOptions,
        net: Arc<dyn Net>,
    ) -> HdsResult<Self> {
        let raw = net.get_bytes(manifest_url.clone()).await?;
        if !detect::is_hds(&raw) {
            return Err(HdsError::NotHds);
        }
        info!(url = %manifest_url, "HTTP Dynamic Streaming");

        let text = detect::manifest_text(&raw);
        let parsed = manifest::parse_manifest(&text)?;
        let base_url = base_of(&manifest_url);

        let shared = build_stream(&parsed, base_url, opts)?;

        let dl_task = tokio::spawn(pipeline::download_worker(shared.clone(), net.clone()));
        shared.dl_notify.notify_one();

        let live_task = if shared.live {
            info!("live stream detected");
            Some(tokio::spawn(pipeline::live_worker(shared.clone(), net)))
        } else {
            None
        };

        Ok(Self {
            shared,
            dl_task: Some(dl_task),
            live_task,
            header_sent: 0,
            eof: false,
        })
    }

    /// Read FLV bytes into `buf`.
    ///
    /// Waits until at least one byte is available. `Ok(0)` means end of
    /// stream (or a closed stream); a fatal timeline failure surfaces here
    /// once.
    pub async fn read(&mut self, buf: &mut [u8]) -> HdsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut written = self.send_header(buf);
        if written == buf.len() {
            return Ok(written);
        }

        loop {
            if let Some(err) = self.shared.fatal.lock().take() {
                self.eof = true;
                return Err(err);
            }
            if self.eof {
                return Ok(written);
            }

            written += self.drain_chunks(&mut buf[written..]);
            if !self.shared.live {
                // keep the lead-time horizon of fragments on order
                pipeline::extend_vod_queue(&self.shared);
            }

            if written > 0 || self.eof {
                return Ok(written);
            }
            if self.shared.cancel.is_cancelled() {
                return Ok(0);
            }

            // The next chunk has no payload yet. If it failed, the download
            // worker is parked waiting for a signal; nudge it so the retry
            // does not depend on queue growth.
            {
                let queue = self.shared.queue.lock();
                let mut seq = queue.head_seq();
                if self.shared.live && let Some(pos) = queue.live_read_pos {
                    seq = seq.max(pos);
                }
                if queue.get(seq).is_some_and(|c| c.failed && c.mdat.is_none()) {
                    self.shared.dl_notify.notify_one();
                }
            }

            tokio::select! {
                _ = self.shared.cancel.cancelled() => return Ok(written),
                _ = self.shared.data_notify.notified() => {}
            }
        }
    }

    /// Look at upcoming bytes without consuming them.
    ///
    /// Returns a window into the FLV header (while unsent) or into the head
    /// chunk's unread `mdat`; never spans chunks. Empty when nothing is
    /// buffered yet.
    pub fn peek(&self, max: usize) -> Bytes {
        if max == 0 {
            return Bytes::new();
        }
        if self.header_sent < FLV_HEADER.len() {
            let end = FLV_HEADER.len().min(self.header_sent + max);
            return Bytes::from_static(&FLV_HEADER[self.header_sent..end]);
        }

        let queue = self.shared.queue.lock();
        match queue.head() {
            Some(chunk) if !chunk.failed => match &chunk.mdat {
                Some(mdat) => {
                    let end = mdat.len().min(chunk.mdat_pos + max);
                    mdat.slice(chunk.mdat_pos..end)
                }
                None => Bytes::new(),
            },
            _ => Bytes::new(),
        }
    }

    /// Control surface reported to the host.
    pub fn caps(&self) -> StreamCaps {
        StreamCaps {
            can_seek: false,
            can_fastseek: false,
            can_pause: false,
            can_control_pace: true,
            pts_delay: self.shared.opts.network_caching,
        }
    }

    pub fn is_live(&self) -> bool {
        self.shared.live
    }

    /// Fragments published by the download worker so far.
    pub fn downloaded_fragments(&self) -> u64 {
        self.shared.chunk_count.load(Ordering::Relaxed)
    }

    /// Cancel the workers and wait for them to stop.
    pub async fn close(mut self) {
        self.shutdown();
        if let Some(task) = self.dl_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.live_task.take() {
            let _ = task.await;
        }
    }

    fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.shared.dl_notify.notify_one();
        self.shared.data_notify.notify_one();
    }

    fn send_header(&mut self, buf: &mut [u8]) -> usize {
        let remaining = &FLV_HEADER[self.header_sent..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.header_sent += n;
        n
    }

    /// Copy available `mdat` bytes, freeing drained chunks (VOD) or walking
    /// the live read position past them (live).
    fn drain_chunks(&mut self, buf: &mut [u8]) -> usize {
        let live = self.shared.live;
        let mut queue = self.shared.queue.lock();
        let mut written = 0;

        let mut seq = queue.head_seq();
        if live && let Some(pos) = queue.live_read_pos {
            seq = seq.max(pos);
        }

        loop {
            let Some(chunk) = queue.get_mut(seq) else { break };
            let Some(mdat) = chunk.mdat.clone() else { break };

            if chunk.eof && chunk.mdat_pos >= mdat.len() {
                self.eof = true;
                break;
            }

            if written < buf.len() && chunk.mdat_pos < mdat.len() {
                let n = (mdat.len() - chunk.mdat_pos).min(buf.len() - written);
                buf[written..written + n]
                    .copy_from_slice(&mdat[chunk.mdat_pos..chunk.mdat_pos + n]);
                chunk.mdat_pos += n;
                written += n;
            }

            if chunk.mdat_pos >= mdat.len() {
                if chunk.eof {
                    self.eof = true;
                    break;
                }
                if live {
                    // freeing is the live worker's job
                    seq += 1;
                } else if queue.len() > 1 {
                    queue.pop_front();
                    seq = queue.head_seq();
                } else {
                    // keep the drained tail as the timeline anchor for the
                    // next extension
                    break;
                }
            } else {
                break;
            }
        }

        if live {
            queue.live_read_pos = Some(seq);
        }
        written
    }
}

impl Drop for FlvStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The manifest URL with its last path segment removed, no trailing slash.
fn base_of(url: &Url) -> String {
    let dir = url.join(".").unwrap_or_else(|_| url.clone());
    dir.as_str().trim_end_matches('/').to_string()
}

fn ids_match(media: &MediaInfo, boot: &BootstrapInfo) -> bool {
    match (&media.bootstrap_id, &boot.id) {
        (None, None) => true,
        (Some(m), Some(b)) => m == b,
        _ => false,
    }
}

/// Pair media and bootstrap entries and build the first usable stream.
fn build_stream(
    parsed: &Manifest,
    base_url: String,
    opts: HdsOptions,
) -> HdsResult<Arc<Shared>> {
    let live = parsed.is_live();

    for media in &parsed.medias {
        for boot_info in parsed.bootstraps.iter().filter(|b| ids_match(media, b)) {
            if live {
                let Some(abst_url) = boot_info.url.clone() else {
                    warn!("live bootstrap entry without a url, skipping");
                    continue;
                };
                return Ok(Shared::new(
                    true,
                    0,
                    base_url,
                    media.url.clone(),
                    Some(abst_url),
                    opts,
                    Default::default(),
                ));
            }

            let boot = match bootstrap::parse_bootstrap(&boot_info.data) {
                Ok(boot) => boot,
                Err(e) => {
                    warn!(error = %e, "skipping unusable bootstrap");
                    continue;
                }
            };
            debug!(
                movie_id = %boot.movie_id,
                timescale = boot.timescale,
                segment_runs = boot.segment_runs.len(),
                fragment_runs = boot.fragment_runs.len(),
                "new stream"
            );

            let shared = Shared::new(
                false,
                parsed.duration_seconds,
                base_url.clone(),
                media.url.clone(),
                None,
                opts.clone(),
                boot,
            );
            match pipeline::seed_vod_queue(&shared) {
                Ok(()) => return Ok(shared),
                Err(e) => {
                    warn!(error = %e, "skipping stream with unusable timeline");
                    continue;
                }
            }
        }
    }

    Err(HdsError::NoStreams)
}
