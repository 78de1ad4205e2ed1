//! The chunk pipeline: shared stream state and the two workers.
//!
//! Three agents cooperate around one [`Shared`]: the reader (host-driven),
//! the download worker, and, for live streams, the live refresh worker. The
//! bootstrap tables and the chunk queue sit behind separate short-held locks;
//! `dl_notify` is the download worker's condition variable and `data_notify`
//! wakes the reader when a payload is published (or a download fails).
//!
//! Lock order, where both are needed: bootstrap before queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use aulos_net::Net;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::boxes;
use crate::error::{HdsError, HdsResult};
use crate::model::Bootstrap;
use crate::options::HdsOptions;
use crate::queue::ChunkQueue;
use crate::{bootstrap, timeline};

/// Fallback live refresh cadence when the fragment duration is unusable.
const DEFAULT_LIVE_REFRESH: Duration = Duration::from_millis(500);

/// Retry pacing for failed fragment downloads.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Per-stream state shared between the reader and the workers.
#[derive(Debug)]
pub(crate) struct Shared {
    pub live: bool,
    /// Total presentation length; zero in live mode.
    pub duration_seconds: u64,
    /// Manifest URL with its last path segment removed; no trailing slash.
    pub base_url: String,
    /// `<media url>` from the manifest, absolute or a movie-id suffix.
    pub media_url: Option<String>,
    /// Live mode only: where to refetch the bootstrap.
    pub abst_url: Option<String>,
    pub opts: HdsOptions,
    pub bootstrap: Mutex<Bootstrap>,
    pub queue: Mutex<ChunkQueue>,
    /// Wakes the download worker when there may be new work.
    pub dl_notify: Notify,
    /// Wakes the reader when a payload was published or a download failed.
    pub data_notify: Notify,
    pub cancel: CancellationToken,
    /// Fragments published so far.
    pub chunk_count: AtomicU64,
    /// A timeline failure; surfaced on the next read.
    pub fatal: Mutex<Option<HdsError>>,
}

impl Shared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        live: bool,
        duration_seconds: u64,
        base_url: String,
        media_url: Option<String>,
        abst_url: Option<String>,
        opts: HdsOptions,
        boot: Bootstrap,
    ) -> Arc<Self> {
        Arc::new(Self {
            live,
            duration_seconds,
            base_url,
            media_url,
            abst_url,
            opts,
            bootstrap: Mutex::new(boot),
            queue: Mutex::new(ChunkQueue::new()),
            dl_notify: Notify::new(),
            data_notify: Notify::new(),
            cancel: CancellationToken::new(),
            chunk_count: AtomicU64::new(0),
            fatal: Mutex::new(None),
        })
    }

    pub fn set_fatal(&self, err: HdsError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        }
        drop(fatal);
        self.data_notify.notify_one();
    }
}

pub(crate) fn is_fully_qualified(url: &str) -> bool {
    let bytes = url.as_bytes();
    (bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"http://"))
        || (bytes.len() >= 8 && bytes[..8].eq_ignore_ascii_case(b"https://"))
}

/// Build a fragment URL: `{server}/{movie_id}{quality}Seg{seg}-Frag{frag}`.
///
/// The first server entry, when present, replaces the base URL; a fully
/// qualified media URL overrides both, otherwise the media URL becomes the
/// movie-id path component.
pub(crate) fn fragment_url(
    base_url: &str,
    boot: &Bootstrap,
    media_url: Option<&str>,
    seg_num: u32,
    frag_num: u32,
) -> HdsResult<Url> {
    let mut server_base = boot
        .server_entries
        .first()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(base_url);
    let quality = boot.quality_segment_modifier.as_deref().unwrap_or("");

    let mut movie_id = "";
    if let Some(url) = media_url
        && !url.is_empty()
    {
        if is_fully_qualified(url) {
            server_base = url;
        } else {
            movie_id = url;
        }
    }

    let raw = format!("{server_base}/{movie_id}{quality}Seg{seg_num}-Frag{frag_num}");
    Url::parse(&raw).map_err(|e| HdsError::InvalidUrl(format!("{raw}: {e}")))
}

/// Seed a VOD queue with the first chunk and fill it to the lead-time
/// horizon. Open-time; errors propagate.
pub(crate) fn seed_vod_queue(shared: &Shared) -> HdsResult<()> {
    let boot = shared.bootstrap.lock();
    let mut queue = shared.queue.lock();

    let first = timeline::next_chunk(&boot, None, false, shared.duration_seconds)?;
    queue.push_back(first);
    extend_vod_locked(shared, &boot, &mut queue)?;
    Ok(())
}

/// Reader-path VOD extension: keep the queue covering the lead-time horizon.
/// Signals the download worker when chunks were added; a timeline failure is
/// recorded as fatal.
pub(crate) fn extend_vod_queue(shared: &Shared) {
    let boot = shared.bootstrap.lock();
    let mut queue = shared.queue.lock();

    match extend_vod_locked(shared, &boot, &mut queue) {
        Ok(true) => shared.dl_notify.notify_one(),
        Ok(false) => {}
        Err(e) => {
            drop(queue);
            drop(boot);
            shared.set_fatal(e);
        }
    }
}

fn extend_vod_locked(
    shared: &Shared,
    boot: &Bootstrap,
    queue: &mut ChunkQueue,
) -> HdsResult<bool> {
    let afrt = u64::from(boot.afrt_timescale.max(1));
    let leadtime = shared.opts.download_leadtime.as_secs();
    let mut queued: u64 = queue.iter().map(|c| c.duration).sum();
    let mut added = false;

    loop {
        let Some(tail) = queue.tail() else { break };
        if tail.eof {
            break;
        }
        // Past the horizon, still append while the tail is already drained:
        // the reader needs an undrained successor to make progress.
        if queued / afrt >= leadtime && !tail.drained() {
            break;
        }
        let next = timeline::next_chunk(boot, Some(tail), false, shared.duration_seconds)?;
        queued += next.duration;
        queue.push_back(next);
        added = true;
    }

    Ok(added)
}

/// The download worker: fetch the chunk under the download cursor, locate its
/// `mdat`, publish, advance. Failed chunks keep the cursor in place and are
/// retried on the next signal.
pub(crate) async fn download_worker(shared: Arc<Shared>, net: Arc<dyn Net>) {
    let mut retry_delay = INITIAL_RETRY_DELAY;

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let job = {
            let mut queue = shared.queue.lock();
            if queue.download_pos.is_none() {
                let first = queue.first_undownloaded();
                queue.download_pos = first;
            }
            queue
                .download_pos
                .and_then(|seq| queue.get(seq).map(|c| (seq, c.seg_num, c.frag_num)))
        };
        let Some((seq, seg_num, frag_num)) = job else {
            wait_for_work(&shared).await;
            continue;
        };

        let url = {
            let boot = shared.bootstrap.lock();
            fragment_url(
                &shared.base_url,
                &boot,
                shared.media_url.as_deref(),
                seg_num,
                frag_num,
            )
        };
        let url = match url {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build fragment url");
                mark_failed(&shared, seq);
                retry_delay = backoff(&shared, retry_delay).await;
                continue;
            }
        };

        debug!(url = %url, seg_num, frag_num, "downloading fragment");
        let result = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            r = net.get_bytes(url.clone()) => r,
        };

        match result {
            Ok(data) if data.len() <= shared.opts.max_fragment_bytes => {
                // No mdat box is tolerated: the whole buffer then counts as
                // the payload.
                let mdat = match boxes::find_mdat(&data) {
                    Some(range) => data.slice(range),
                    None => data.clone(),
                };

                let mut queue = shared.queue.lock();
                if let Some(chunk) = queue.get_mut(seq) {
                    chunk.mdat = Some(mdat);
                    chunk.failed = false;
                }
                // publish before advancing: a visible cursor move implies the
                // payload is complete
                if queue.download_pos == Some(seq) {
                    queue.download_pos = Some(seq + 1);
                }
                drop(queue);

                shared.chunk_count.fetch_add(1, Ordering::Relaxed);
                shared.data_notify.notify_one();
                retry_delay = INITIAL_RETRY_DELAY;
            }
            Ok(data) => {
                warn!(url = %url, bytes = data.len(), "strangely large fragment");
                mark_failed(&shared, seq);
                retry_delay = backoff(&shared, retry_delay).await;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "fragment download failed");
                mark_failed(&shared, seq);
                retry_delay = backoff(&shared, retry_delay).await;
            }
        }
    }

    trace!("download worker stopped");
}

fn mark_failed(shared: &Shared, seq: u64) {
    let mut queue = shared.queue.lock();
    if let Some(chunk) = queue.get_mut(seq) {
        chunk.failed = true;
    }
    drop(queue);
    shared.data_notify.notify_one();
}

async fn wait_for_work(shared: &Shared) {
    tokio::select! {
        _ = shared.cancel.cancelled() => {}
        _ = shared.dl_notify.notified() => {}
    }
}

/// Pace a retry: sleep the current delay, then wait for a signal. The reader
/// nudges `dl_notify` whenever it meets a failed head chunk, so the sleep
/// bounds the request rate rather than gating progress.
async fn backoff(shared: &Shared, delay: Duration) -> Duration {
    tokio::select! {
        _ = shared.cancel.cancelled() => return delay,
        _ = tokio::time::sleep(delay) => {}
    }
    wait_for_work(shared).await;
    (delay * 2).min(MAX_RETRY_DELAY)
}

/// The live worker: refetch the bootstrap, swap the tables, extend the queue,
/// sleep one fragment duration.
pub(crate) async fn live_worker(shared: Arc<Shared>, net: Arc<dyn Net>) {
    let Some(raw) = shared.abst_url.as_deref() else {
        warn!("live stream without a bootstrap url");
        return;
    };
    let resolved = if is_fully_qualified(raw) {
        raw.to_string()
    } else {
        format!("{}/{raw}", shared.base_url)
    };
    let abst_url = match Url::parse(&resolved) {
        Ok(url) => url,
        Err(e) => {
            shared.set_fatal(HdsError::InvalidUrl(format!("{resolved}: {e}")));
            return;
        }
    };

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        let started = tokio::time::Instant::now();

        let result = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            r = net.get_bytes(abst_url.clone()) => r,
        };
        match result {
            Ok(data) => match bootstrap::parse_bootstrap(&data) {
                Ok(fresh) => {
                    *shared.bootstrap.lock() = fresh;
                    maintain_live_chunks(&shared);
                }
                Err(e) => warn!(error = %e, "discarding bootstrap refresh"),
            },
            Err(e) => warn!(url = %abst_url, error = %e, "bootstrap refresh failed"),
        }

        let cadence = refresh_cadence(&shared);
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep_until(started + cadence) => {}
        }
    }

    trace!("live worker stopped");
}

/// Polling cadence tracks the duration of the most recent fragment run.
fn refresh_cadence(shared: &Shared) -> Duration {
    if let Some(interval) = shared.opts.live_refresh_interval {
        return interval;
    }
    let boot = shared.bootstrap.lock();
    let afrt = u64::from(boot.afrt_timescale.max(1));
    match boot.fragment_runs.last() {
        Some(run) if run.fragment_duration > 0 => {
            Duration::from_micros(u64::from(run.fragment_duration) * 1_000_000 / afrt)
        }
        _ => DEFAULT_LIVE_REFRESH,
    }
}

/// Bring the queue up to the live edge and free the drained prefix.
pub(crate) fn maintain_live_chunks(shared: &Shared) {
    let boot = shared.bootstrap.lock();
    let mut queue = shared.queue.lock();

    if queue.is_empty() {
        match timeline::next_chunk(&boot, None, true, 0) {
            Ok(chunk) => {
                let seq = queue.push_back(chunk);
                queue.live_read_pos = Some(seq);
            }
            Err(e) => {
                drop(queue);
                drop(boot);
                shared.set_fatal(e);
                return;
            }
        }
    }

    let timescale = u64::from(boot.timescale.max(1));
    let afrt = u64::from(boot.afrt_timescale.max(1));
    let mut added = false;
    loop {
        let tail = queue.tail().expect("queue is non-empty here");
        if tail.timestamp.saturating_mul(timescale) / afrt > boot.live_current_time {
            break;
        }
        match timeline::next_chunk(&boot, Some(tail), true, 0) {
            Ok(chunk) => {
                queue.push_back(chunk);
                added = true;
            }
            Err(e) => {
                drop(queue);
                drop(boot);
                shared.set_fatal(e);
                return;
            }
        }
    }
    if added {
        shared.dl_notify.notify_one();
    }

    // Free drained chunks, keeping at least one as the timeline anchor. The
    // reader has already moved live_read_pos past anything drained.
    while queue.len() > 1 {
        let head = queue.head().expect("queue is non-empty here");
        if head.drained() {
            queue.pop_front();
        } else {
            break;
        }
    }
    let head_seq = queue.head_seq();
    if queue.live_read_pos.is_none_or(|pos| pos < head_seq) {
        queue.live_read_pos = Some(head_seq);
    }
}
