//! `abst` bootstrap box parsing.
//!
//! The bootstrap describes the stream timeline compactly: a segment-run
//! table (`asrt`) and a fragment-run table (`afrt`) nested inside the outer
//! `abst` box. Parsing is tolerant in the sense required by the container:
//! any structural problem discards the whole bootstrap with a warning at the
//! call site instead of tearing the stream down.

use thiserror::Error;
use tracing::warn;

use crate::model::{
    Bootstrap, FragmentRun, MAX_FRAGMENT_RUNS, MAX_SEGMENT_RUNS, MAX_SERVER_ENTRIES, SegmentRun,
};

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error("not enough bootstrap data ({0})")]
    Underrun(&'static str),

    #[error("expected `{0}` box tag")]
    BadTag(&'static str),

    #[error("unterminated string ({0})")]
    MissingNul(&'static str),

    #[error("multiple quality levels in the bootstrap are not supported")]
    MultipleQualityLevels,

    #[error("too many segment runs")]
    TooManySegmentRuns,

    #[error("too many fragment runs")]
    TooManyFragmentRuns,
}

/// Big-endian read cursor over a bootstrap byte buffer.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn need(&self, n: usize, what: &'static str) -> Result<(), BootstrapError> {
        if self.remaining() < n {
            Err(BootstrapError::Underrun(what))
        } else {
            Ok(())
        }
    }

    fn skip(&mut self, n: usize, what: &'static str) -> Result<(), BootstrapError> {
        self.need(n, what)?;
        self.pos += n;
        Ok(())
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, BootstrapError> {
        self.need(1, what)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, BootstrapError> {
        self.need(4, what)?;
        let v = u32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, BootstrapError> {
        self.need(8, what)?;
        let v = u64::from_be_bytes(self.data[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    fn tag(&mut self, expected: &'static str) -> Result<(), BootstrapError> {
        self.need(4, "box tag")?;
        if &self.data[self.pos..self.pos + 4] != expected.as_bytes() {
            return Err(BootstrapError::BadTag(expected));
        }
        self.pos += 4;
        Ok(())
    }

    /// NUL-terminated string; a missing terminator is an error.
    fn cstr(&mut self, what: &'static str) -> Result<String, BootstrapError> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(BootstrapError::MissingNul(what))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    /// NUL-terminated string, taking the remainder when unterminated.
    fn cstr_lossy(&mut self) -> String {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(nul) => {
                let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
                self.pos += nul + 1;
                s
            }
            None => {
                let s = String::from_utf8_lossy(rest).into_owned();
                self.pos = self.data.len();
                s
            }
        }
    }
}

/// Parse a raw `abst` box into a fresh [`Bootstrap`].
///
/// The returned value replaces the stream's tables wholesale, so a failure
/// partway through never leaves torn state behind.
pub(crate) fn parse_bootstrap(data: &[u8]) -> Result<Bootstrap, BootstrapError> {
    let mut c = Cursor::new(data);
    c.need(29, "abst header")?;

    let abst_len = c.u32("abst size")?;
    if abst_len as usize > data.len() {
        return Err(BootstrapError::Underrun("abst box size"));
    }
    c.tag("abst")?;
    c.skip(4, "version/flags")?;
    c.skip(4, "bootstrap info version")?;
    // profile/live/update flags, handled at the manifest level
    c.skip(1, "bootstrap flags")?;

    let mut boot = Bootstrap {
        timescale: c.u32("timescale")?,
        live_current_time: c.u64("current media time")?,
        ..Bootstrap::default()
    };
    c.skip(8, "smpte offset")?;

    boot.movie_id = c.cstr_lossy();
    c.need(4, "server entry count")?;

    let server_count = c.u8("server entry count")?;
    for _ in 0..server_count {
        if boot.server_entries.len() < MAX_SERVER_ENTRIES {
            boot.server_entries.push(c.cstr_lossy());
        } else {
            warn!("bootstrap lists more than {MAX_SERVER_ENTRIES} servers, ignoring the rest");
            let _ = c.cstr("server entry")?;
        }
        if c.remaining() == 0 {
            return Err(BootstrapError::Underrun("server entries"));
        }
    }

    c.need(3, "quality entry count")?;
    let quality_count = c.u8("quality entry count")?;
    if quality_count > 1 {
        return Err(BootstrapError::MultipleQualityLevels);
    }
    if quality_count == 1 {
        boot.quality_segment_modifier = Some(c.cstr_lossy());
    }

    c.need(2, "drm data")?;
    let _ = c.cstr("drm data")?;
    c.need(2, "metadata")?;
    let _ = c.cstr("metadata")?;
    c.need(2, "run tables")?;

    let asrt_count = c.u8("asrt count")?;
    for _ in 0..asrt_count {
        if c.remaining() == 0 {
            break;
        }
        parse_asrt(&mut c, &mut boot)?;
    }

    let afrt_count = c.u8("afrt count")?;
    for _ in 0..afrt_count {
        if c.remaining() == 0 {
            break;
        }
        parse_afrt(&mut c, &mut boot)?;
    }

    Ok(boot)
}

/// Segment-run table. Entries are kept only when a quality entry matches the
/// stream's modifier (or when no modifier is set).
fn parse_asrt(c: &mut Cursor<'_>, boot: &mut Bootstrap) -> Result<(), BootstrapError> {
    c.need(14, "asrt header")?;
    let asrt_len = c.u32("asrt size")? as usize;
    if asrt_len > c.remaining() + 4 {
        return Err(BootstrapError::Underrun("asrt box size"));
    }
    c.tag("asrt")?;
    c.skip(4, "asrt version/flags")?;

    let quality_entry_count = c.u8("asrt quality entry count")?;
    let mut quality_found = boot.quality_segment_modifier.is_none();
    for _ in 0..quality_entry_count {
        let entry = c.cstr("asrt quality entry")?;
        if !quality_found
            && let Some(modifier) = &boot.quality_segment_modifier
            && entry.starts_with(modifier.as_str())
        {
            quality_found = true;
        }
        if c.remaining() == 0 {
            return Err(BootstrapError::Underrun("asrt quality entries"));
        }
    }

    let run_count = c.u32("segment run count")? as usize;
    c.need(run_count.saturating_mul(8), "segment run entries")?;
    if run_count >= MAX_SEGMENT_RUNS {
        return Err(BootstrapError::TooManySegmentRuns);
    }

    for _ in 0..run_count {
        let first_segment = c.u32("segment run first segment")?;
        let fragments_per_segment = c.u32("segment run fragments per segment")?;
        if quality_found {
            if boot.segment_runs.len() >= MAX_SEGMENT_RUNS {
                return Err(BootstrapError::TooManySegmentRuns);
            }
            boot.segment_runs.push(SegmentRun {
                first_segment,
                fragments_per_segment,
            });
        }
    }

    Ok(())
}

/// Fragment-run table. Its timescale is authoritative for chunk timestamps.
fn parse_afrt(c: &mut Cursor<'_>, boot: &mut Bootstrap) -> Result<(), BootstrapError> {
    c.need(9, "afrt header")?;
    let afrt_len = c.u32("afrt size")? as usize;
    if afrt_len > c.remaining() + 4 {
        return Err(BootstrapError::Underrun("afrt box size"));
    }
    c.tag("afrt")?;
    c.skip(4, "afrt version/flags")?;

    c.need(9, "afrt timescale")?;
    boot.afrt_timescale = c.u32("afrt timescale")?;

    let quality_entry_count = c.u8("afrt quality entry count")?;
    for _ in 0..quality_entry_count {
        let _ = c.cstr("afrt quality entry")?;
    }

    c.need(5, "fragment run count")?;
    let run_count = c.u32("fragment run count")?;

    for _ in 0..run_count {
        c.need(16, "fragment run entry")?;
        if boot.fragment_runs.len() >= MAX_FRAGMENT_RUNS {
            return Err(BootstrapError::TooManyFragmentRuns);
        }

        let fragment_number_start = c.u32("fragment number start")?;
        let fragment_timestamp = c.u64("fragment timestamp")?;
        let fragment_duration = c.u32("fragment duration")?;
        // a zero duration marks a discontinuity and carries one extra tag byte
        let discont = if fragment_duration == 0 {
            c.u8("discontinuity tag")?
        } else {
            0
        };

        boot.fragment_runs.push(FragmentRun {
            fragment_number_start,
            fragment_timestamp,
            fragment_duration,
            discont,
        });
    }

    Ok(())
}
