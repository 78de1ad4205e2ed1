//! Bootstrap-derived data model.
//!
//! One [`Bootstrap`] per stream, rewritten wholesale on each live refresh.
//! The run tables are the compact timeline description the timeline engine
//! expands into concrete `(segment, fragment)` pairs.

/// Upper bound on server entries kept from the bootstrap.
pub(crate) const MAX_SERVER_ENTRIES: usize = 10;

/// Upper bound on segment-run table entries.
pub(crate) const MAX_SEGMENT_RUNS: usize = 256;

/// Upper bound on fragment-run table entries.
pub(crate) const MAX_FRAGMENT_RUNS: usize = 10_000;

/// A range of contiguous segments sharing a fragments-per-segment count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SegmentRun {
    pub first_segment: u32,
    pub fragments_per_segment: u32,
}

/// A range of contiguous fragments sharing a duration and timestamp origin.
///
/// A run with `fragment_duration == 0` is a discontinuity marker; its
/// `discont` tag was read from the wire and the *following* run carries the
/// resumed numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FragmentRun {
    pub fragment_number_start: u32,
    pub fragment_timestamp: u64,
    pub fragment_duration: u32,
    pub discont: u8,
}

/// Parsed `abst` contents for one stream.
#[derive(Clone, Debug)]
pub(crate) struct Bootstrap {
    /// Ticks per second for `live_current_time`.
    pub timescale: u32,
    /// Ticks per second for chunk timestamps and durations (from `afrt`).
    pub afrt_timescale: u32,
    /// Live edge, in `timescale` units. Only meaningful in live mode.
    pub live_current_time: u64,
    pub movie_id: String,
    pub server_entries: Vec<String>,
    /// Absent means every quality entry matches.
    pub quality_segment_modifier: Option<String>,
    pub segment_runs: Vec<SegmentRun>,
    pub fragment_runs: Vec<FragmentRun>,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self {
            // Non-zero placeholders keep tick arithmetic total before the
            // first parsed bootstrap arrives.
            timescale: 1,
            afrt_timescale: 1,
            live_current_time: 0,
            movie_id: String::new(),
            server_entries: Vec::new(),
            quality_segment_modifier: None,
            segment_runs: Vec::new(),
            fragment_runs: Vec::new(),
        }
    }
}
