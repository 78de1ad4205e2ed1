//! The fragment timeline engine.
//!
//! Expands the compact run tables into concrete chunk descriptors, one call
//! per chunk. Pure over the [`Bootstrap`] tables so it can be driven from the
//! VOD reader path, the live worker, and tests alike. A failure here is fatal
//! to the stream.

use crate::error::{HdsError, HdsResult};
use crate::model::Bootstrap;
use crate::queue::Chunk;

/// Produce the descriptor following `prev`, or the first one when `prev` is
/// `None` (VOD: the first fragment run's origin; live: the fragment covering
/// `live_current_time`).
pub(crate) fn next_chunk(
    boot: &Bootstrap,
    prev: Option<&Chunk>,
    live: bool,
    duration_seconds: u64,
) -> HdsResult<Chunk> {
    let runs = &boot.fragment_runs;
    if runs.is_empty() {
        return Err(HdsError::Timeline("empty fragment run table".into()));
    }

    let mut frun_entry = 0usize;
    let (mut timestamp, mut frag_num) = match prev {
        Some(prev) => {
            if !live {
                // sequential generation picks up where the last search ended
                frun_entry = prev.frun_entry;
            }
            (prev.timestamp + prev.duration, prev.frag_num + 1)
        }
        None if live => {
            let ticks = boot
                .live_current_time
                .saturating_mul(u64::from(boot.afrt_timescale))
                / u64::from(boot.timescale.max(1));
            (ticks, 0)
        }
        None => (runs[0].fragment_timestamp, runs[0].fragment_number_start),
    };

    let mut duration = 0u64;
    let mut matched = false;

    while frun_entry < runs.len() {
        let run = &runs[frun_entry];

        // discontinuity marker: adopt the following run wholesale
        if run.fragment_duration == 0 {
            if frun_entry + 1 == runs.len() {
                return Err(HdsError::Timeline(
                    "discontinuity with no following fragment run".into(),
                ));
            }
            let next = &runs[frun_entry + 1];
            frag_num = next.fragment_number_start;
            duration = u64::from(next.fragment_duration);
            timestamp = next.fragment_timestamp;
            frun_entry += 1;
            matched = true;
            break;
        }

        // implicit fragment number: live seeding enters with frag 0 and only
        // a timestamp to go by
        if frag_num == 0
            && (frun_entry + 1 == runs.len()
                || (timestamp >= run.fragment_timestamp
                    && timestamp < runs[frun_entry + 1].fragment_timestamp))
        {
            frag_num = run.fragment_number_start
                + (timestamp.saturating_sub(run.fragment_timestamp)
                    / u64::from(run.fragment_duration)) as u32;
            duration = u64::from(run.fragment_duration);
        }

        // explicit number match
        if run.fragment_number_start <= frag_num
            && (frun_entry + 1 == runs.len()
                || runs[frun_entry + 1].fragment_number_start > frag_num)
        {
            duration = u64::from(run.fragment_duration);
            timestamp = run.fragment_timestamp
                + duration * u64::from(frag_num - run.fragment_number_start);
            matched = true;
            break;
        }

        frun_entry += 1;
    }

    if !matched {
        return Err(HdsError::Timeline(format!(
            "no fragment run matches fragment {frag_num}"
        )));
    }

    let seg_num = segment_for(boot, frag_num)?;
    let mut chunk = Chunk::new(seg_num, frag_num, timestamp, duration, frun_entry);

    if !live {
        let afrt = u64::from(boot.afrt_timescale.max(1));
        if (timestamp + duration) / afrt >= duration_seconds {
            chunk.eof = true;
        }
    }

    Ok(chunk)
}

/// Segment number for a fragment, by walking the segment-run table with an
/// accumulator seeded at `frag_num` (so the first run contributes offset 0).
fn segment_for(boot: &Bootstrap, frag_num: u32) -> HdsResult<u32> {
    let runs = &boot.segment_runs;
    if runs.is_empty() {
        return Err(HdsError::Timeline("empty segment run table".into()));
    }

    let mut fragments_accum = u64::from(frag_num);
    let mut segment = 0u32;

    for (i, run) in runs.iter().enumerate() {
        if run.fragments_per_segment == 0 {
            return Err(HdsError::Timeline(
                "segment run with zero fragments per segment".into(),
            ));
        }

        segment = run.first_segment
            + (u64::from(frag_num).saturating_sub(fragments_accum)
                / u64::from(run.fragments_per_segment)) as u32;

        if i + 1 == runs.len() || runs[i + 1].first_segment > segment {
            break;
        }

        fragments_accum += u64::from(runs[i + 1].first_segment - run.first_segment)
            * u64::from(run.fragments_per_segment);
    }

    Ok(segment)
}
