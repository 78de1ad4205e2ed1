//! The chunk queue.
//!
//! An owning `VecDeque` indexed by an ever-increasing absolute sequence
//! number. The download worker and the live reader track their positions as
//! plain sequence numbers rather than references, so freeing the head can
//! never dangle a cursor.

use std::collections::VecDeque;

use bytes::Bytes;

/// One fragment in flight: descriptor first, payload once downloaded.
#[derive(Clone, Debug)]
pub(crate) struct Chunk {
    pub seg_num: u32,
    pub frag_num: u32,
    /// In `afrt_timescale` units.
    pub timestamp: u64,
    /// In `afrt_timescale` units.
    pub duration: u64,
    /// Fragment-run index this chunk was generated from; seeds the next
    /// sequential timeline search in VOD.
    pub frun_entry: usize,
    /// The `mdat` payload window. `None` until the download publishes; the
    /// window keeps the whole fragment buffer alive underneath.
    pub mdat: Option<Bytes>,
    /// Read cursor within `mdat`.
    pub mdat_pos: usize,
    pub failed: bool,
    /// VOD only: set on the last chunk of the presentation.
    pub eof: bool,
}

impl Chunk {
    pub fn new(seg_num: u32, frag_num: u32, timestamp: u64, duration: u64, frun_entry: usize) -> Self {
        Self {
            seg_num,
            frag_num,
            timestamp,
            duration,
            frun_entry,
            mdat: None,
            mdat_pos: 0,
            failed: false,
            eof: false,
        }
    }

    /// Downloaded and fully consumed.
    pub fn drained(&self) -> bool {
        match &self.mdat {
            Some(mdat) => self.mdat_pos >= mdat.len(),
            None => false,
        }
    }
}

/// Owning chunk queue with stable absolute sequence numbers.
#[derive(Debug, Default)]
pub(crate) struct ChunkQueue {
    chunks: VecDeque<Chunk>,
    /// Sequence number of `chunks[0]`.
    head_seq: u64,
    /// Next chunk the download worker should fill. `None` means "rescan from
    /// the head".
    pub download_pos: Option<u64>,
    /// Live reader position; drained chunks before it may be freed.
    pub live_read_pos: Option<u64>,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn head_seq(&self) -> u64 {
        self.head_seq
    }

    /// Sequence number one past the tail.
    pub fn end_seq(&self) -> u64 {
        self.head_seq + self.chunks.len() as u64
    }

    fn index_of(&self, seq: u64) -> Option<usize> {
        if seq < self.head_seq {
            return None;
        }
        let idx = (seq - self.head_seq) as usize;
        (idx < self.chunks.len()).then_some(idx)
    }

    pub fn get(&self, seq: u64) -> Option<&Chunk> {
        self.index_of(seq).map(|i| &self.chunks[i])
    }

    pub fn get_mut(&mut self, seq: u64) -> Option<&mut Chunk> {
        self.index_of(seq).map(|i| &mut self.chunks[i])
    }

    pub fn head(&self) -> Option<&Chunk> {
        self.chunks.front()
    }

    pub fn tail(&self) -> Option<&Chunk> {
        self.chunks.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Append a chunk, returning its sequence number.
    pub fn push_back(&mut self, chunk: Chunk) -> u64 {
        let seq = self.end_seq();
        self.chunks.push_back(chunk);
        seq
    }

    /// Free the head chunk, advancing the base sequence and clamping any
    /// cursor left pointing before the new head.
    pub fn pop_front(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop_front()?;
        self.head_seq += 1;

        if let Some(pos) = self.download_pos
            && pos < self.head_seq
        {
            self.download_pos = None;
        }
        if let Some(pos) = self.live_read_pos
            && pos < self.head_seq
        {
            self.live_read_pos = Some(self.head_seq);
        }
        Some(chunk)
    }

    /// First not-yet-downloaded chunk at or after the head.
    pub fn first_undownloaded(&self) -> Option<u64> {
        self.chunks
            .iter()
            .position(|c| c.mdat.is_none())
            .map(|i| self.head_seq + i as u64)
    }
}
