//! Minimal ISO-BMFF box walking over downloaded fragments.
//!
//! HDS fragments are a short sequence of length-prefixed boxes; the only one
//! the filter cares about is `mdat`, whose payload is raw FLV tags.

use std::ops::Range;

/// Locate the `mdat` payload in a fragment buffer.
///
/// Walks 4-byte big-endian size + 4-byte tag headers, honoring the 8-byte
/// extended size when `size == 1`. Returns the payload range running from
/// just past the `mdat` header to the end of the buffer, matching the wire
/// contract that `mdat` is the trailing box. `None` when no `mdat` exists or
/// any box would overrun the buffer.
pub(crate) fn find_mdat(data: &[u8]) -> Option<Range<usize>> {
    let mut pos = 0usize;

    loop {
        if data.len() - pos < 8 {
            return None;
        }

        let size32 = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as u64;
        let tag = &data[pos + 4..pos + 8];

        let (payload, size) = if size32 == 1 {
            if data.len() - pos < 16 {
                return None;
            }
            let ext = u64::from_be_bytes(data[pos + 8..pos + 16].try_into().unwrap());
            (pos + 16, ext)
        } else {
            (pos + 8, size32)
        };

        if tag == b"mdat" {
            return Some(payload..data.len());
        }

        if size < (payload - pos) as u64 {
            return None;
        }
        let next = pos as u64 + size;
        if next > data.len() as u64 {
            return None;
        }
        pos = next as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((payload.len() as u32) + 8).to_be_bytes());
        out.extend_from_slice(tag);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn finds_mdat_after_leading_boxes() {
        let mut frag = boxed(b"afra", &[0u8; 12]);
        frag.extend_from_slice(&boxed(b"mdat", b"FLV-TAGS"));

        let range = find_mdat(&frag).unwrap();
        assert_eq!(&frag[range], b"FLV-TAGS");
    }

    #[test]
    fn finds_mdat_with_extended_size() {
        let payload = b"payload";
        let mut frag = Vec::new();
        frag.extend_from_slice(&1u32.to_be_bytes());
        frag.extend_from_slice(b"mdat");
        frag.extend_from_slice(&((payload.len() as u64) + 16).to_be_bytes());
        frag.extend_from_slice(payload);

        let range = find_mdat(&frag).unwrap();
        assert_eq!(&frag[range], payload);
    }

    #[test]
    fn missing_mdat_is_none() {
        let frag = boxed(b"afra", &[0u8; 4]);
        assert!(find_mdat(&frag).is_none());
    }

    #[test]
    fn overrunning_box_is_none() {
        let mut frag = Vec::new();
        frag.extend_from_slice(&64u32.to_be_bytes());
        frag.extend_from_slice(b"afra");
        frag.extend_from_slice(&[0u8; 4]);
        assert!(find_mdat(&frag).is_none());
    }

    #[test]
    fn undersized_box_is_none() {
        // size smaller than its own header cannot advance
        let mut frag = Vec::new();
        frag.extend_from_slice(&4u32.to_be_bytes());
        frag.extend_from_slice(b"afra");
        frag.extend_from_slice(&[0u8; 16]);
        assert!(find_mdat(&frag).is_none());
    }

    #[test]
    fn mdat_payload_runs_to_end_of_buffer() {
        // trailing bytes past the declared mdat size still belong to the payload
        let mut frag = boxed(b"mdat", b"tags");
        frag.extend_from_slice(b"-and-more");

        let range = find_mdat(&frag).unwrap();
        assert_eq!(&frag[range], b"tags-and-more");
    }
}
