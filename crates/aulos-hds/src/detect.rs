//! HDS input recognition.
//!
//! Manifests may arrive as UTF-8/ASCII or as BOM-prefixed UTF-16 in either
//! byte order; detection decodes a small prefix and looks for the opening
//! `<manifest` element.

use std::borrow::Cow;

/// Minimum number of peeked bytes required before detection is attempted.
const MIN_PEEK: usize = 200;

/// How much of the prefix is decoded when looking for `<manifest`.
const DETECT_WINDOW: usize = 512;

/// Returns true when the peeked prefix looks like an HDS manifest.
pub fn is_hds(peek: &[u8]) -> bool {
    if peek.len() < MIN_PEEK {
        return false;
    }
    let window = &peek[..peek.len().min(DETECT_WINDOW)];
    manifest_text(window).contains("<manifest")
}

/// BOM-aware decode of manifest bytes into text.
///
/// `FF FE` selects UTF-16LE, `FE FF` UTF-16BE; anything else is treated as
/// 8-bit. Undecodable units become replacement characters rather than
/// aborting detection.
pub(crate) fn manifest_text(data: &[u8]) -> Cow<'_, str> {
    match data {
        [0xFF, 0xFE, rest @ ..] => Cow::Owned(decode_utf16(rest, false)),
        [0xFE, 0xFF, rest @ ..] => Cow::Owned(decode_utf16(rest, true)),
        _ => String::from_utf8_lossy(data),
    }
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> String {
    let units = bytes.chunks_exact(2).map(|pair| {
        let pair = [pair[0], pair[1]];
        if big_endian {
            u16::from_be_bytes(pair)
        } else {
            u16::from_le_bytes(pair)
        }
    });
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
