#![forbid(unsafe_code)]

use thiserror::Error;

pub type HdsResult<T> = Result<T, HdsError>;

/// Stream filter errors.
///
/// Only open-time errors reach the host; everything the workers hit at
/// runtime is logged and contained, except a timeline gap, which is fatal to
/// the stream and surfaces on the next `read`.
#[derive(Debug, Error)]
pub enum HdsError {
    #[error("Network error: {0}")]
    Net(#[from] aulos_net::NetError),

    #[error("stream is not an HDS manifest")]
    NotHds,

    #[error("Manifest parsing error: {0}")]
    ManifestParse(String),

    #[error("no usable media/bootstrap pairing in manifest")]
    NoStreams,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeline error: {0}")]
    Timeline(String),
}
