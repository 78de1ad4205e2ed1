//! `aulos-net`
//!
//! HTTP fetch seam for the aulos stream filters.
//!
//! The rest of the workspace talks to the network exclusively through the
//! [`Net`] trait, so tests can substitute in-process fakes and the production
//! client stays swappable. [`HttpClient`] is the reqwest-backed default; it
//! verifies that the received body length matches `Content-Length` and
//! reports truncation as [`NetError::ShortRead`].

#![forbid(unsafe_code)]

mod client;
mod error;
mod traits;
mod types;

pub use client::HttpClient;
pub use error::{NetError, NetResult};
pub use traits::Net;
pub use types::NetOptions;
