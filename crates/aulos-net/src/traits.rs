use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::NetError;

/// Object-safe fetch contract.
///
/// Normative:
/// - `get_bytes` resolves only with the *complete* response body; a body
///   shorter than the advertised `Content-Length` must surface as
///   [`NetError::ShortRead`], never as truncated bytes.
/// - Non-2xx statuses are errors.
#[async_trait]
pub trait Net: Send + Sync {
    /// Fetch all bytes from a URL.
    async fn get_bytes(&self, url: Url) -> Result<Bytes, NetError>;
}
