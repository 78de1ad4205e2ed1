use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use tracing::trace;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    traits::Net,
    types::NetOptions,
};

/// reqwest-backed [`Net`] implementation.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(NetError::from)?;
        Ok(Self { inner, options })
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn get_bytes(&self, url: Url) -> Result<Bytes, NetError> {
        let resp = self
            .inner
            .get(url.clone())
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let expected = resp.content_length();

        // Stream the body so a truncated transfer is observed as a byte-count
        // mismatch rather than silently returned short.
        let mut body = BytesMut::with_capacity(expected.unwrap_or(0).min(1 << 20) as usize);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => body.extend_from_slice(&chunk),
                // A connection severed mid-body is a short read whenever the
                // advertised length tells us how much was lost.
                Err(e) => {
                    return Err(match expected {
                        Some(expected) if (body.len() as u64) < expected => NetError::ShortRead {
                            expected,
                            received: body.len() as u64,
                        },
                        _ => NetError::from(e),
                    });
                }
            }
        }

        if let Some(expected) = expected
            && (body.len() as u64) < expected
        {
            return Err(NetError::ShortRead {
                expected,
                received: body.len() as u64,
            });
        }

        trace!(url = %url, bytes = body.len(), "aulos-net: fetched");
        Ok(body.freeze())
    }
}
