//! Shared test fixtures: an in-process HTTP server plus builders for `abst`
//! boxes, fragments, and manifests.

use axum::Router;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tokio::net::TcpListener;
use url::Url;

use aulos_hds::FlvStream;

pub struct TestServer {
    base_url: Url,
}

impl TestServer {
    pub async fn serve(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            base_url: Url::parse(&format!("http://{addr}")).unwrap(),
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).unwrap()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn push_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn wrap_box(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&((body.len() as u32) + 8).to_be_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(body);
    out
}

/// Minimal but complete `abst` box.
///
/// `fragment_runs` entries are `(start, timestamp, duration)`; a zero
/// duration writes a discontinuity tag byte of 1.
pub fn build_abst(
    timescale: u32,
    current_media_time: u64,
    segment_runs: &[(u32, u32)],
    afrt_timescale: u32,
    fragment_runs: &[(u32, u64, u32)],
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0; 4]); // version/flags
    body.extend_from_slice(&[0; 4]); // bootstrap info version
    body.push(0); // profile/live/update flags
    body.extend_from_slice(&timescale.to_be_bytes());
    body.extend_from_slice(&current_media_time.to_be_bytes());
    body.extend_from_slice(&[0; 8]); // smpte offset
    push_cstr(&mut body, "movie"); // movie identifier
    body.push(0); // server entry count
    body.push(0); // quality entry count
    push_cstr(&mut body, ""); // drm data
    push_cstr(&mut body, ""); // metadata

    let mut asrt = Vec::new();
    asrt.extend_from_slice(&[0; 4]);
    asrt.push(0); // quality entry count
    asrt.extend_from_slice(&(segment_runs.len() as u32).to_be_bytes());
    for &(first, per_segment) in segment_runs {
        asrt.extend_from_slice(&first.to_be_bytes());
        asrt.extend_from_slice(&per_segment.to_be_bytes());
    }
    body.push(1);
    body.extend_from_slice(&wrap_box(b"asrt", &asrt));

    let mut afrt = Vec::new();
    afrt.extend_from_slice(&[0; 4]);
    afrt.extend_from_slice(&afrt_timescale.to_be_bytes());
    afrt.push(0); // quality entry count
    afrt.extend_from_slice(&(fragment_runs.len() as u32).to_be_bytes());
    for &(start, timestamp, duration) in fragment_runs {
        afrt.extend_from_slice(&start.to_be_bytes());
        afrt.extend_from_slice(&timestamp.to_be_bytes());
        afrt.extend_from_slice(&duration.to_be_bytes());
        if duration == 0 {
            afrt.push(1);
        }
    }
    body.push(1);
    body.extend_from_slice(&wrap_box(b"afrt", &afrt));

    wrap_box(b"abst", &body)
}

/// A fragment: one leading box the filter must skip, then the `mdat`.
pub fn build_fragment(payload: &[u8]) -> Vec<u8> {
    let mut out = wrap_box(b"afra", &[0u8; 9]);
    out.extend_from_slice(&wrap_box(b"mdat", payload));
    out
}

pub fn vod_manifest(duration: f64, media_url: &str, abst: &[u8]) -> String {
    let body = BASE64.encode(abst);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest xmlns="http://ns.adobe.com/f4m/1.0">
  <id>fixture/video</id>
  <streamType>recorded</streamType>
  <duration>{duration}</duration>
  <bootstrapInfo profile="named" id="boot1">
    {body}
  </bootstrapInfo>
  <media streamId="video" url="{media_url}" bootstrapInfoId="boot1"/>
</manifest>"#
    )
}

pub fn live_manifest(media_url: &str, abst_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest xmlns="http://ns.adobe.com/f4m/1.0">
  <id>fixture/live-video</id>
  <streamType>live</streamType>
  <bootstrapInfo profile="named" url="{abst_url}" id="boot1"/>
  <media streamId="video" url="{media_url}" bootstrapInfoId="boot1"/>
</manifest>"#
    )
}

/// Drain the stream until end of stream.
pub async fn read_to_end(stream: &mut FlvStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await.expect("stream read");
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Read exactly `total` bytes, failing the test on end of stream.
pub async fn read_exact(stream: &mut FlvStream, total: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(total);
    let mut buf = [0u8; 4096];
    while out.len() < total {
        let want = (total - out.len()).min(buf.len());
        let n = stream.read(&mut buf[..want]).await.expect("stream read");
        assert!(n > 0, "unexpected end of stream at {} of {total}", out.len());
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_serves_routes() {
        let router = Router::new().route("/x", axum::routing::get(|| async { "ok" }));
        let server = TestServer::serve(router).await;
        assert!(server.url("/x").as_str().starts_with("http://127.0.0.1:"));
    }

    #[test]
    fn manifests_are_long_enough_for_detection() {
        // recognition needs at least 200 bytes of manifest text
        assert!(vod_manifest(10.0, "video", b"abst").len() >= 200);
        assert!(live_manifest("video", "stream.abst").len() >= 200);
    }

    #[test]
    fn fragment_places_mdat_last() {
        let frag = build_fragment(b"payload");
        assert_eq!(&frag[frag.len() - 7..], b"payload");
        assert_eq!(&frag[4..8], b"afra");
    }
}
