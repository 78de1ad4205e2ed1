//! VOD end-to-end: the filter output is the FLV header followed by each
//! fragment's `mdat` payload in timeline order.

mod fixture;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;

use aulos_hds::{FLV_HEADER, FlvStream, HdsError, HdsOptions, HttpClient, Net, NetOptions};
use fixture::{TestServer, build_abst, build_fragment, read_exact, read_to_end, vod_manifest};

fn payload(n: u32) -> Vec<u8> {
    format!("FRAG{n}:").into_bytes().repeat(40)
}

/// timescale 1000, one segment run `{1, 4}`, one fragment run
/// `{start 1, ts 0, dur 2500}`, duration 10 s: fragments Seg1-Frag1..4.
async fn vod_server() -> TestServer {
    let abst = build_abst(1000, 0, &[(1, 4)], 1000, &[(1, 0, 2500)]);
    let manifest = vod_manifest(10.0, "video", &abst);

    let mut router = Router::new().route("/stream.f4m", get(move || async move { manifest }));
    for frag in 1..=4u32 {
        let body = build_fragment(&payload(frag));
        router = router.route(
            &format!("/videoSeg1-Frag{frag}"),
            get(move || async move { body }),
        );
    }
    TestServer::serve(router).await
}

fn net() -> Arc<dyn Net> {
    Arc::new(HttpClient::new(NetOptions::default()).unwrap())
}

#[tokio::test]
async fn output_is_header_plus_concatenated_mdats() {
    fixture::init_tracing();
    let server = vod_server().await;

    let mut stream = FlvStream::open(server.url("/stream.f4m"), HdsOptions::default(), net())
        .await
        .unwrap();
    assert!(!stream.is_live());

    let out = read_to_end(&mut stream).await;

    let mut expected = FLV_HEADER.to_vec();
    for frag in 1..=4u32 {
        expected.extend_from_slice(&payload(frag));
    }
    assert_eq!(out, expected);
    assert_eq!(stream.downloaded_fragments(), 4);

    stream.close().await;
}

#[tokio::test]
async fn peek_is_idempotent_and_never_spans_chunks() {
    let server = vod_server().await;

    let mut stream = FlvStream::open(server.url("/stream.f4m"), HdsOptions::default(), net())
        .await
        .unwrap();

    // header window first
    assert_eq!(&stream.peek(5)[..], &FLV_HEADER[..5]);
    assert_eq!(&stream.peek(5)[..], &FLV_HEADER[..5]);
    assert_eq!(&stream.peek(64)[..], &FLV_HEADER[..]);

    // consume exactly the header, then peek into the first fragment
    let header = read_exact(&mut stream, FLV_HEADER.len()).await;
    assert_eq!(header, FLV_HEADER);

    // the first fragment may still be in flight; wait for it to surface
    let first = payload(1);
    let a = loop {
        let window = stream.peek(8);
        if !window.is_empty() {
            break window;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    let b = stream.peek(8);
    assert_eq!(a, b, "peek must not advance the read cursor");
    assert_eq!(&a[..], &first[..8]);

    // a peek larger than the head chunk stays within it
    let big = stream.peek(first.len() + 1000);
    assert_eq!(&big[..], &first[..]);

    stream.close().await;
}

#[tokio::test]
async fn control_surface_reports_forward_only_stream() {
    let server = vod_server().await;

    let opts = HdsOptions::default().with_network_caching(Duration::from_millis(700));
    let stream = FlvStream::open(server.url("/stream.f4m"), opts, net())
        .await
        .unwrap();

    let caps = stream.caps();
    assert!(!caps.can_seek);
    assert!(!caps.can_fastseek);
    assert!(!caps.can_pause);
    assert!(caps.can_control_pace);
    assert_eq!(caps.pts_delay, Duration::from_millis(700));

    stream.close().await;
}

#[tokio::test]
async fn non_hds_input_is_refused() {
    let doc = format!("<?xml version=\"1.0\"?><MPD>{}</MPD>", "x".repeat(300));
    let router = Router::new().route("/stream.mpd", get(move || async move { doc }));
    let server = TestServer::serve(router).await;

    let err = FlvStream::open(server.url("/stream.mpd"), HdsOptions::default(), net())
        .await
        .unwrap_err();
    assert!(matches!(err, HdsError::NotHds));
}

#[tokio::test]
async fn missing_mdat_falls_back_to_whole_payload() {
    // fragments with no mdat box at all: the filter passes the body through
    let abst = build_abst(1000, 0, &[(1, 4)], 1000, &[(1, 0, 2500)]);
    let manifest = vod_manifest(2.5, "video", &abst);
    let body = b"no boxes at all, just bytes".to_vec();
    let frag = body.clone();

    let router = Router::new()
        .route("/stream.f4m", get(move || async move { manifest }))
        .route("/videoSeg1-Frag1", get(move || async move { frag }));
    let server = TestServer::serve(router).await;

    let mut stream = FlvStream::open(server.url("/stream.f4m"), HdsOptions::default(), net())
        .await
        .unwrap();
    let out = read_to_end(&mut stream).await;

    let mut expected = FLV_HEADER.to_vec();
    expected.extend_from_slice(&body);
    assert_eq!(out, expected);

    stream.close().await;
}
