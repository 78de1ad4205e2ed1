use axum::{Router, http::StatusCode, routing::get};
use aulos_net::{HttpClient, Net, NetError, NetOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use url::Url;

async fn spawn_server(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{addr}")).unwrap()
}

/// Serves one connection with a hand-written response whose body is shorter
/// than its `Content-Length`, then drops the socket.
async fn spawn_truncating_server(advertised: usize, body: &'static [u8]) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {advertised}\r\nConnection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body).await.unwrap();
        socket.shutdown().await.ok();
    });
    Url::parse(&format!("http://{addr}")).unwrap()
}

fn client() -> HttpClient {
    HttpClient::new(NetOptions::default()).unwrap()
}

#[tokio::test]
async fn get_bytes_returns_full_body() {
    let router = Router::new().route("/data", get(|| async { "Hello, World!" }));
    let base = spawn_server(router).await;

    let bytes = client().get_bytes(base.join("/data").unwrap()).await.unwrap();
    assert_eq!(&bytes[..], b"Hello, World!");
}

#[tokio::test]
async fn get_bytes_maps_status_errors() {
    let router = Router::new().route(
        "/missing",
        get(|| async { (StatusCode::NOT_FOUND, "gone") }),
    );
    let base = spawn_server(router).await;

    let err = client()
        .get_bytes(base.join("/missing").unwrap())
        .await
        .unwrap_err();
    match err {
        NetError::HttpStatus { status, .. } => assert_eq!(status, 404),
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn truncated_body_is_a_short_read() {
    let base = spawn_truncating_server(10, b"7 bytes").await;

    let err = client().get_bytes(base).await.unwrap_err();
    match err {
        NetError::ShortRead { expected, received } => {
            assert_eq!(expected, 10);
            assert_eq!(received, 7);
        }
        other => panic!("expected ShortRead, got {other:?}"),
    }
}

#[tokio::test]
async fn binary_body_roundtrips() {
    let payload: Vec<u8> = (0u8..=255).collect();
    let body = payload.clone();
    let router = Router::new().route("/frag", get(move || async move { body.clone() }));
    let base = spawn_server(router).await;

    let bytes = client().get_bytes(base.join("/frag").unwrap()).await.unwrap();
    assert_eq!(&bytes[..], &payload[..]);
}
