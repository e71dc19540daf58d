use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use pulseboard_core_types::SubjectId;
use pulseboard_state_center::FlowBoard;
use pulseboard_stream_client::{HttpStreamTransport, StreamClient, StreamConfig};
use tokio::sync::mpsc;

type Feed = Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>;

async fn stream(State(feed): State<Feed>) -> Response {
    let Some(rx) = feed.lock().take() else {
        return StatusCode::CONFLICT.into_response();
    };
    let lines = futures::stream::unfold(rx, |mut rx| async move {
        let line = rx.recv().await?;
        Some((Ok::<_, std::io::Error>(format!("{line}\n")), rx))
    });
    Body::from_stream(lines).into_response()
}

async fn spawn_server(feed: Feed) -> SocketAddr {
    let app = Router::new()
        .route("/events/stream", get(stream))
        .with_state(feed);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn pushed_flow_appears_then_disappears() {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = spawn_server(Arc::new(Mutex::new(Some(rx)))).await;

    let transport = Arc::new(HttpStreamTransport::new(Duration::from_secs(2)).unwrap());
    let client = StreamClient::new(
        transport,
        StreamConfig {
            reconnect_base_delay: Duration::from_secs(30),
            max_attempts: 1,
            ..StreamConfig::default()
        },
    );
    let board = Arc::new(FlowBoard::default());
    board.attach(&client.bus());
    client
        .connect(&format!("http://{addr}/events/stream"), "token")
        .unwrap();

    let f1 = SubjectId::from("f1");
    tx.send(r#"{"kind":"flow-started","subjectId":"f1","payload":{"name":"ingest"}}"#.into())
        .unwrap();
    assert!(eventually(|| board.is_active(&f1)).await, "f1 should be shown");

    tx.send(r#"{"kind":"flow-completed","subjectId":"f1"}"#.into())
        .unwrap();
    assert!(eventually(|| !board.is_active(&f1)).await, "f1 should be hidden");

    let stats = board.stats();
    assert_eq!(stats.flows_started, 1);
    assert_eq!(stats.flows_completed, 1);
    client.disconnect();
}
