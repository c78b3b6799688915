/// Integration test: drive live WebSocket connections against `serve` over
/// loopback and verify the client lifecycle end-to-end — heartbeat cadence,
/// pong-deadline disconnects, replacement close frames, and write-deadline
/// eviction — with deadlines shrunk to keep wall-clock time sane.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use wisp_gateway::connection::{self, Timing};
use wisp_gateway::Hub;
use wisp_types::events::{Event, EventPayload};

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Clone)]
struct TestState {
    hub: Hub,
    timing: Timing,
}

async fn ws_route(
    State(state): State<TestState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = params.get("user").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| {
        connection::serve_with_timing(socket, state.hub, user_id, state.timing)
    })
}

async fn start_server(timing: Timing) -> (Hub, SocketAddr) {
    let hub = Hub::new();
    let app = Router::new().route("/ws", get(ws_route)).with_state(TestState {
        hub: hub.clone(),
        timing,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (hub, addr)
}

async fn connect(addr: SocketAddr, user: &str) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/ws?user={user}"))
        .await
        .unwrap();
    ws
}

fn viewed(story_id: &str) -> Event {
    Event {
        payload: EventPayload::StoryViewed {
            story_id: story_id.into(),
            viewer_id: "v".into(),
            viewed_at: Utc::now(),
        },
        timestamp: Utc::now(),
    }
}

/// Registration races the upgrade handshake, so retry the notify until the
/// event comes back. Proves the connection's hub channel is live.
async fn await_event(ws: &mut WsClient, hub: &Hub, user: &str, story_id: &str) {
    for _ in 0..50 {
        hub.notify(user, &viewed(story_id));
        if let Ok(Some(Ok(Message::Text(text)))) =
            tokio::time::timeout(Duration::from_millis(100), ws.next()).await
        {
            if text.contains(story_id) {
                return;
            }
        }
    }
    panic!("event for {story_id} never delivered");
}

/// Reads until the connection terminates, skipping any buffered frames.
/// Panics if the server keeps it open past the deadline.
async fn await_disconnect(ws: &mut WsClient, deadline: Duration) {
    let cutoff = tokio::time::Instant::now() + deadline;
    loop {
        assert!(
            tokio::time::Instant::now() < cutoff,
            "server never dropped the connection"
        );
        match tokio::time::timeout(deadline, ws.next()).await.unwrap() {
            None | Some(Err(_)) => return,
            Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn pings_arrive_on_cadence_and_events_are_delivered() {
    let timing = Timing {
        ping_period: Duration::from_millis(100),
        pong_wait: Duration::from_secs(10),
        write_wait: Duration::from_secs(5),
    };
    let (hub, addr) = start_server(timing).await;
    let mut ws = connect(addr, "author").await;

    // Two heartbeats prove the cadence, not just a one-off. The client
    // library answers each ping automatically while we keep reading.
    let mut pings = 0;
    while pings < 2 {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if matches!(msg, Message::Ping(_)) {
            pings += 1;
        }
    }

    await_event(&mut ws, &hub, "author", "s1").await;
}

#[tokio::test]
async fn silent_client_is_dropped_after_pong_deadline() {
    let timing = Timing {
        ping_period: Duration::from_millis(100),
        pong_wait: Duration::from_millis(300),
        write_wait: Duration::from_secs(1),
    };
    let (_hub, addr) = start_server(timing).await;
    let mut ws = connect(addr, "u1").await;

    // Never read, so no pongs go out, and sit past the deadline.
    tokio::time::sleep(Duration::from_millis(900)).await;

    await_disconnect(&mut ws, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn replacement_closes_the_older_connection() {
    let timing = Timing {
        ping_period: Duration::from_secs(5),
        pong_wait: Duration::from_secs(10),
        write_wait: Duration::from_secs(5),
    };
    let (hub, addr) = start_server(timing).await;

    let mut first = connect(addr, "u1").await;
    await_event(&mut first, &hub, "u1", "warmup").await;

    let mut second = connect(addr, "u1").await;

    // The older connection gets an explicit Close frame, not just a hangup.
    let mut got_close = false;
    let cutoff = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < cutoff {
        match tokio::time::timeout(Duration::from_secs(5), first.next())
            .await
            .unwrap()
        {
            Some(Ok(Message::Close(_))) => {
                got_close = true;
                break;
            }
            None | Some(Err(_)) => break,
            Some(Ok(_)) => {} // leftover warmup duplicates
        }
    }
    assert!(got_close, "older connection never received a close frame");

    // Subsequent events land on the replacement.
    await_event(&mut second, &hub, "u1", "after-replacement").await;
}

#[tokio::test]
async fn stalled_writer_hits_the_write_deadline() {
    let timing = Timing {
        ping_period: Duration::from_secs(60),
        pong_wait: Duration::from_secs(60),
        write_wait: Duration::from_millis(100),
    };
    let (hub, addr) = start_server(timing).await;

    let mut ws = connect(addr, "u1").await;
    await_event(&mut ws, &hub, "u1", "warmup").await;

    // Stop reading and flood with oversized events. Once the socket buffers
    // fill, a write stalls past the deadline and the server must evict.
    let big = "x".repeat(256 * 1024);
    for _ in 0..400 {
        hub.notify("u1", &viewed(&big));
        tokio::task::yield_now().await;
    }

    await_disconnect(&mut ws, Duration::from_secs(30)).await;
}
