use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::hub::Hub;

/// Time allowed for any single outbound write.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// The client must send something (normally a pong) within this window.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping cadence; must stay under PONG_WAIT.
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Connection deadlines. Production uses `Timing::default()`; the
/// integration tests shrink these to keep wall-clock time sane.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            ping_period: PING_PERIOD,
            pong_wait: PONG_WAIT,
            write_wait: WRITE_WAIT,
        }
    }
}

/// Drives one authenticated WebSocket client with the default deadlines.
pub async fn serve(socket: WebSocket, hub: Hub, user_id: String) {
    serve_with_timing(socket, hub, user_id, Timing::default()).await
}

/// Registers the client's channel with the hub, then runs a writer task
/// (events + heartbeat pings, each write under a deadline) and a reader task
/// (pong liveness). Either side failing tears the whole connection down and
/// unregisters.
pub async fn serve_with_timing(socket: WebSocket, hub: Hub, user_id: String, timing: Timing) {
    let (mut sink, mut stream) = socket.split();

    let registration = hub.register(&user_id);
    let conn_id = registration.conn_id;
    let mut events = registration.events;

    info!(%user_id, "websocket client connected");

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(timing.ping_period);
        // Skip the immediate first tick.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                maybe = events.recv() => {
                    match maybe {
                        Some(payload) => {
                            if write(&mut sink, Message::Text(payload.into()), timing.write_wait)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        // Channel closed: a newer connection replaced this
                        // one (or the hub evicted it). Tell the client.
                        None => {
                            let _ = write(&mut sink, Message::Close(None), timing.write_wait).await;
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if write(&mut sink, Message::Ping(Vec::new().into()), timing.write_wait)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    });

    let reader_user = user_id.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match timeout(timing.pong_wait, stream.next()).await {
                Err(_) => {
                    warn!(user_id = %reader_user, "pong deadline missed, dropping connection");
                    break;
                }
                Ok(None) | Ok(Some(Err(_))) => break,
                Ok(Some(Ok(Message::Close(_)))) => break,
                // Pongs (and anything else the client sends) count as
                // liveness; inbound frames are otherwise ignored on this
                // one-way notification stream.
                Ok(Some(Ok(_))) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(&user_id, conn_id);
    info!(%user_id, "websocket client disconnected");
}

async fn write(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    write_wait: Duration,
) -> Result<(), ()> {
    match timeout(write_wait, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!("websocket write failed: {e}");
            Err(())
        }
        Err(_) => {
            warn!("websocket write deadline exceeded");
            Err(())
        }
    }
}
