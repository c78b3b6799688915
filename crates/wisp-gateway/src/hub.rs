use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use wisp_types::events::Event;

/// Outbound queue per client. When it fills, the client is evicted rather
/// than blocking the hub; delivery is best-effort.
const CLIENT_QUEUE: usize = 256;

enum Command {
    Register {
        user_id: String,
        conn_id: u64,
        sender: mpsc::Sender<String>,
    },
    Unregister {
        user_id: String,
        conn_id: u64,
    },
    Notify {
        user_id: String,
        payload: String,
    },
}

struct Client {
    conn_id: u64,
    sender: mpsc::Sender<String>,
}

/// Registry mapping each user id to its single live notification channel.
///
/// All registry mutation flows through one unbounded command channel drained
/// by a single task, so the map needs no lock and events to one recipient
/// keep their enqueue order. Registering a user who already has a channel
/// drops the older channel, which closes it; its writer task then sends a
/// Close frame and exits.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<Command>,
    next_conn_id: Arc<AtomicU64>,
}

/// Handed to a connection on registration: the connection id (used to
/// unregister without racing a replacement) and the event stream to drain.
pub struct Registration {
    pub conn_id: u64,
    pub events: mpsc::Receiver<String>,
}

impl Hub {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self {
            tx,
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn register(&self, user_id: &str) -> Registration {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::channel(CLIENT_QUEUE);
        let _ = self.tx.send(Command::Register {
            user_id: user_id.to_string(),
            conn_id,
            sender,
        });
        Registration { conn_id, events }
    }

    pub fn unregister(&self, user_id: &str, conn_id: u64) {
        let _ = self.tx.send(Command::Unregister {
            user_id: user_id.to_string(),
            conn_id,
        });
    }

    /// Queues an event for one user. A no-op if the user has no live channel.
    pub fn notify(&self, user_id: &str, event: &Event) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping unencodable event: {e}");
                return;
            }
        };
        let _ = self.tx.send(Command::Notify {
            user_id: user_id.to_string(),
            payload,
        });
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut clients: HashMap<String, Client> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Register {
                user_id,
                conn_id,
                sender,
            } => {
                if clients
                    .insert(user_id.clone(), Client { conn_id, sender })
                    .is_some()
                {
                    info!(%user_id, "replaced existing notification channel");
                } else {
                    info!(%user_id, "notification channel connected");
                }
            }

            Command::Unregister { user_id, conn_id } => {
                // Only remove if this connection still owns the slot; a
                // replacement may already have taken it.
                if clients.get(&user_id).map(|c| c.conn_id) == Some(conn_id) {
                    clients.remove(&user_id);
                    info!(%user_id, "notification channel disconnected");
                }
            }

            Command::Notify { user_id, payload } => {
                let Some(client) = clients.get(&user_id) else {
                    continue;
                };
                if let Err(e) = client.sender.try_send(payload) {
                    match e {
                        mpsc::error::TrySendError::Full(_) => {
                            warn!(%user_id, "client queue full, evicting")
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            info!(%user_id, "client channel gone, evicting")
                        }
                    }
                    clients.remove(&user_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use wisp_types::events::EventPayload;

    fn viewed(n: u32) -> Event {
        Event {
            payload: EventPayload::StoryViewed {
                story_id: format!("s{n}"),
                viewer_id: "v".into(),
                viewed_at: Utc::now(),
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn events_arrive_in_enqueue_order() {
        let hub = Hub::new();
        let mut reg = hub.register("u1");

        for n in 0..3 {
            hub.notify("u1", &viewed(n));
        }

        for n in 0..3 {
            let raw = reg.events.recv().await.unwrap();
            assert!(raw.contains(&format!("\"s{n}\"")));
        }
    }

    #[tokio::test]
    async fn second_registration_closes_the_first() {
        let hub = Hub::new();
        let mut first = hub.register("u1");
        let mut second = hub.register("u1");

        // The older channel closes once the hub processes the replacement.
        assert_eq!(first.events.recv().await, None);

        hub.notify("u1", &viewed(1));
        assert!(second.events.recv().await.is_some());
    }

    #[tokio::test]
    async fn stale_unregister_does_not_evict_the_replacement() {
        let hub = Hub::new();
        let first = hub.register("u1");
        let mut second = hub.register("u1");

        hub.unregister("u1", first.conn_id);
        hub.notify("u1", &viewed(1));

        assert!(second.events.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_queue_evicts_the_client() {
        let hub = Hub::new();
        let mut reg = hub.register("u1");

        // One over the queue bound: the overflow event is dropped and the
        // client evicted, closing the channel behind the buffered events.
        for n in 0..(CLIENT_QUEUE as u32 + 1) {
            hub.notify("u1", &viewed(n));
        }

        let mut received = 0;
        while reg.events.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, CLIENT_QUEUE);
    }

    #[tokio::test]
    async fn notify_without_a_channel_is_a_no_op() {
        let hub = Hub::new();
        hub.notify("nobody", &viewed(1));

        // The hub stays healthy for later registrations.
        let mut reg = hub.register("u1");
        hub.notify("u1", &viewed(2));
        let raw = tokio::time::timeout(Duration::from_secs(1), reg.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(raw.contains("story.viewed"));
    }
}
