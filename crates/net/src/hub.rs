//! TCP publish/subscribe hub
//!
//! One process runs the hub; every client, host or participant, connects
//! to it. Payloads published with `persist` are retained per topic and
//! replayed to each new subscription before anything else.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::Message;

/// Maximum number of connected clients
const MAX_PEERS: usize = 64;

/// Connected client state
struct Peer {
    name: String,
    /// Unbounded so queueing never waits while the state lock is held
    tx: mpsc::UnboundedSender<Message>,
    /// Subscription id -> topic
    subscriptions: HashMap<u64, String>,
}

/// Hub state shared across connection tasks
#[derive(Default)]
struct HubState {
    peers: HashMap<Uuid, Peer>,
    retained: HashMap<String, String>,
}

impl HubState {
    /// Queue a payload for every subscription on `topic`
    fn fan_out(&self, topic: &str, payload: &str) -> usize {
        let mut delivered = 0;
        for (client_id, peer) in &self.peers {
            for (subscription, subscribed) in &peer.subscriptions {
                if subscribed != topic {
                    continue;
                }
                let msg = Message::Delivery {
                    subscription: *subscription,
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                };
                if peer.tx.send(msg).is_err() {
                    debug!(client_id = %client_id, "Delivery dropped, peer is gone");
                } else {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

/// Hub handle
pub struct Hub {
    addr: SocketAddr,
    state: Arc<RwLock<HubState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Hub {
    /// Start a hub on the given port (0 picks a free one)
    pub async fn start(port: u16) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Hub started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(HubState::default()));

        tokio::spawn(accept_loop(listener, state.clone(), shutdown_tx.clone()));

        Ok(Hub {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the hub's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connected clients
    pub async fn peer_count(&self) -> usize {
        self.state.read().await.peers.len()
    }

    /// Names of connected clients
    pub async fn peer_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .peers
            .values()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Latest retained payload for a topic
    pub async fn retained(&self, topic: &str) -> Option<String> {
        self.state.read().await.retained.get(topic).cloned()
    }

    /// Tell every client the hub is going away and stop accepting
    pub async fn shutdown(&self) {
        {
            let s = self.state.read().await;
            for peer in s.peers.values() {
                let _ = peer.tx.send(Message::ServerShutdown);
            }
        }
        let _ = self.shutdown_tx.send(());
        info!("Hub shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<HubState>>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(stream, addr, state.clone(), shutdown_tx.subscribe()));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RwLock<HubState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let client_id = match handle_hello(&mut reader, &state).await {
        Ok((client_id, msg_rx)) => {
            if let Err(e) = write_frame(&mut writer, &Message::Welcome { client_id }).await {
                warn!(addr = %addr, error = %e, "Welcome failed");
                remove_peer(&state, client_id).await;
                return;
            }
            tokio::spawn(writer_task(writer, msg_rx));
            client_id
        }
        Err(e) => {
            warn!(addr = %addr, error = %e, "Hello refused");
            let _ = write_frame(
                &mut writer,
                &Message::Rejected {
                    reason: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    info!(addr = %addr, client_id = %client_id, "Client connected");

    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(msg) => handle_message(msg, client_id, &state).await,
                    Err(Error::ConnectionClosed) => {
                        debug!(client_id = %client_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(client_id = %client_id, "Closing connection for shutdown");
                break;
            }
        }
    }

    remove_peer(&state, client_id).await;
    info!(client_id = %client_id, "Client disconnected");
}

/// Register a client from its Hello
async fn handle_hello(
    reader: &mut ReadHalf<TcpStream>,
    state: &Arc<RwLock<HubState>>,
) -> Result<(Uuid, mpsc::UnboundedReceiver<Message>)> {
    match read_frame(reader).await? {
        Message::Hello { client_id, name } => {
            let mut s = state.write().await;

            if s.peers.len() >= MAX_PEERS {
                return Err(Error::HubFull);
            }
            if s.peers.contains_key(&client_id) {
                return Err(Error::Rejected("Already connected".into()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            s.peers.insert(
                client_id,
                Peer {
                    name,
                    tx,
                    subscriptions: HashMap::new(),
                },
            );
            Ok((client_id, rx))
        }
        _ => Err(Error::Protocol("Expected Hello".into())),
    }
}

/// Writer task - sends queued messages to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Handle an incoming message
async fn handle_message(msg: Message, sender_id: Uuid, state: &Arc<RwLock<HubState>>) {
    match msg {
        Message::Subscribe {
            subscription,
            topic,
        } => {
            let mut s = state.write().await;
            let retained = s.retained.get(&topic).cloned();
            let Some(peer) = s.peers.get_mut(&sender_id) else {
                return;
            };

            if topic.trim().is_empty() {
                let _ = peer.tx.send(Message::Failed {
                    request_id: subscription,
                    reason: "empty topic".into(),
                });
                return;
            }

            // Retained payload goes out before the ack and before any later publish
            if let Some(payload) = retained {
                let _ = peer.tx.send(Message::Delivery {
                    subscription,
                    topic: topic.clone(),
                    payload,
                });
            }
            debug!(client_id = %sender_id, topic = %topic, "Subscribed");
            peer.subscriptions.insert(subscription, topic);
            let _ = peer.tx.send(Message::Subscribed { subscription });
        }
        Message::Publish {
            request_id,
            topic,
            payload,
            persist,
        } => {
            let reply = if topic.trim().is_empty() {
                Message::Failed {
                    request_id,
                    reason: "empty topic".into(),
                }
            } else {
                let mut s = state.write().await;
                if persist {
                    s.retained.insert(topic.clone(), payload.clone());
                }
                let delivered = s.fan_out(&topic, &payload);
                debug!(topic = %topic, delivered = delivered, persist = persist, "Published");
                Message::Published { request_id }
            };

            let s = state.read().await;
            if let Some(peer) = s.peers.get(&sender_id) {
                let _ = peer.tx.send(reply);
            }
        }
        Message::Ping => {
            let s = state.read().await;
            if let Some(peer) = s.peers.get(&sender_id) {
                let _ = peer.tx.send(Message::Pong);
            }
        }
        _ => {
            debug!(client_id = %sender_id, "Ignoring unexpected message type");
        }
    }
}

/// Drop a client and all its subscriptions
async fn remove_peer(state: &Arc<RwLock<HubState>>, client_id: Uuid) {
    state.write().await.peers.remove(&client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    async fn raw_client(hub: &Hub, name: &str) -> TcpStream {
        let mut stream = TcpStream::connect(("127.0.0.1", hub.addr().port())).await.unwrap();
        write_frame(
            &mut stream,
            &Message::Hello {
                client_id: Uuid::new_v4(),
                name: name.into(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            read_frame(&mut stream).await.unwrap(),
            Message::Welcome { .. }
        ));
        stream
    }

    #[tokio::test]
    async fn test_hub_start() {
        let hub = Hub::start(0).await.unwrap();
        assert!(hub.addr().port() > 0);
        assert_eq!(hub.peer_count().await, 0);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_retained_delivered_before_ack() {
        let hub = Hub::start(0).await.unwrap();
        let mut publisher = raw_client(&hub, "host").await;
        write_frame(
            &mut publisher,
            &Message::Publish {
                request_id: 1,
                topic: "ROOM_LIST".into(),
                payload: "one".into(),
                persist: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(
            read_frame(&mut publisher).await.unwrap(),
            Message::Published { request_id: 1 }
        );
        assert_eq!(hub.retained("ROOM_LIST").await.as_deref(), Some("one"));

        let mut late = raw_client(&hub, "late").await;
        write_frame(
            &mut late,
            &Message::Subscribe {
                subscription: 7,
                topic: "ROOM_LIST".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            read_frame(&mut late).await.unwrap(),
            Message::Delivery {
                subscription: 7,
                topic: "ROOM_LIST".into(),
                payload: "one".into(),
            }
        );
        assert_eq!(
            read_frame(&mut late).await.unwrap(),
            Message::Subscribed { subscription: 7 }
        );
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_every_delivery() {
        let hub = Hub::start(0).await.unwrap();
        let mut slow = raw_client(&hub, "slow").await;
        write_frame(
            &mut slow,
            &Message::Subscribe {
                subscription: 1,
                topic: "ROOM_LIST".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            read_frame(&mut slow).await.unwrap(),
            Message::Subscribed { subscription: 1 }
        );

        // Several megabytes queued while the subscriber reads nothing
        let filler = "x".repeat(8192);
        let mut publisher = raw_client(&hub, "host").await;
        for request_id in 0..600u64 {
            write_frame(
                &mut publisher,
                &Message::Publish {
                    request_id,
                    topic: "ROOM_LIST".into(),
                    payload: format!("snapshot-{}-{}", request_id, filler),
                    persist: true,
                },
            )
            .await
            .unwrap();
            assert_eq!(
                read_frame(&mut publisher).await.unwrap(),
                Message::Published { request_id }
            );
        }

        for n in 0..600u64 {
            assert_eq!(
                read_frame(&mut slow).await.unwrap(),
                Message::Delivery {
                    subscription: 1,
                    topic: "ROOM_LIST".into(),
                    payload: format!("snapshot-{}-{}", n, filler),
                }
            );
        }
        assert_eq!(
            hub.retained("ROOM_LIST").await,
            Some(format!("snapshot-599-{}", filler))
        );
    }

    #[tokio::test]
    async fn test_first_message_must_be_hello() {
        let hub = Hub::start(0).await.unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", hub.addr().port())).await.unwrap();
        write_frame(&mut stream, &Message::Ping).await.unwrap();
        assert!(matches!(
            read_frame(&mut stream).await.unwrap(),
            Message::Rejected { .. }
        ));
    }
}
