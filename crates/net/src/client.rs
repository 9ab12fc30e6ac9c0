//! TCP client for a pub/sub hub

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use roomhop_core::{BackendError, PubSub, PublishOptions};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::Message;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

type Reply = oneshot::Sender<Result<()>>;

enum ClientCommand {
    Subscribe {
        topic: String,
        deliveries: mpsc::UnboundedSender<String>,
        reply: Reply,
    },
    Publish {
        topic: String,
        payload: String,
        persist: bool,
        reply: Reply,
    },
    Ping(Reply),
    Disconnect,
}

/// Client handle for hub operations
pub struct HubClient {
    client_id: Uuid,
    state: Arc<RwLock<ConnectionState>>,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

impl HubClient {
    /// Connect to a hub and complete the handshake
    pub async fn connect(addr: SocketAddr, name: &str) -> Result<Self> {
        info!(addr = %addr, name = name, "Connecting to hub");

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);
        let client_id = Uuid::new_v4();

        write_frame(
            &mut writer,
            &Message::Hello {
                client_id,
                name: name.to_string(),
            },
        )
        .await?;

        match read_frame(&mut reader).await? {
            Message::Welcome { .. } => {}
            Message::Rejected { reason } => {
                warn!(reason = %reason, "Hub rejected connection");
                return Err(Error::Rejected(reason));
            }
            _ => return Err(Error::Protocol("Expected Welcome".into())),
        }

        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(connection_task(reader, writer, state.clone(), cmd_rx));

        info!(client_id = %client_id, "Connected to hub");
        Ok(HubClient {
            client_id,
            state,
            cmd_tx,
        })
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn request(&self, make: impl FnOnce(Reply) -> ClientCommand) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Publish a payload, waiting for the hub to fan it out
    pub async fn publish_to(&self, topic: &str, payload: String, persist: bool) -> Result<()> {
        self.request(|reply| ClientCommand::Publish {
            topic: topic.to_string(),
            payload,
            persist,
            reply,
        })
        .await
    }

    /// Subscribe to a topic. Any retained payload is already queued on return.
    pub async fn subscribe_to(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<String>> {
        let (deliveries, rx) = mpsc::unbounded_channel();
        self.request(|reply| ClientCommand::Subscribe {
            topic: topic.to_string(),
            deliveries,
            reply,
        })
        .await?;
        Ok(rx)
    }

    /// Round-trip a ping
    pub async fn ping(&self) -> Result<()> {
        self.request(ClientCommand::Ping).await
    }

    /// Disconnect from the hub
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }
}

#[async_trait]
impl PubSub for HubClient {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        options: PublishOptions,
    ) -> std::result::Result<(), BackendError> {
        Ok(self.publish_to(topic, payload, options.persist).await?)
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> std::result::Result<mpsc::UnboundedReceiver<String>, BackendError> {
        Ok(self.subscribe_to(topic).await?)
    }
}

/// Requests awaiting a hub reply, plus live subscriptions
#[derive(Default)]
struct Outstanding {
    next_id: u64,
    requests: HashMap<u64, Reply>,
    pings: VecDeque<Reply>,
    subscriptions: HashMap<u64, mpsc::UnboundedSender<String>>,
}

impl Outstanding {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fail_all(&mut self) {
        for (_, reply) in self.requests.drain() {
            let _ = reply.send(Err(Error::ConnectionClosed));
        }
        for reply in self.pings.drain(..) {
            let _ = reply.send(Err(Error::ConnectionClosed));
        }
        self.subscriptions.clear();
    }
}

/// Reader task - reads whole frames and forwards them to the connection task
async fn reader_task(mut reader: ReadHalf<TcpStream>, tx: mpsc::UnboundedSender<Message>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                debug!("Hub closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }
}

/// Main connection task
async fn connection_task(
    reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    state: Arc<RwLock<ConnectionState>>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    // Frames are read in their own task; a partially read frame must never
    // be dropped by the select below
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(reader_task(reader, frame_tx));
    let mut outstanding = Outstanding::default();

    loop {
        tokio::select! {
            msg = frame_rx.recv() => {
                match msg {
                    Some(Message::ServerShutdown) => {
                        info!("Hub is shutting down");
                        break;
                    }
                    Some(msg) => handle_hub_message(msg, &mut outstanding),
                    None => break,
                }
            }

            cmd = cmd_rx.recv() => {
                let (msg, reply) = match cmd {
                    Some(ClientCommand::Subscribe { topic, deliveries, reply }) => {
                        let subscription = outstanding.allocate();
                        // Registered before sending so the retained delivery has somewhere to go
                        outstanding.subscriptions.insert(subscription, deliveries);
                        outstanding.requests.insert(subscription, reply);
                        (Message::Subscribe { subscription, topic }, None)
                    }
                    Some(ClientCommand::Publish { topic, payload, persist, reply }) => {
                        let request_id = outstanding.allocate();
                        outstanding.requests.insert(request_id, reply);
                        (Message::Publish { request_id, topic, payload, persist }, None)
                    }
                    Some(ClientCommand::Ping(reply)) => (Message::Ping, Some(reply)),
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                };
                if let Some(reply) = reply {
                    outstanding.pings.push_back(reply);
                }
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    warn!(error = %e, "Write error");
                    break;
                }
            }
        }
    }

    reader.abort();
    *state.write().await = ConnectionState::Disconnected;
    outstanding.fail_all();
    info!("Disconnected from hub");
}

/// Route a hub message to whoever is waiting for it
fn handle_hub_message(msg: Message, outstanding: &mut Outstanding) {
    match msg {
        Message::Delivery {
            subscription,
            topic,
            payload,
        } => {
            let closed = match outstanding.subscriptions.get(&subscription) {
                Some(tx) => tx.send(payload).is_err(),
                None => {
                    debug!(subscription = subscription, topic = %topic, "Delivery for unknown subscription");
                    false
                }
            };
            if closed {
                outstanding.subscriptions.remove(&subscription);
            }
        }
        Message::Subscribed { subscription } => {
            if let Some(reply) = outstanding.requests.remove(&subscription) {
                let _ = reply.send(Ok(()));
            }
        }
        Message::Published { request_id } => {
            if let Some(reply) = outstanding.requests.remove(&request_id) {
                let _ = reply.send(Ok(()));
            }
        }
        Message::Failed { request_id, reason } => {
            outstanding.subscriptions.remove(&request_id);
            if let Some(reply) = outstanding.requests.remove(&request_id) {
                let _ = reply.send(Err(Error::Failed(reason)));
            }
        }
        Message::Pong => {
            if let Some(reply) = outstanding.pings.pop_front() {
                let _ = reply.send(Ok(()));
            }
        }
        _ => {
            debug!("Ignoring unexpected message from hub");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::hub::Hub;

    fn local(hub: &Hub) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], hub.addr().port()))
    }

    #[tokio::test]
    async fn test_publish_reaches_other_client() {
        let hub = Hub::start(0).await.unwrap();
        let host = HubClient::connect(local(&hub), "host").await.unwrap();
        let guest = HubClient::connect(local(&hub), "guest").await.unwrap();

        let mut rx = guest.subscribe_to("ROOM_MOVE").await.unwrap();
        host.publish_to("ROOM_MOVE", "go".into(), false).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "go");
        assert!(hub.retained("ROOM_MOVE").await.is_none());
        host.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_topic_fails() {
        let hub = Hub::start(0).await.unwrap();
        let client = HubClient::connect(local(&hub), "host").await.unwrap();

        let err = client.publish_to("  ", "x".into(), true).await.unwrap_err();
        assert!(matches!(err, Error::Failed(_)));
        assert!(client.subscribe_to("").await.is_err());
    }

    #[tokio::test]
    async fn test_command_while_frame_half_read() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let hub = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let client_id = match read_frame(&mut stream).await.unwrap() {
                Message::Hello { client_id, .. } => client_id,
                other => panic!("unexpected {:?}", other),
            };
            write_frame(&mut stream, &Message::Welcome { client_id }).await.unwrap();

            let mut pong = Vec::new();
            write_frame(&mut pong, &Message::Pong).await.unwrap();
            stream.write_all(&pong[..2]).await.unwrap();
            stream.flush().await.unwrap();

            let request_id = match read_frame(&mut stream).await.unwrap() {
                Message::Publish { request_id, .. } => request_id,
                other => panic!("unexpected {:?}", other),
            };
            stream.write_all(&pong[2..]).await.unwrap();
            write_frame(&mut stream, &Message::Published { request_id }).await.unwrap();
            stream
        });

        let client = HubClient::connect(addr, "guest").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            client.publish_to("t", "x".into(), false),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
        assert_eq!(client.connection_state().await, ConnectionState::Connected);
        let _stream = hub.await.unwrap();
    }

    #[tokio::test]
    async fn test_hub_shutdown_closes_subscriptions() {
        let hub = Hub::start(0).await.unwrap();
        let client = HubClient::connect(local(&hub), "guest").await.unwrap();
        let mut rx = client.subscribe_to("ROOM_LIST").await.unwrap();

        hub.shutdown().await;

        let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(matches!(client.ping().await, Err(Error::NotConnected)));
    }
}
