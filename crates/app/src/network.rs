//! Pub/sub transport for the console
//!
//! Either every client shares one in-process [`LocalPubSub`], or a hub is
//! started on a local port and every client gets its own TCP connection.

use std::net::SocketAddr;
use std::sync::Arc;

use roomhop_core::{LocalPubSub, PubSub};
use roomhop_net::{Hub, HubClient};
use tracing::info;

use crate::error::Result;

pub enum Transport {
    Local(LocalPubSub),
    Tcp {
        hub: Hub,
        clients: Vec<Arc<HubClient>>,
    },
}

impl Transport {
    pub fn local() -> Self {
        Transport::Local(LocalPubSub::new())
    }

    /// Start a hub on `port`
    pub async fn tcp(port: u16) -> Result<Self> {
        let hub = Hub::start(port).await?;
        info!(addr = %hub.addr(), "Directory hub running");
        Ok(Transport::Tcp {
            hub,
            clients: Vec::new(),
        })
    }

    /// Pub/sub handle for one more client
    pub async fn connect(&mut self, name: &str) -> Result<Arc<dyn PubSub>> {
        match self {
            Transport::Local(pubsub) => Ok(Arc::new(pubsub.clone())),
            Transport::Tcp { hub, clients } => {
                let addr = SocketAddr::from(([127, 0, 0, 1], hub.addr().port()));
                let client = Arc::new(HubClient::connect(addr, name).await?);
                clients.push(client.clone());
                Ok(client)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Transport::Local(_) => "in-process pub/sub".to_string(),
            Transport::Tcp { hub, .. } => format!("hub on {}", hub.addr()),
        }
    }

    pub async fn shutdown(&self) {
        if let Transport::Tcp { hub, clients } = self {
            for client in clients {
                client.disconnect().await;
            }
            hub.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomhop_core::PublishOptions;

    #[tokio::test]
    async fn test_tcp_transport_shares_topics() {
        let mut transport = Transport::tcp(0).await.unwrap();
        let a = transport.connect("a").await.unwrap();
        let b = transport.connect("b").await.unwrap();

        a.publish("ROOM_LIST", "x".into(), PublishOptions::persist())
            .await
            .unwrap();
        let mut rx = b.subscribe("ROOM_LIST").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "x");
        transport.shutdown().await;
    }
}
