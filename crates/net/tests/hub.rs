//! Host and participant sessions talking through a real hub

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use roomhop_core::{
    ChannelObserver, CoordinatorConfig, DirectoryEntry, LoopbackBackend, Notice, Session,
    SessionOptions,
};
use roomhop_net::{Hub, HubClient, RoomLink};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(3);

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        default_rooms: vec!["Alpha".into(), "Beta".into()],
        ..Default::default()
    }
}

fn local(hub: &Hub) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], hub.addr().port()))
}

async fn spawn(
    hub: &Hub,
    backend: &LoopbackBackend,
    options: SessionOptions,
) -> (Session, UnboundedReceiver<Notice>) {
    let client = HubClient::connect(local(hub), &options.display_name).await.unwrap();
    let (observer, notices) = ChannelObserver::new();
    let session = Session::spawn(
        Arc::new(backend.clone()),
        Arc::new(client),
        Arc::new(observer),
        options.with_config(config()),
    )
    .await
    .unwrap();
    (session, notices)
}

async fn wait_for_rooms(session: &Session, count: usize) -> Vec<DirectoryEntry> {
    timeout(WAIT, async {
        loop {
            let rooms = session.list_rooms().await.unwrap();
            if rooms.len() == count {
                return rooms;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("rooms never appeared")
}

async fn wait_for_current(session: &Session, room: &DirectoryEntry) {
    timeout(WAIT, async {
        while session.current_room().await.unwrap().as_ref() != Some(room) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("never reached room")
}

#[tokio::test]
async fn test_participant_joins_from_link_over_hub() {
    let hub = Hub::start(0).await.unwrap();
    let backend = LoopbackBackend::new();

    let (host, _) = spawn(&hub, &backend, SessionOptions::host("host")).await;
    let rooms = wait_for_rooms(&host, 2).await;
    let (alpha, beta) = (rooms[0].clone(), rooms[1].clone());
    assert!(hub.retained(&config().directory_topic).await.is_some());

    let link = RoomLink::for_room("https://meet.example/join", &beta).to_url();
    let parsed = RoomLink::parse(&link).unwrap();
    let options = SessionOptions::participant("guest").with_initial_target(parsed.room);
    let (guest, _) = spawn(&hub, &backend, options).await;

    assert_eq!(wait_for_rooms(&guest, 2).await, rooms);
    wait_for_current(&guest, &beta).await;
    assert_eq!(backend.members(&beta.external_session_id), vec!["guest".to_string()]);
    assert_eq!(backend.members(&alpha.external_session_id), vec!["host".to_string()]);

    let gamma = host.create_room("Gamma").await.unwrap();
    let seen = wait_for_rooms(&guest, 3).await;
    assert_eq!(seen[2], gamma);
    assert_eq!(hub.peer_count().await, 2);
}

#[tokio::test]
async fn test_move_request_over_hub() {
    let hub = Hub::start(0).await.unwrap();
    let backend = LoopbackBackend::new();

    let (host, _) = spawn(&hub, &backend, SessionOptions::host("host")).await;
    let rooms = wait_for_rooms(&host, 2).await;
    let (alpha, beta) = (rooms[0].clone(), rooms[1].clone());

    let options = SessionOptions::participant("guest")
        .with_initial_target(alpha.external_session_id.clone());
    let (guest, mut notices) = spawn(&hub, &backend, options).await;
    wait_for_rooms(&guest, 2).await;
    wait_for_current(&guest, &alpha).await;

    let me = guest
        .current_participants()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.is_local)
        .unwrap();
    timeout(WAIT, async {
        while host.current_participants().await.unwrap().len() != 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    host.request_move(me.participant_id, beta.id).await.unwrap();

    let moved = timeout(WAIT, async {
        loop {
            if let Some(Notice::MoveRequested(room)) = notices.recv().await {
                return room;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(moved, beta);
}
