//! Per-client session
//!
//! Every client, host or participant, runs one task that owns the room
//! registry, the local directory copy, both coordinators and the roster.
//! Commands from the surrounding code, binding events from the media
//! backend, pub/sub payloads (directory, move requests, reactions) and
//! coordinator deadlines are all delivered
//! into that one loop, so no state transition ever runs concurrently with
//! another.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BindingEvent, MediaBackend, MediaFlags};
use crate::config::CoordinatorConfig;
use crate::directory::{DirectoryChannel, DirectoryUpdate, LocalDirectory};
use crate::error::{Error, Result};
use crate::invariants::assert_bindings_distinct;
use crate::models::{
    DirectoryEntry, ExternalSessionId, MoveRequest, ParticipantEntry, Reaction, RelayState,
    RoomId,
};
use crate::notify::{Notifier, SessionObserver};
use crate::pubsub::{PubSub, PublishOptions};
use crate::registry::{RoomRegistry, RoomRemoval};
use crate::relay::{RelayCheck, RelayCoordinator, RelayOutcome, RelayReply, RelaySettings};
use crate::roster::ParticipantDirectory;
use crate::switch::{
    RoomSwitchCoordinator, SwitchOutcome, SwitchProgress, SwitchReply, SwitchSettings, SwitchState,
};

/// Which side of the directory a client is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Participant,
}

/// Target of a switch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomTarget {
    Room(RoomId),
    /// An external session, typically taken from a room link
    Session(ExternalSessionId),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub role: Role,
    pub display_name: String,
    pub config: CoordinatorConfig,
    /// Room to join on startup
    pub initial_target: Option<ExternalSessionId>,
}

impl SessionOptions {
    pub fn host(display_name: impl Into<String>) -> Self {
        Self {
            role: Role::Host,
            display_name: display_name.into(),
            config: CoordinatorConfig::default(),
            initial_target: None,
        }
    }

    pub fn participant(display_name: impl Into<String>) -> Self {
        Self {
            role: Role::Participant,
            ..Self::host(display_name)
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_initial_target(mut self, target: ExternalSessionId) -> Self {
        self.initial_target = Some(target);
        self
    }
}

enum Command {
    CreateRoom {
        name: String,
        reply: oneshot::Sender<Result<DirectoryEntry>>,
    },
    DeleteRoom {
        id: RoomId,
        reply: oneshot::Sender<Result<bool>>,
    },
    ListRooms(oneshot::Sender<Vec<DirectoryEntry>>),
    CurrentRoom(oneshot::Sender<Option<DirectoryEntry>>),
    SwitchToRoom {
        target: RoomTarget,
        reply: SwitchReply,
    },
    SwitchState(oneshot::Sender<SwitchState>),
    ActivateRelay {
        source: RoomId,
        target: RoomId,
        reply: RelayReply,
    },
    DeactivateRelay(oneshot::Sender<bool>),
    RelayState(oneshot::Sender<RelayState>),
    Participants(oneshot::Sender<Vec<ParticipantEntry>>),
    RequestMove {
        participant_id: String,
        room: RoomId,
        reply: oneshot::Sender<Result<()>>,
    },
    SendReaction {
        emoji: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Who is waiting on an allocation
enum Origin {
    Startup,
    Caller(oneshot::Sender<Result<DirectoryEntry>>),
}

/// Completions of work spawned off the loop
enum Internal {
    Allocated {
        name: String,
        result: std::result::Result<ExternalSessionId, BackendError>,
        origin: Origin,
    },
}

/// Handle to a running client session
#[derive(Clone)]
pub struct Session {
    role: Role,
    cmd_tx: mpsc::Sender<Command>,
}

impl Session {
    /// Start the client loop. Participants subscribe to the directory and
    /// move topics before this returns, every client to the reaction topic;
    /// hosts start creating the default rooms.
    pub async fn spawn(
        backend: Arc<dyn MediaBackend>,
        pubsub: Arc<dyn PubSub>,
        observer: Arc<dyn SessionObserver>,
        options: SessionOptions,
    ) -> Result<Self> {
        options.config.validate()?;

        let channel = DirectoryChannel::new(pubsub.clone(), options.config.directory_topic.clone());
        let (directory_rx, move_rx) = match options.role {
            Role::Host => (None, None),
            Role::Participant => (
                Some(channel.subscribe().await?),
                Some(pubsub.subscribe(&options.config.move_topic).await?),
            ),
        };

        let reaction_rx = pubsub.subscribe(&options.config.reaction_topic).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let role = options.role;
        let actor = SessionActor::new(backend, pubsub, channel, Notifier::new(observer), options, event_tx, internal_tx);
        tokio::spawn(actor.run(
            cmd_rx,
            event_rx,
            internal_rx,
            Subscriptions {
                directory: directory_rx,
                moves: move_rx,
                reactions: Some(reaction_rx),
            },
        ));

        Ok(Self { role, cmd_tx })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Allocate an external session and register a room for it (host only)
    pub async fn create_room(&self, name: impl Into<String>) -> Result<DirectoryEntry> {
        let name = name.into();
        self.request(|reply| Command::CreateRoom { name, reply }).await?
    }

    /// Remove a room (host only). Returns false if the id was unknown.
    pub async fn delete_room(&self, id: RoomId) -> Result<bool> {
        self.request(|reply| Command::DeleteRoom { id, reply }).await?
    }

    /// Rooms as this client knows them: the registry for the host, the last
    /// snapshot for participants
    pub async fn list_rooms(&self) -> Result<Vec<DirectoryEntry>> {
        self.request(Command::ListRooms).await
    }

    pub async fn current_room(&self) -> Result<Option<DirectoryEntry>> {
        self.request(Command::CurrentRoom).await
    }

    /// Move this client's primary binding. Resolves once the switch reaches
    /// `Idle` in the new room or `Failed`.
    pub async fn switch_to_room(&self, target: RoomTarget) -> Result<SwitchOutcome> {
        self.request(|reply| Command::SwitchToRoom { target, reply }).await?
    }

    pub async fn switch_state(&self) -> Result<SwitchState> {
        self.request(Command::SwitchState).await
    }

    /// Relay `source`'s media into `target`. Resolves once the relay binding
    /// has joined the target room.
    pub async fn activate_relay(&self, source: RoomId, target: RoomId) -> Result<RelayOutcome> {
        self.request(|reply| Command::ActivateRelay { source, target, reply }).await?
    }

    /// Tear down the relay. Returns false if none was active.
    pub async fn deactivate_relay(&self) -> Result<bool> {
        self.request(Command::DeactivateRelay).await
    }

    pub async fn relay_state(&self) -> Result<RelayState> {
        self.request(Command::RelayState).await
    }

    /// Roster of the room the primary binding is in
    pub async fn current_participants(&self) -> Result<Vec<ParticipantEntry>> {
        self.request(Command::Participants).await
    }

    /// Ask a participant in the host's room to move (host only). Delivery
    /// is a notification; the participant decides whether to switch.
    pub async fn request_move(&self, participant_id: impl Into<String>, room: RoomId) -> Result<()> {
        let participant_id = participant_id.into();
        self.request(|reply| Command::RequestMove {
            participant_id,
            room,
            reply,
        })
        .await?
    }

    /// Broadcast an emoji to everyone in the meeting, this client included.
    /// Reactions are transient; late joiners never see earlier ones.
    pub async fn send_reaction(&self, emoji: impl Into<String>) -> Result<()> {
        let emoji = emoji.into();
        self.request(|reply| Command::SendReaction { emoji, reply }).await?
    }

    /// Leave every binding and stop the loop
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }
}

/// Pub/sub topics the loop listens on; `None` once closed or never opened
struct Subscriptions {
    directory: Option<mpsc::UnboundedReceiver<String>>,
    moves: Option<mpsc::UnboundedReceiver<String>>,
    reactions: Option<mpsc::UnboundedReceiver<String>>,
}

struct SessionActor {
    role: Role,
    display_name: String,
    config: CoordinatorConfig,
    initial_target: Option<ExternalSessionId>,
    backend: Arc<dyn MediaBackend>,
    pubsub: Arc<dyn PubSub>,
    channel: DirectoryChannel,
    notifier: Notifier,
    registry: RoomRegistry,
    directory: LocalDirectory,
    switch: RoomSwitchCoordinator,
    relay: RelayCoordinator,
    roster: ParticipantDirectory,
    internal_tx: mpsc::UnboundedSender<Internal>,
    pending_defaults: VecDeque<String>,
}

impl SessionActor {
    fn new(
        backend: Arc<dyn MediaBackend>,
        pubsub: Arc<dyn PubSub>,
        channel: DirectoryChannel,
        notifier: Notifier,
        options: SessionOptions,
        event_tx: mpsc::UnboundedSender<BindingEvent>,
        internal_tx: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        let config = options.config;
        let is_host = options.role == Role::Host;
        let media = if is_host {
            MediaFlags::off()
        } else {
            MediaFlags {
                mic: true,
                webcam: true,
            }
        };

        let switch = RoomSwitchCoordinator::new(
            backend.clone(),
            event_tx.clone(),
            notifier.clone(),
            SwitchSettings {
                display_name: options.display_name.clone(),
                is_host,
                media,
                settle_delay: config.settle_delay(),
                join_timeout: config.join_timeout(),
                leave_timeout: config.leave_timeout(),
            },
        );
        let relay = RelayCoordinator::new(
            backend.clone(),
            event_tx,
            notifier.clone(),
            RelaySettings {
                display_name: format!("{}{}", options.display_name, config.relay_name_suffix),
                kinds: config.relay_kinds.clone(),
                timeout: config.relay_timeout(),
            },
        );

        Self {
            role: options.role,
            display_name: options.display_name,
            initial_target: options.initial_target,
            backend,
            pubsub,
            channel,
            notifier,
            registry: RoomRegistry::new(),
            directory: LocalDirectory::new(),
            switch,
            relay,
            roster: ParticipantDirectory::new(),
            internal_tx,
            pending_defaults: VecDeque::new(),
            config,
        }
    }

    fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut event_rx: mpsc::UnboundedReceiver<BindingEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
        mut subs: Subscriptions,
    ) {
        info!(role = ?self.role, "Session started");
        self.bootstrap().await;

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown(reply)) => {
                            self.shutdown().await;
                            let _ = reply.send(());
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("Session handles dropped");
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                Some(event) = event_rx.recv() => {
                    self.handle_binding_event(event).await;
                }

                Some(internal) = internal_rx.recv() => {
                    match internal {
                        Internal::Allocated { name, result, origin } => {
                            self.on_allocated(name, result, origin).await;
                        }
                    }
                }

                payload = recv_or_pending(&mut subs.directory) => {
                    if let Some(payload) = payload {
                        self.on_directory_payload(&payload).await;
                    } else {
                        warn!("Directory subscription closed");
                        subs.directory = None;
                    }
                }

                payload = recv_or_pending(&mut subs.moves) => {
                    if let Some(payload) = payload {
                        self.on_move_payload(&payload);
                    } else {
                        warn!("Move subscription closed");
                        subs.moves = None;
                    }
                }

                payload = recv_or_pending(&mut subs.reactions) => {
                    if let Some(payload) = payload {
                        self.on_reaction_payload(&payload);
                    } else {
                        warn!("Reaction subscription closed");
                        subs.reactions = None;
                    }
                }

                _ = sleep_until_or_pending(deadline) => {
                    self.on_timer().await;
                }
            }
        }

        info!(role = ?self.role, "Session stopped");
    }

    async fn bootstrap(&mut self) {
        match self.role {
            Role::Host => {
                if self.initial_target.is_some() {
                    debug!("Hosts ignore a bootstrap room");
                }
                self.pending_defaults = self.config.default_rooms.iter().cloned().collect();
                self.next_default();
            }
            Role::Participant => {
                if let Some(target) = self.initial_target.take() {
                    info!(session = %target, "Joining bootstrap room");
                    self.switch_to(RoomTarget::Session(target), None).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::CreateRoom { name, reply } => self.create_room(name, reply),
            Command::DeleteRoom { id, reply } => {
                let result = self.delete_room(id).await;
                self.respond(reply, result);
            }
            Command::ListRooms(reply) => {
                let _ = reply.send(self.known_rooms());
            }
            Command::CurrentRoom(reply) => {
                let _ = reply.send(self.current_room());
            }
            Command::SwitchToRoom { target, reply } => self.switch_to(target, Some(reply)).await,
            Command::SwitchState(reply) => {
                let _ = reply.send(self.switch.state());
            }
            Command::ActivateRelay {
                source,
                target,
                reply,
            } => self.activate_relay(source, target, reply).await,
            Command::DeactivateRelay(reply) => {
                let _ = reply.send(self.relay.deactivate().await);
            }
            Command::RelayState(reply) => {
                let _ = reply.send(self.relay.state());
            }
            Command::Participants(reply) => {
                let _ = reply.send(self.roster.entries().to_vec());
            }
            Command::RequestMove {
                participant_id,
                room,
                reply,
            } => {
                let result = self.request_move(participant_id, room).await;
                self.respond(reply, result);
            }
            Command::SendReaction { emoji, reply } => {
                let result = self.send_reaction(emoji).await;
                self.respond(reply, result);
            }
            Command::Shutdown(_) => {}
        }
    }

    /// Reply to a caller, reporting failures to the observer as well
    fn respond<T>(&self, reply: oneshot::Sender<Result<T>>, result: Result<T>) {
        if let Err(e) = &result {
            self.notifier.error(e);
        }
        let _ = reply.send(result);
    }

    fn known_rooms(&self) -> Vec<DirectoryEntry> {
        match self.role {
            Role::Host => self.registry.snapshot().rooms,
            Role::Participant => self.directory.rooms().to_vec(),
        }
    }

    fn current_room(&self) -> Option<DirectoryEntry> {
        match self.role {
            Role::Host => self
                .registry
                .current()
                .and_then(|id| self.registry.get(id))
                .map(DirectoryEntry::from),
            Role::Participant => self.switch.current_room().cloned(),
        }
    }

    // Host: room lifecycle

    fn create_room(&mut self, name: String, reply: oneshot::Sender<Result<DirectoryEntry>>) {
        if !self.is_host() {
            return self.respond(reply, Err(Error::NotHost));
        }
        match RoomRegistry::normalize_name(&name) {
            Ok(name) => self.allocate(name, Origin::Caller(reply)),
            Err(e) => self.respond(reply, Err(e)),
        }
    }

    fn next_default(&mut self) {
        if let Some(name) = self.pending_defaults.pop_front() {
            self.allocate(name, Origin::Startup);
        }
    }

    /// Allocation runs off the loop; the result comes back as an internal event
    fn allocate(&self, name: String, origin: Origin) {
        debug!(name = %name, "Allocating external session");
        let backend = self.backend.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = backend.allocate_room().await;
            let _ = tx.send(Internal::Allocated {
                name,
                result,
                origin,
            });
        });
    }

    async fn on_allocated(
        &mut self,
        name: String,
        result: std::result::Result<ExternalSessionId, BackendError>,
        origin: Origin,
    ) {
        let startup = matches!(origin, Origin::Startup);
        let added = match result {
            Ok(session) => self.registry.add(&name, session),
            Err(e) => Err(Error::AllocationFailure(e.to_string())),
        };

        let result = match added {
            Ok(added) => {
                let entry = DirectoryEntry::from(&added.room);
                self.publish_directory().await;
                if added.designated_current {
                    self.switch_to(RoomTarget::Room(entry.id), None).await;
                }
                Ok(entry)
            }
            Err(e) => Err(e),
        };

        match origin {
            Origin::Caller(reply) => self.respond(reply, result),
            Origin::Startup => {
                if let Err(e) = result {
                    warn!(name = %name, error = %e, "Default room not created");
                    self.notifier.error(&e);
                }
            }
        }

        if startup {
            self.next_default();
        }
    }

    async fn delete_room(&mut self, id: RoomId) -> Result<bool> {
        if !self.is_host() {
            return Err(Error::NotHost);
        }
        if self.switch.pending_target().map(|t| t.id) == Some(id) {
            return Err(Error::RoomInUse);
        }

        match self.registry.remove(id)? {
            RoomRemoval::Removed(_) => {
                let known = self.known_rooms();
                self.relay.prune(&known).await;
                self.publish_directory().await;
                Ok(true)
            }
            RoomRemoval::Unknown => {
                debug!(room_id = %id, "Delete of unknown room ignored");
                Ok(false)
            }
        }
    }

    async fn publish_directory(&mut self) {
        let snapshot = self.registry.snapshot();
        self.notifier.directory(&snapshot.rooms);
        if let Err(e) = self.channel.publish(&snapshot).await {
            warn!(error = %e, "Directory publish failed");
            self.notifier.error(&e);
        }
    }

    async fn request_move(&mut self, participant_id: String, room: RoomId) -> Result<()> {
        if !self.is_host() {
            return Err(Error::NotHost);
        }
        if self.registry.get(room).is_none() {
            return Err(Error::RoomNotFound(room.to_string()));
        }
        match self.roster.get(&participant_id) {
            Some(entry) if !entry.is_local => {}
            _ => return Err(Error::ParticipantNotFound(participant_id)),
        }

        let payload = MoveRequest {
            participant_id,
            room,
        }
        .to_payload()?;
        self.pubsub
            .publish(&self.config.move_topic, payload, PublishOptions::default())
            .await?;
        info!(room_id = %room, "Move requested");
        Ok(())
    }

    // Both roles: switching

    fn resolve(&self, target: RoomTarget) -> Result<DirectoryEntry> {
        let known = self.known_rooms();
        match target {
            RoomTarget::Room(id) => known
                .into_iter()
                .find(|e| e.id == id)
                .ok_or_else(|| Error::RoomNotFound(id.to_string())),
            RoomTarget::Session(session) => {
                if let Some(entry) = known.into_iter().find(|e| e.external_session_id == session) {
                    return Ok(entry);
                }
                if self.is_host() {
                    return Err(Error::RoomNotFound(session.to_string()));
                }
                // Joined from a link before the directory arrived; reconciled later
                Ok(DirectoryEntry {
                    id: RoomId::new(),
                    name: session.to_string(),
                    external_session_id: session,
                })
            }
        }
    }

    async fn switch_to(&mut self, target: RoomTarget, reply: Option<SwitchReply>) {
        let entry = match self.resolve(target) {
            Ok(entry) => entry,
            Err(e) => return self.reject_switch(reply, e),
        };

        match self.switch.check(&entry) {
            Err(e) => {
                warn!(target = %entry.name, "Switch rejected, another is in progress");
                self.reject_switch(reply, e);
            }
            Ok(Some(outcome)) => {
                debug!(room = %entry.name, "Already in room");
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(outcome));
                }
            }
            Ok(None) => {
                let touched = {
                    let mut rooms = vec![&entry];
                    rooms.extend(self.switch.current_room());
                    self.relay.involves(&rooms)
                };
                if touched {
                    info!("Deactivating relay before switch");
                    self.relay.deactivate().await;
                }

                let progress = self.switch.start(entry, reply).await;
                self.on_switch_progress(progress);
            }
        }
    }

    fn reject_switch(&self, reply: Option<SwitchReply>, error: Error) {
        self.notifier.error(&error);
        if let Some(reply) = reply {
            let _ = reply.send(Err(error));
        }
    }

    fn on_switch_progress(&mut self, progress: SwitchProgress) {
        match progress {
            SwitchProgress::None => {}
            SwitchProgress::Joined {
                binding,
                room,
                participants,
            } => {
                assert_bindings_distinct(Some(binding), self.relay.binding_id());
                let known = self.known_rooms();
                self.switch.reconcile(&known);
                if self.is_host() && self.registry.get(room.id).is_some() {
                    self.registry.set_current(Some(room.id));
                }
                self.roster
                    .rebind(binding, room.external_session_id, participants);
                self.notifier.roster(self.roster.entries());
            }
            SwitchProgress::Failed | SwitchProgress::Lost => {
                if self.is_host() {
                    self.registry.set_current(None);
                }
                self.roster.clear();
                self.notifier.roster(&[]);
            }
        }
    }

    async fn handle_binding_event(&mut self, event: BindingEvent) {
        let BindingEvent { binding, event } = event;

        let progress = self.switch.on_event(binding, &event).await;
        self.on_switch_progress(progress);

        let known = self.known_rooms();
        self.relay.on_event(binding, &event, &known).await;

        if self.roster.apply(binding, &event) {
            self.notifier.roster(self.roster.entries());
        }
    }

    // Relay

    async fn activate_relay(&mut self, source: RoomId, target: RoomId, reply: RelayReply) {
        let known = self.known_rooms();
        match self.relay.check(source, target, &known) {
            Err(e) => self.respond(reply, Err(e)),
            Ok(RelayCheck::Ready(outcome)) => {
                let _ = reply.send(Ok(outcome));
            }
            Ok(RelayCheck::Pending) => {
                debug!("Relay for this pair still connecting, waiting on it");
                self.relay.attach(reply);
            }
            Ok(RelayCheck::Start(source, target)) => {
                self.relay.start(source, target, Some(reply)).await;
                assert_bindings_distinct(self.switch.primary_binding(), self.relay.binding_id());
            }
        }
    }

    // Participant: directory and move requests

    async fn on_directory_payload(&mut self, payload: &str) {
        match self.directory.apply_payload(payload) {
            Ok(DirectoryUpdate::Replaced) => {
                let rooms = self.directory.rooms().to_vec();
                self.notifier.directory(&rooms);
                self.switch.reconcile(&rooms);
                self.relay.prune(&rooms).await;
            }
            Ok(DirectoryUpdate::Unchanged) => {}
            Err(e) => {
                warn!(error = %e, "Directory payload rejected");
                self.notifier.error(&e);
            }
        }
    }

    fn on_move_payload(&self, payload: &str) {
        let request = match MoveRequest::from_payload(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed move request");
                return;
            }
        };

        let addressed = self
            .roster
            .local()
            .is_some_and(|me| me.participant_id == request.participant_id);
        if !addressed {
            return;
        }

        match self.directory.find(request.room) {
            Some(room) => {
                info!(room = %room.name, "Host asked us to move");
                self.notifier.move_requested(room);
            }
            None => warn!(room_id = %request.room, "Move request names an unknown room"),
        }
    }

    // Both roles: reactions

    async fn send_reaction(&self, emoji: String) -> Result<()> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(Error::EmptyReaction);
        }

        let payload = Reaction {
            sender: self.display_name.clone(),
            emoji: emoji.to_string(),
        }
        .to_payload()?;
        self.pubsub
            .publish(&self.config.reaction_topic, payload, PublishOptions::default())
            .await?;
        debug!(emoji = %emoji, "Reaction sent");
        Ok(())
    }

    fn on_reaction_payload(&self, payload: &str) {
        match Reaction::from_payload(payload) {
            Ok(reaction) => self.notifier.reaction(&reaction),
            Err(e) => warn!(error = %e, "Malformed reaction"),
        }
    }

    // Deadlines

    fn next_deadline(&self) -> Option<Instant> {
        [self.switch.next_deadline(), self.relay.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        let progress = self.switch.on_timer(now).await;
        self.on_switch_progress(progress);
        self.relay.on_timer(now).await;
    }

    async fn shutdown(&mut self) {
        self.relay.deactivate().await;
        self.switch.shutdown().await;
        self.roster.clear();
    }
}

async fn recv_or_pending(rx: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LoopbackBackend;
    use crate::notify::NullObserver;
    use crate::pubsub::LocalPubSub;

    async fn participant() -> Session {
        Session::spawn(
            Arc::new(LoopbackBackend::new()),
            Arc::new(LocalPubSub::new()),
            Arc::new(NullObserver),
            SessionOptions::participant("guest"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_participant_cannot_mutate_registry() {
        let session = participant().await;
        assert!(matches!(session.create_room("Alpha").await, Err(Error::NotHost)));
        assert!(matches!(session.delete_room(RoomId::new()).await, Err(Error::NotHost)));
        assert!(matches!(
            session.request_move("p-1", RoomId::new()).await,
            Err(Error::NotHost)
        ));
    }

    #[tokio::test]
    async fn test_participant_starts_empty() {
        let session = participant().await;
        assert!(session.list_rooms().await.unwrap().is_empty());
        assert_eq!(session.current_room().await.unwrap(), None);
        assert_eq!(session.switch_state().await.unwrap(), SwitchState::Idle);
        assert!(!session.relay_state().await.unwrap().active);
    }

    #[tokio::test]
    async fn test_unknown_room_switch_fails() {
        let session = participant().await;
        let result = session.switch_to_room(RoomTarget::Room(RoomId::new())).await;
        assert!(matches!(result, Err(Error::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let session = participant().await;
        session.shutdown().await.unwrap();
        assert!(matches!(session.list_rooms().await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_blank_reaction_rejected() {
        let session = participant().await;
        assert!(matches!(session.send_reaction("  ").await, Err(Error::EmptyReaction)));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = CoordinatorConfig::default();
        config.join_timeout_ms = 0;
        let result = Session::spawn(
            Arc::new(LoopbackBackend::new()),
            Arc::new(LocalPubSub::new()),
            Arc::new(NullObserver),
            SessionOptions::host("host").with_config(config),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
