//! In-memory media backend
//!
//! Simulates the hosted media service inside one process: every client
//! sharing a `LoopbackBackend` sees the same sessions and membership.
//! Capabilities and faults are switchable at runtime for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    BackendError, EventSink, JoinRequest, MediaBackend, MediaSession, SessionEvent,
};
use crate::models::{ExternalSessionId, MediaKind, ParticipantEntry};

/// Capability and fault switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackOptions {
    pub supports_retarget: bool,
    pub supports_relay: bool,
    /// Every allocation fails
    pub fail_allocation: bool,
    /// Joins are accepted but never acknowledged
    pub withhold_join_ack: bool,
    /// Leaves are accepted but never acknowledged
    pub withhold_leave_ack: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            supports_retarget: false,
            supports_relay: true,
            fail_allocation: false,
            withhold_join_ack: false,
            withhold_leave_ack: false,
        }
    }
}

/// A relay request recorded by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub source: ExternalSessionId,
    pub target: ExternalSessionId,
    pub kinds: Vec<MediaKind>,
}

struct Member {
    participant_id: String,
    display_name: String,
    is_host: bool,
    sink: EventSink,
}

impl Member {
    fn entry_for(&self, viewer: &str) -> ParticipantEntry {
        ParticipantEntry {
            participant_id: self.participant_id.clone(),
            display_name: self.display_name.clone(),
            is_local: self.participant_id == viewer,
            is_host: self.is_host,
        }
    }
}

#[derive(Default)]
struct LoopbackState {
    options: LoopbackOptions,
    next_room: u64,
    next_participant: u64,
    allocated: HashSet<ExternalSessionId>,
    members: HashMap<ExternalSessionId, Vec<Member>>,
    relay_requests: Vec<RelayRequest>,
}

impl LoopbackState {
    fn add_member(&mut self, session: &ExternalSessionId, member: Member) {
        let participants: Vec<ParticipantEntry> = {
            let list = self.members.entry(session.clone()).or_default();
            list.retain(|m| m.participant_id != member.participant_id);
            for other in list.iter() {
                other
                    .sink
                    .emit(SessionEvent::ParticipantJoined(member.entry_for(&other.participant_id)));
            }
            list.push(member);
            let viewer = list[list.len() - 1].participant_id.clone();
            list.iter().map(|m| m.entry_for(&viewer)).collect()
        };

        if let Some(joined) = self.members.get(session).and_then(|l| l.last()) {
            joined.sink.emit(SessionEvent::SessionJoined { participants });
        }
    }

    fn remove_member(&mut self, session: &ExternalSessionId, participant_id: &str) {
        if let Some(list) = self.members.get_mut(session) {
            let before = list.len();
            list.retain(|m| m.participant_id != participant_id);
            if list.len() != before {
                for other in list.iter() {
                    other.sink.emit(SessionEvent::ParticipantLeft {
                        participant_id: participant_id.to_string(),
                    });
                }
            }
        }
    }
}

/// Shared in-memory media backend
#[derive(Clone, Default)]
pub struct LoopbackBackend {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: LoopbackOptions) -> Self {
        let backend = Self::new();
        backend.set_options(options);
        backend
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn options(&self) -> LoopbackOptions {
        self.lock().options
    }

    pub fn set_options(&self, options: LoopbackOptions) {
        self.lock().options = options;
    }

    /// Display names currently joined to a session, in join order
    pub fn members(&self, session: &ExternalSessionId) -> Vec<String> {
        self.lock()
            .members
            .get(session)
            .map(|l| l.iter().map(|m| m.display_name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn relay_requests(&self) -> Vec<RelayRequest> {
        self.lock().relay_requests.clone()
    }
}

#[async_trait]
impl MediaBackend for LoopbackBackend {
    async fn allocate_room(&self) -> Result<ExternalSessionId, BackendError> {
        let mut state = self.lock();
        if state.options.fail_allocation {
            warn!("Loopback allocation refused");
            return Err(BackendError::Unavailable("allocation disabled".into()));
        }

        state.next_room += 1;
        let id = ExternalSessionId::new(format!("ext-{}", state.next_room));
        state.allocated.insert(id.clone());
        info!(session = %id, "Loopback session allocated");
        Ok(id)
    }

    fn open(
        &self,
        request: JoinRequest,
        sink: EventSink,
    ) -> Result<Box<dyn MediaSession>, BackendError> {
        let mut state = self.lock();
        state.next_participant += 1;
        let participant_id = format!("p-{}", state.next_participant);

        Ok(Box::new(LoopbackSession {
            backend: self.clone(),
            participant_id,
            request,
            sink,
            joined: false,
        }))
    }
}

struct LoopbackSession {
    backend: LoopbackBackend,
    participant_id: String,
    request: JoinRequest,
    sink: EventSink,
    joined: bool,
}

impl LoopbackSession {
    fn member(&self) -> Member {
        Member {
            participant_id: self.participant_id.clone(),
            display_name: self.request.display_name.clone(),
            is_host: self.request.is_host,
            sink: self.sink.clone(),
        }
    }
}

#[async_trait]
impl MediaSession for LoopbackSession {
    fn session_id(&self) -> &ExternalSessionId {
        &self.request.session_id
    }

    async fn join(&mut self) -> Result<(), BackendError> {
        let mut state = self.backend.lock();
        if !state.allocated.contains(&self.request.session_id) {
            return Err(BackendError::UnknownSession(self.request.session_id.to_string()));
        }
        if state.options.withhold_join_ack {
            debug!(session = %self.request.session_id, "Loopback join ack withheld");
            return Ok(());
        }

        let session = self.request.session_id.clone();
        state.add_member(&session, self.member());
        self.joined = true;
        Ok(())
    }

    async fn leave(&mut self) -> Result<(), BackendError> {
        let mut state = self.backend.lock();
        let session = self.request.session_id.clone();
        state.remove_member(&session, &self.participant_id);
        self.joined = false;

        if !state.options.withhold_leave_ack {
            self.sink.emit(SessionEvent::SessionLeft);
        }
        Ok(())
    }

    fn supports_retarget(&self) -> bool {
        self.backend.options().supports_retarget
    }

    async fn retarget(
        &mut self,
        target: &ExternalSessionId,
        sink: EventSink,
    ) -> Result<(), BackendError> {
        let mut state = self.backend.lock();
        if !state.options.supports_retarget {
            return Err(BackendError::Unsupported("retarget"));
        }
        if !state.allocated.contains(target) {
            return Err(BackendError::UnknownSession(target.to_string()));
        }

        let old = self.request.session_id.clone();
        state.remove_member(&old, &self.participant_id);
        self.request.session_id = target.clone();
        self.sink = sink;

        if state.options.withhold_join_ack {
            self.joined = false;
            return Ok(());
        }
        state.add_member(target, self.member());
        self.joined = true;
        Ok(())
    }

    async fn request_relay(
        &mut self,
        source: &ExternalSessionId,
        kinds: &[MediaKind],
    ) -> Result<(), BackendError> {
        let mut state = self.backend.lock();
        if !state.options.supports_relay {
            return Err(BackendError::Unsupported("relay"));
        }
        if !self.joined {
            return Err(BackendError::Rejected("relay requested before join".into()));
        }

        state.relay_requests.push(RelayRequest {
            source: source.clone(),
            target: self.request.session_id.clone(),
            kinds: kinds.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BindingEvent, BindingId, MediaFlags};
    use tokio::sync::mpsc;

    fn request(session: &ExternalSessionId, name: &str) -> JoinRequest {
        JoinRequest {
            session_id: session.clone(),
            display_name: name.to_string(),
            media: MediaFlags::off(),
            is_host: false,
        }
    }

    #[tokio::test]
    async fn test_allocation_is_sequential() {
        let backend = LoopbackBackend::new();
        assert_eq!(backend.allocate_room().await.unwrap().as_str(), "ext-1");
        assert_eq!(backend.allocate_room().await.unwrap().as_str(), "ext-2");
    }

    #[tokio::test]
    async fn test_join_reports_membership() {
        let backend = LoopbackBackend::new();
        let ext = backend.allocate_room().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<BindingEvent>();

        let first = BindingId::new();
        let mut alice = backend
            .open(request(&ext, "alice"), EventSink::new(first, tx.clone()))
            .unwrap();
        alice.join().await.unwrap();

        let second = BindingId::new();
        let mut bob = backend
            .open(request(&ext, "bob"), EventSink::new(second, tx))
            .unwrap();
        bob.join().await.unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.binding, first);
        assert!(matches!(ev.event, SessionEvent::SessionJoined { ref participants } if participants.len() == 1));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.binding, first);
        assert!(matches!(ev.event, SessionEvent::ParticipantJoined(ref p) if p.display_name == "bob" && !p.is_local));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.binding, second);
        match ev.event {
            SessionEvent::SessionJoined { participants } => {
                assert_eq!(participants.len(), 2);
                assert!(participants.iter().any(|p| p.display_name == "bob" && p.is_local));
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(backend.members(&ext), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_join_unknown_session_fails() {
        let backend = LoopbackBackend::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = backend
            .open(request(&"nope".into(), "alice"), EventSink::new(BindingId::new(), tx))
            .unwrap();
        assert!(matches!(
            session.join().await,
            Err(BackendError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_unsupported() {
        let backend = LoopbackBackend::with_options(LoopbackOptions {
            supports_relay: false,
            ..Default::default()
        });
        let ext = backend.allocate_room().await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = backend
            .open(request(&ext, "relay"), EventSink::new(BindingId::new(), tx))
            .unwrap();
        session.join().await.unwrap();

        let result = session.request_relay(&"ext-9".into(), &[MediaKind::Video]).await;
        assert_eq!(result, Err(BackendError::Unsupported("relay")));
        assert!(backend.relay_requests().is_empty());
    }
}
