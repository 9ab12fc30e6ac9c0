//! Relay coordinator
//!
//! Owns a secondary binding, joined to the relay target room, used only to
//! ask the media backend to carry a source room's media into the target.
//! Its lifecycle is independent of the primary binding, but a switch that
//! touches either relay room tears the relay down first.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{
    BackendError, BindingEvent, BindingId, JoinRequest, MediaBackend, MediaFlags, SessionEvent,
};
use crate::binding::SessionBinding;
use crate::error::{Error, Result};
use crate::invariants::assert_relay_invariants;
use crate::models::{DirectoryEntry, MediaKind, RelayState, RoomId};
use crate::notify::Notifier;

/// Successful resolution of an activate request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Binding joined and the backend accepted the relay request
    Bridged,
    /// Binding joined but the backend cannot relay
    BindingOnly,
    /// The same pair is already relayed
    AlreadyActive,
}

pub type RelayReply = oneshot::Sender<Result<RelayOutcome>>;

/// What an activate request needs, decided against the current relay
#[derive(Debug)]
pub enum RelayCheck {
    /// Nothing is relayed yet; open a binding for this pair
    Start(DirectoryEntry, DirectoryEntry),
    /// The same pair is already active
    Ready(RelayOutcome),
    /// The same pair is still connecting; wait for it with [`RelayCoordinator::attach`]
    Pending,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Display name of the relay binding
    pub display_name: String,
    pub kinds: Vec<MediaKind>,
    pub timeout: Duration,
}

enum RelayPhase {
    Inactive,
    Connecting {
        source: DirectoryEntry,
        target: DirectoryEntry,
        deadline: Instant,
        replies: Vec<RelayReply>,
    },
    Active {
        source: DirectoryEntry,
        target: DirectoryEntry,
        bridged: bool,
    },
}

pub struct RelayCoordinator {
    backend: Arc<dyn MediaBackend>,
    events: mpsc::UnboundedSender<BindingEvent>,
    notifier: Notifier,
    settings: RelaySettings,
    phase: RelayPhase,
    binding: Option<SessionBinding>,
}

impl RelayCoordinator {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        events: mpsc::UnboundedSender<BindingEvent>,
        notifier: Notifier,
        settings: RelaySettings,
    ) -> Self {
        Self {
            backend,
            events,
            notifier,
            settings,
            phase: RelayPhase::Inactive,
            binding: None,
        }
    }

    pub fn state(&self) -> RelayState {
        match &self.phase {
            RelayPhase::Active { source, target, .. } => RelayState::active(source.id, target.id),
            _ => RelayState::inactive(),
        }
    }

    /// Whether the relay is active and the backend is bridging media
    pub fn is_bridged(&self) -> bool {
        matches!(self.phase, RelayPhase::Active { bridged: true, .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, RelayPhase::Inactive)
    }

    pub fn binding_id(&self) -> Option<BindingId> {
        self.binding.as_ref().map(|b| b.id())
    }

    /// Whether an active or connecting relay references any of these sessions
    pub fn involves(&self, sessions: &[&DirectoryEntry]) -> bool {
        match &self.phase {
            RelayPhase::Inactive => false,
            RelayPhase::Connecting { source, target, .. } | RelayPhase::Active { source, target, .. } => {
                sessions.iter().any(|room| {
                    room.external_session_id == source.external_session_id
                        || room.external_session_id == target.external_session_id
                })
            }
        }
    }

    fn pair(&self) -> Option<(&DirectoryEntry, &DirectoryEntry)> {
        match &self.phase {
            RelayPhase::Inactive => None,
            RelayPhase::Connecting { source, target, .. } | RelayPhase::Active { source, target, .. } => {
                Some((source, target))
            }
        }
    }

    /// Validate an activate request against the known directory
    pub fn check(&self, source: RoomId, target: RoomId, known: &[DirectoryEntry]) -> Result<RelayCheck> {
        let find = |id: RoomId| {
            known
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| Error::RoomNotFound(id.to_string()))
        };
        let source = find(source)?;
        let target = find(target)?;
        if source.id == target.id {
            return Err(Error::SameRoom);
        }

        match &self.phase {
            RelayPhase::Inactive => Ok(RelayCheck::Start(source, target)),
            RelayPhase::Connecting { source: s, target: t, .. } if s.id == source.id && t.id == target.id => {
                Ok(RelayCheck::Pending)
            }
            RelayPhase::Active { source: s, target: t, .. } if s.id == source.id && t.id == target.id => {
                Ok(RelayCheck::Ready(RelayOutcome::AlreadyActive))
            }
            RelayPhase::Connecting { source: s, target: t, .. } | RelayPhase::Active { source: s, target: t, .. } => {
                Err(Error::RelayConflict {
                    source_room: s.name.clone(),
                    target_room: t.name.clone(),
                })
            }
        }
    }

    /// Resolve `reply` together with the relay that is still connecting
    pub fn attach(&mut self, reply: RelayReply) {
        match &mut self.phase {
            RelayPhase::Connecting { replies, .. } => replies.push(reply),
            RelayPhase::Active { bridged, .. } => {
                let outcome = if *bridged {
                    RelayOutcome::Bridged
                } else {
                    RelayOutcome::BindingOnly
                };
                let _ = reply.send(Ok(outcome));
            }
            RelayPhase::Inactive => {
                let _ = reply.send(Err(Error::RelayFailure("relay is not connecting".into())));
            }
        }
    }

    /// Open the relay binding to the target room. The reply resolves once
    /// the binding joins and the relay request has been issued.
    pub async fn start(&mut self, source: DirectoryEntry, target: DirectoryEntry, reply: Option<RelayReply>) {
        debug_assert!(self.is_idle(), "relay started while another is alive");
        info!(source = %source.name, target = %target.name, "Activating relay");

        let request = JoinRequest {
            session_id: target.external_session_id.clone(),
            display_name: self.settings.display_name.clone(),
            media: MediaFlags::off(),
            is_host: false,
        };
        match SessionBinding::join(self.backend.as_ref(), request, &self.events).await {
            Ok(binding) => {
                self.binding = Some(binding);
                self.phase = RelayPhase::Connecting {
                    source,
                    target,
                    deadline: Instant::now() + self.settings.timeout,
                    replies: reply.into_iter().collect(),
                };
            }
            Err(e) => {
                let error = Error::RelayFailure(format!("relay binding failed: {}", e));
                self.notifier.error(&error);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(error));
                }
            }
        }
    }

    /// Feed a binding event. Returns true when the relay state changed.
    pub async fn on_event(&mut self, binding: BindingId, event: &SessionEvent, known: &[DirectoryEntry]) -> bool {
        if self.binding_id() != Some(binding) {
            return false;
        }

        match (&self.phase, event) {
            (RelayPhase::Connecting { .. }, SessionEvent::SessionJoined { .. }) => {
                self.on_joined(known).await;
                true
            }
            (RelayPhase::Connecting { .. }, SessionEvent::Error(detail)) => {
                self.fail(format!("backend error: {}", detail)).await;
                false
            }
            (RelayPhase::Active { .. }, SessionEvent::SessionLeft) => {
                warn!(binding = %binding, "Relay session ended");
                if let Some(mut lost) = self.binding.take() {
                    lost.mark_left();
                }
                self.phase = RelayPhase::Inactive;
                self.notifier.relay(&RelayState::inactive());
                true
            }
            _ => false,
        }
    }

    async fn on_joined(&mut self, known: &[DirectoryEntry]) {
        let RelayPhase::Connecting {
            source,
            target,
            replies,
            ..
        } = mem::replace(&mut self.phase, RelayPhase::Inactive)
        else {
            return;
        };
        let Some(binding) = self.binding.as_mut() else {
            return;
        };
        binding.mark_joined();

        let outcome = match binding
            .request_relay(&source.external_session_id, &self.settings.kinds)
            .await
        {
            Ok(()) => RelayOutcome::Bridged,
            Err(BackendError::Unsupported(_)) => {
                self.notifier.error(&Error::RelayUnsupported);
                RelayOutcome::BindingOnly
            }
            Err(e) => {
                self.phase = RelayPhase::Connecting {
                    source,
                    target,
                    deadline: Instant::now(),
                    replies,
                };
                self.fail(format!("relay request rejected: {}", e)).await;
                return;
            }
        };

        self.phase = RelayPhase::Active {
            source,
            target,
            bridged: outcome == RelayOutcome::Bridged,
        };
        let state = self.state();
        assert_relay_invariants(&state, known);
        info!(outcome = ?outcome, "Relay active");
        self.notifier.relay(&state);
        for reply in replies {
            let _ = reply.send(Ok(outcome));
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.phase {
            RelayPhase::Connecting { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    pub async fn on_timer(&mut self, now: Instant) {
        if let RelayPhase::Connecting { deadline, .. } = &self.phase {
            if *deadline <= now {
                self.fail("relay binding not joined in time".into()).await;
            }
        }
    }

    async fn fail(&mut self, reason: String) {
        let replies = match mem::replace(&mut self.phase, RelayPhase::Inactive) {
            RelayPhase::Connecting { replies, .. } => replies,
            _ => Vec::new(),
        };
        self.drop_binding().await;

        self.notifier.error(&Error::RelayFailure(reason.clone()));
        for reply in replies {
            let _ = reply.send(Err(Error::RelayFailure(reason.clone())));
        }
    }

    /// Tear down the relay binding. Returns false if there was nothing to do.
    pub async fn deactivate(&mut self) -> bool {
        let was_active = match mem::replace(&mut self.phase, RelayPhase::Inactive) {
            RelayPhase::Inactive => {
                debug!("Relay already inactive");
                return false;
            }
            RelayPhase::Connecting { replies, .. } => {
                for reply in replies {
                    let _ = reply.send(Err(Error::RelayFailure("deactivated before joining".into())));
                }
                false
            }
            RelayPhase::Active { .. } => true,
        };

        self.drop_binding().await;
        info!("Relay deactivated");
        if was_active {
            self.notifier.relay(&RelayState::inactive());
        }
        true
    }

    /// Deactivate if a relay room disappeared from the directory
    pub async fn prune(&mut self, known: &[DirectoryEntry]) -> bool {
        let Some((source, target)) = self.pair() else {
            return false;
        };
        let present = |room: &DirectoryEntry| known.iter().any(|e| e.id == room.id);
        if present(source) && present(target) {
            return false;
        }

        warn!(source = %source.name, target = %target.name, "Relay room vanished from directory");
        self.deactivate().await
    }

    async fn drop_binding(&mut self) {
        if let Some(mut binding) = self.binding.take() {
            if let Err(e) = binding.leave().await {
                debug!(error = %e, "Relay leave failed");
            }
            binding.mark_left();
        }
    }
}
