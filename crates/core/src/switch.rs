//! Room switch coordinator
//!
//! Explicit state machine sequencing the move of a client's single primary
//! binding from one room to another:
//!
//! ```text
//! Idle --trigger--> Leaving --left (+ settle)--> Joining --joined--> Idle(new room)
//!                      |                            |
//!                      +-------- error/timeout -----+--> Failed
//! ```
//!
//! The phase field is the only source of truth. It is owned by the
//! client's event loop, so a trigger arriving while a switch is in flight
//! is simply rejected instead of racing it. A failed switch leaves the
//! client with no primary binding; the caller decides whether to retry.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BindingEvent, BindingId, JoinRequest, MediaBackend, MediaFlags, SessionEvent};
use crate::binding::SessionBinding;
use crate::error::{Error, Result};
use crate::models::{DirectoryEntry, ParticipantEntry};
use crate::notify::Notifier;

/// Externally observable switch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Leaving,
    Joining,
    Failed,
}

/// Successful resolution of a switch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched(DirectoryEntry),
    /// Target was already the current room; nothing happened
    AlreadyInRoom(DirectoryEntry),
}

pub type SwitchReply = oneshot::Sender<Result<SwitchOutcome>>;

/// What a processed event or timer means for the rest of the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchProgress {
    None,
    /// Switch resolved successfully; dependents repoint to this binding
    Joined {
        binding: BindingId,
        room: DirectoryEntry,
        participants: Vec<ParticipantEntry>,
    },
    Failed,
    /// The primary session ended outside of any switch
    Lost,
}

/// Per-client switch settings
#[derive(Debug, Clone)]
pub struct SwitchSettings {
    pub display_name: String,
    pub is_host: bool,
    pub media: MediaFlags,
    pub settle_delay: Duration,
    pub join_timeout: Duration,
    pub leave_timeout: Duration,
}

enum Phase {
    Idle,
    Leaving {
        target: DirectoryEntry,
        deadline: Instant,
        /// Set once the old binding is `Left` and a settle delay applies
        settle_until: Option<Instant>,
        reply: Option<SwitchReply>,
    },
    Joining {
        target: DirectoryEntry,
        deadline: Instant,
        reply: Option<SwitchReply>,
    },
    Failed,
}

impl Phase {
    fn state(&self) -> SwitchState {
        match self {
            Phase::Idle => SwitchState::Idle,
            Phase::Leaving { .. } => SwitchState::Leaving,
            Phase::Joining { .. } => SwitchState::Joining,
            Phase::Failed => SwitchState::Failed,
        }
    }
}

pub struct RoomSwitchCoordinator {
    backend: Arc<dyn MediaBackend>,
    events: mpsc::UnboundedSender<BindingEvent>,
    notifier: Notifier,
    settings: SwitchSettings,
    phase: Phase,
    primary: Option<SessionBinding>,
    current: Option<DirectoryEntry>,
}

impl RoomSwitchCoordinator {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        events: mpsc::UnboundedSender<BindingEvent>,
        notifier: Notifier,
        settings: SwitchSettings,
    ) -> Self {
        Self {
            backend,
            events,
            notifier,
            settings,
            phase: Phase::Idle,
            primary: None,
            current: None,
        }
    }

    pub fn state(&self) -> SwitchState {
        self.phase.state()
    }

    pub fn in_progress(&self) -> bool {
        matches!(self.phase, Phase::Leaving { .. } | Phase::Joining { .. })
    }

    pub fn current_room(&self) -> Option<&DirectoryEntry> {
        self.current.as_ref()
    }

    /// Target of the switch in flight, if any
    pub fn pending_target(&self) -> Option<&DirectoryEntry> {
        match &self.phase {
            Phase::Leaving { target, .. } | Phase::Joining { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn primary_binding(&self) -> Option<BindingId> {
        self.primary.as_ref().map(|b| b.id())
    }

    /// Adopt the directory's id and name for the current room. A room joined
    /// from a link before any snapshot arrived only knows its external session.
    pub fn reconcile(&mut self, known: &[DirectoryEntry]) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        if let Some(entry) = known
            .iter()
            .find(|e| e.external_session_id == current.external_session_id)
        {
            if entry != current {
                debug!(room = %entry.name, "Current room matched to directory entry");
                *current = entry.clone();
            }
        }
    }

    /// Decide whether a trigger may start. `Ok(Some(_))` resolves it
    /// immediately without any transition.
    pub fn check(&self, target: &DirectoryEntry) -> Result<Option<SwitchOutcome>> {
        if self.in_progress() {
            return Err(Error::SwitchInProgress);
        }
        match &self.current {
            Some(current) if current.external_session_id == target.external_session_id => {
                Ok(Some(SwitchOutcome::AlreadyInRoom(current.clone())))
            }
            _ => Ok(None),
        }
    }

    /// Start a switch that already passed [`check`](Self::check).
    /// The reply resolves when the switch reaches `Idle` or `Failed`.
    pub async fn start(&mut self, target: DirectoryEntry, reply: Option<SwitchReply>) -> SwitchProgress {
        debug_assert!(!self.in_progress(), "switch started while another is in flight");
        info!(
            from = ?self.current.as_ref().map(|c| c.external_session_id.as_str()),
            to = %target.external_session_id,
            "Starting room switch"
        );

        let Some(mut binding) = self.primary.take() else {
            return self.begin_join(target, reply).await;
        };

        self.enter(Phase::Leaving {
            target: target.clone(),
            deadline: Instant::now() + self.settings.leave_timeout,
            settle_until: None,
            reply,
        });

        if self.settings.is_host && binding.supports_retarget() {
            match binding.retarget(&target.external_session_id, &self.events).await {
                Ok(next) => {
                    let reply = self.take_reply();
                    self.primary = Some(next);
                    self.enter(Phase::Joining {
                        target,
                        deadline: Instant::now() + self.settings.join_timeout,
                        reply,
                    });
                    return SwitchProgress::None;
                }
                Err((old, BackendError::Unsupported(_))) => {
                    debug!("Retarget unavailable, falling back to leave/join");
                    binding = old;
                }
                Err((old, e)) => {
                    self.primary = Some(old);
                    return self.fail(format!("retarget failed: {}", e)).await;
                }
            }
        }

        let result = binding.leave().await;
        self.primary = Some(binding);
        if let Err(e) = result {
            return self.fail(format!("leave failed: {}", e)).await;
        }
        SwitchProgress::None
    }

    async fn begin_join(&mut self, target: DirectoryEntry, reply: Option<SwitchReply>) -> SwitchProgress {
        debug_assert!(self.primary.is_none(), "two primary bindings alive");

        let request = JoinRequest {
            session_id: target.external_session_id.clone(),
            display_name: self.settings.display_name.clone(),
            media: self.settings.media,
            is_host: self.settings.is_host,
        };
        let deadline = Instant::now() + self.settings.join_timeout;
        self.enter(Phase::Joining {
            target,
            deadline,
            reply,
        });

        match SessionBinding::join(self.backend.as_ref(), request, &self.events).await {
            Ok(binding) => {
                self.primary = Some(binding);
                SwitchProgress::None
            }
            Err(e) => self.fail(format!("join failed: {}", e)).await,
        }
    }

    /// Feed a binding event. Events for bindings other than the primary are ignored.
    pub async fn on_event(&mut self, binding: BindingId, event: &SessionEvent) -> SwitchProgress {
        if self.primary_binding() != Some(binding) {
            return SwitchProgress::None;
        }

        match (self.state(), event) {
            (SwitchState::Leaving, SessionEvent::SessionLeft) => self.on_left().await,
            (SwitchState::Joining, SessionEvent::SessionJoined { participants }) => {
                self.on_joined(participants.clone())
            }
            (SwitchState::Leaving | SwitchState::Joining, SessionEvent::Error(detail)) => {
                self.fail(format!("backend error: {}", detail)).await
            }
            (SwitchState::Idle, SessionEvent::SessionLeft) => {
                warn!(binding = %binding, "Primary session ended");
                if let Some(mut lost) = self.primary.take() {
                    lost.mark_left();
                }
                self.current = None;
                SwitchProgress::Lost
            }
            (_, SessionEvent::Error(detail)) => {
                self.notifier.error(&Error::Backend(BackendError::Rejected(detail.clone())));
                SwitchProgress::None
            }
            _ => SwitchProgress::None,
        }
    }

    async fn on_left(&mut self) -> SwitchProgress {
        if let Some(mut old) = self.primary.take() {
            old.mark_left();
        }

        let settle = self.settings.settle_delay;
        if settle.is_zero() {
            let (target, reply) = self.take_target();
            return match target {
                Some(target) => self.begin_join(target, reply).await,
                None => SwitchProgress::None,
            };
        }

        if let Phase::Leaving { settle_until, .. } = &mut self.phase {
            *settle_until = Some(Instant::now() + settle);
            debug!(settle_ms = settle.as_millis() as u64, "Settling before join");
        }
        SwitchProgress::None
    }

    fn on_joined(&mut self, participants: Vec<ParticipantEntry>) -> SwitchProgress {
        let Phase::Joining { target, reply, .. } = mem::replace(&mut self.phase, Phase::Idle) else {
            return SwitchProgress::None;
        };
        let Some(binding) = self.primary.as_mut() else {
            return SwitchProgress::None;
        };

        binding.mark_joined();
        let binding = binding.id();
        self.current = Some(target.clone());
        info!(room = %target.name, session = %target.external_session_id, "Room switch complete");
        self.notifier.state(SwitchState::Idle);

        if let Some(reply) = reply {
            let _ = reply.send(Ok(SwitchOutcome::Switched(target.clone())));
        }
        SwitchProgress::Joined {
            binding,
            room: target,
            participants,
        }
    }

    /// Earliest instant at which [`on_timer`](Self::on_timer) has work
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Leaving {
                settle_until: Some(at),
                ..
            } => Some(*at),
            Phase::Leaving { deadline, .. } | Phase::Joining { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    pub async fn on_timer(&mut self, now: Instant) -> SwitchProgress {
        match &self.phase {
            Phase::Leaving {
                settle_until: Some(at),
                ..
            } if *at <= now => {
                let (target, reply) = self.take_target();
                match target {
                    Some(target) => self.begin_join(target, reply).await,
                    None => SwitchProgress::None,
                }
            }
            Phase::Leaving {
                settle_until: None,
                deadline,
                ..
            } if *deadline <= now => self.fail("leave not acknowledged in time".into()).await,
            Phase::Joining { deadline, .. } if *deadline <= now => {
                self.fail("join not acknowledged in time".into()).await
            }
            _ => SwitchProgress::None,
        }
    }

    /// Drop to `Failed` with no primary binding
    async fn fail(&mut self, reason: String) -> SwitchProgress {
        let reply = self.take_reply();
        if let Some(mut binding) = self.primary.take() {
            if let Err(e) = binding.leave().await {
                debug!(error = %e, "Best-effort leave after failure");
            }
        }

        self.current = None;
        self.enter(Phase::Failed);

        let error = Error::SwitchFailure(reason.clone());
        self.notifier.error(&error);
        if let Some(reply) = reply {
            let _ = reply.send(Err(error));
        }
        SwitchProgress::Failed
    }

    /// Leave the primary binding for good (client shutdown)
    pub async fn shutdown(&mut self) {
        if let Some(reply) = self.take_reply() {
            let _ = reply.send(Err(Error::SessionClosed));
        }
        if let Some(mut binding) = self.primary.take() {
            let _ = binding.leave().await;
        }
        self.current = None;
        self.phase = Phase::Idle;
    }

    fn enter(&mut self, phase: Phase) {
        let from = self.state();
        self.phase = phase;
        let to = self.state();
        if from != to {
            info!(from = ?from, to = ?to, "Switch state changed");
            self.notifier.state(to);
        }
    }

    fn take_reply(&mut self) -> Option<SwitchReply> {
        match &mut self.phase {
            Phase::Leaving { reply, .. } | Phase::Joining { reply, .. } => reply.take(),
            _ => None,
        }
    }

    fn take_target(&mut self) -> (Option<DirectoryEntry>, Option<SwitchReply>) {
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Leaving { target, reply, .. } | Phase::Joining { target, reply, .. } => {
                // Stays Leaving until begin_join moves on
                self.phase = Phase::Leaving {
                    target: target.clone(),
                    deadline: Instant::now() + self.settings.join_timeout,
                    settle_until: None,
                    reply: None,
                };
                (Some(target), reply)
            }
            other => {
                self.phase = other;
                (None, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LoopbackBackend, LoopbackOptions};
    use crate::models::RoomId;
    use crate::notify::{ChannelObserver, Notice};

    struct Harness {
        backend: LoopbackBackend,
        coordinator: RoomSwitchCoordinator,
        events: mpsc::UnboundedReceiver<BindingEvent>,
        notices: mpsc::UnboundedReceiver<Notice>,
    }

    fn harness(options: LoopbackOptions, is_host: bool) -> Harness {
        let backend = LoopbackBackend::with_options(options);
        let (tx, events) = mpsc::unbounded_channel();
        let (observer, notices) = ChannelObserver::new();
        let coordinator = RoomSwitchCoordinator::new(
            Arc::new(backend.clone()),
            tx,
            Notifier::new(Arc::new(observer)),
            SwitchSettings {
                display_name: "tester".into(),
                is_host,
                media: MediaFlags::off(),
                settle_delay: Duration::ZERO,
                join_timeout: Duration::from_millis(100),
                leave_timeout: Duration::from_millis(100),
            },
        );
        Harness {
            backend,
            coordinator,
            events,
            notices,
        }
    }

    async fn room(backend: &LoopbackBackend, name: &str) -> DirectoryEntry {
        DirectoryEntry {
            id: RoomId::new(),
            name: name.into(),
            external_session_id: backend.allocate_room().await.unwrap(),
        }
    }

    /// Deliver queued binding events until the coordinator reports progress
    async fn pump(h: &mut Harness) -> SwitchProgress {
        while let Ok(ev) = h.events.try_recv() {
            let progress = h.coordinator.on_event(ev.binding, &ev.event).await;
            if progress != SwitchProgress::None {
                return progress;
            }
        }
        SwitchProgress::None
    }

    fn states(h: &mut Harness) -> Vec<SwitchState> {
        let mut out = Vec::new();
        while let Ok(notice) = h.notices.try_recv() {
            if let Notice::StateChanged(s) = notice {
                out.push(s);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_initial_join_then_switch() {
        let mut h = harness(LoopbackOptions::default(), false);
        let alpha = room(&h.backend, "Alpha").await;
        let beta = room(&h.backend, "Beta").await;

        h.coordinator.start(alpha.clone(), None).await;
        assert!(matches!(pump(&mut h).await, SwitchProgress::Joined { .. }));
        assert_eq!(h.coordinator.current_room(), Some(&alpha));
        states(&mut h);

        let (tx, rx) = oneshot::channel();
        h.coordinator.start(beta.clone(), Some(tx)).await;
        assert_eq!(h.coordinator.state(), SwitchState::Leaving);
        assert!(matches!(pump(&mut h).await, SwitchProgress::Joined { .. }));

        assert_eq!(rx.await.unwrap().unwrap(), SwitchOutcome::Switched(beta.clone()));
        assert_eq!(
            states(&mut h),
            vec![SwitchState::Leaving, SwitchState::Joining, SwitchState::Idle]
        );
        assert!(h.backend.members(&alpha.external_session_id).is_empty());
        assert_eq!(h.backend.members(&beta.external_session_id), vec!["tester"]);
    }

    #[tokio::test]
    async fn test_same_room_is_noop() {
        let mut h = harness(LoopbackOptions::default(), false);
        let alpha = room(&h.backend, "Alpha").await;
        h.coordinator.start(alpha.clone(), None).await;
        pump(&mut h).await;
        states(&mut h);

        let outcome = h.coordinator.check(&alpha).unwrap();
        assert_eq!(outcome, Some(SwitchOutcome::AlreadyInRoom(alpha)));
        assert!(states(&mut h).is_empty());
    }

    #[tokio::test]
    async fn test_trigger_rejected_while_in_flight() {
        let mut h = harness(LoopbackOptions::default(), false);
        let alpha = room(&h.backend, "Alpha").await;
        let beta = room(&h.backend, "Beta").await;
        h.coordinator.start(alpha.clone(), None).await;

        assert!(matches!(h.coordinator.check(&beta), Err(Error::SwitchInProgress)));
        assert_eq!(h.coordinator.pending_target(), Some(&alpha));
    }

    #[tokio::test]
    async fn test_join_timeout_fails_without_binding() {
        let mut h = harness(
            LoopbackOptions {
                withhold_join_ack: true,
                ..Default::default()
            },
            false,
        );
        let alpha = room(&h.backend, "Alpha").await;
        let (tx, rx) = oneshot::channel();
        h.coordinator.start(alpha, Some(tx)).await;

        let deadline = h.coordinator.next_deadline().unwrap();
        let progress = h.coordinator.on_timer(deadline).await;
        assert_eq!(progress, SwitchProgress::Failed);
        assert_eq!(h.coordinator.state(), SwitchState::Failed);
        assert!(h.coordinator.primary_binding().is_none());
        assert!(h.coordinator.current_room().is_none());
        assert!(matches!(rx.await.unwrap(), Err(Error::SwitchFailure(_))));
    }

    #[tokio::test]
    async fn test_failed_state_accepts_new_trigger() {
        let mut h = harness(
            LoopbackOptions {
                withhold_join_ack: true,
                ..Default::default()
            },
            false,
        );
        let alpha = room(&h.backend, "Alpha").await;
        h.coordinator.start(alpha.clone(), None).await;
        let deadline = h.coordinator.next_deadline().unwrap();
        h.coordinator.on_timer(deadline).await;
        states(&mut h);

        h.backend.set_options(LoopbackOptions::default());
        assert!(h.coordinator.check(&alpha).unwrap().is_none());
        h.coordinator.start(alpha.clone(), None).await;
        assert!(matches!(pump(&mut h).await, SwitchProgress::Joined { .. }));
        assert_eq!(states(&mut h), vec![SwitchState::Joining, SwitchState::Idle]);
    }

    #[tokio::test]
    async fn test_settle_delay_holds_leaving() {
        let mut h = harness(LoopbackOptions::default(), false);
        h.coordinator.settings.settle_delay = Duration::from_millis(50);
        let alpha = room(&h.backend, "Alpha").await;
        let beta = room(&h.backend, "Beta").await;
        h.coordinator.start(alpha, None).await;
        pump(&mut h).await;

        h.coordinator.start(beta.clone(), None).await;
        pump(&mut h).await;
        assert_eq!(h.coordinator.state(), SwitchState::Leaving);
        assert!(h.coordinator.primary_binding().is_none());

        let at = h.coordinator.next_deadline().unwrap();
        h.coordinator.on_timer(at).await;
        assert_eq!(h.coordinator.state(), SwitchState::Joining);
        assert!(matches!(pump(&mut h).await, SwitchProgress::Joined { .. }));
        assert_eq!(h.coordinator.current_room(), Some(&beta));
    }

    #[tokio::test]
    async fn test_host_uses_retarget() {
        let mut h = harness(
            LoopbackOptions {
                supports_retarget: true,
                ..Default::default()
            },
            true,
        );
        let alpha = room(&h.backend, "Alpha").await;
        let beta = room(&h.backend, "Beta").await;
        h.coordinator.start(alpha, None).await;
        pump(&mut h).await;
        let first = h.coordinator.primary_binding().unwrap();
        states(&mut h);

        h.coordinator.start(beta.clone(), None).await;
        assert_eq!(h.coordinator.state(), SwitchState::Joining);
        assert!(matches!(pump(&mut h).await, SwitchProgress::Joined { .. }));

        assert_ne!(h.coordinator.primary_binding().unwrap(), first);
        assert_eq!(
            states(&mut h),
            vec![SwitchState::Leaving, SwitchState::Joining, SwitchState::Idle]
        );
        assert_eq!(h.backend.members(&beta.external_session_id), vec!["tester"]);
    }

    #[tokio::test]
    async fn test_stale_binding_events_ignored() {
        let mut h = harness(LoopbackOptions::default(), false);
        let alpha = room(&h.backend, "Alpha").await;
        h.coordinator.start(alpha, None).await;
        pump(&mut h).await;

        let progress = h
            .coordinator
            .on_event(BindingId::new(), &SessionEvent::SessionLeft)
            .await;
        assert_eq!(progress, SwitchProgress::None);
        assert!(h.coordinator.current_room().is_some());
    }
}
