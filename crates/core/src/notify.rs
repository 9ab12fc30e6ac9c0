//! Observer interface for presentation layers
//!
//! The coordinators never render anything. They report state changes and
//! typed errors through [`SessionObserver`]; a UI turns those into toasts,
//! badges or whatever it likes.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, ErrorKind};
use crate::models::{DirectoryEntry, ParticipantEntry, Reaction, RelayState};
use crate::switch::SwitchState;

/// Callbacks invoked from the client event loop. All default to no-ops.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, _state: SwitchState) {}

    fn on_error(&self, _kind: ErrorKind, _detail: &str) {}

    fn on_directory_changed(&self, _rooms: &[DirectoryEntry]) {}

    fn on_roster_changed(&self, _participants: &[ParticipantEntry]) {}

    fn on_relay_changed(&self, _state: &RelayState) {}

    /// The host asked this participant to move; acting on it is up to the caller
    fn on_move_requested(&self, _room: &DirectoryEntry) {}

    fn on_reaction(&self, _reaction: &Reaction) {}
}

/// Observer that ignores everything
pub struct NullObserver;

impl SessionObserver for NullObserver {}

/// Everything an observer can be told, as a value
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    StateChanged(SwitchState),
    Error { kind: ErrorKind, detail: String },
    DirectoryChanged(Vec<DirectoryEntry>),
    RosterChanged(Vec<ParticipantEntry>),
    RelayChanged(RelayState),
    MoveRequested(DirectoryEntry),
    Reaction(Reaction),
}

/// Observer that forwards every callback into a channel
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }
}

impl SessionObserver for ChannelObserver {
    fn on_state_changed(&self, state: SwitchState) {
        self.send(Notice::StateChanged(state));
    }

    fn on_error(&self, kind: ErrorKind, detail: &str) {
        self.send(Notice::Error {
            kind,
            detail: detail.to_string(),
        });
    }

    fn on_directory_changed(&self, rooms: &[DirectoryEntry]) {
        self.send(Notice::DirectoryChanged(rooms.to_vec()));
    }

    fn on_roster_changed(&self, participants: &[ParticipantEntry]) {
        self.send(Notice::RosterChanged(participants.to_vec()));
    }

    fn on_relay_changed(&self, state: &RelayState) {
        self.send(Notice::RelayChanged(*state));
    }

    fn on_move_requested(&self, room: &DirectoryEntry) {
        self.send(Notice::MoveRequested(room.clone()));
    }

    fn on_reaction(&self, reaction: &Reaction) {
        self.send(Notice::Reaction(reaction.clone()));
    }
}

/// Cheap handle the coordinators share for reporting
#[derive(Clone)]
pub struct Notifier {
    observer: Arc<dyn SessionObserver>,
}

impl Notifier {
    pub fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self { observer }
    }

    pub fn state(&self, state: SwitchState) {
        self.observer.on_state_changed(state);
    }

    /// Report a non-fatal error
    pub fn error(&self, error: &Error) {
        tracing::warn!(kind = ?error.kind(), error = %error, "Reported to observer");
        self.observer.on_error(error.kind(), &error.to_string());
    }

    pub fn directory(&self, rooms: &[DirectoryEntry]) {
        self.observer.on_directory_changed(rooms);
    }

    pub fn roster(&self, participants: &[ParticipantEntry]) {
        self.observer.on_roster_changed(participants);
    }

    pub fn relay(&self, state: &RelayState) {
        self.observer.on_relay_changed(state);
    }

    pub fn move_requested(&self, room: &DirectoryEntry) {
        self.observer.on_move_requested(room);
    }

    pub fn reaction(&self, reaction: &Reaction) {
        self.observer.on_reaction(reaction);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Arc::new(NullObserver))
    }
}
