//! Session binding - one client's live association with one external session

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::backend::{
    BackendError, BindingEvent, BindingId, EventSink, JoinRequest, MediaBackend, MediaSession,
};
use crate::models::{ExternalSessionId, MediaKind};

/// Membership lifecycle of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Joining,
    Joined,
    Leaving,
    Left,
}

pub struct SessionBinding {
    id: BindingId,
    display_name: String,
    membership: Membership,
    session: Box<dyn MediaSession>,
}

impl fmt::Debug for SessionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBinding")
            .field("id", &self.id)
            .field("session", self.session.session_id())
            .field("display_name", &self.display_name)
            .field("membership", &self.membership)
            .finish()
    }
}

impl SessionBinding {
    /// Open a binding and start joining. The binding is `Joining` until the
    /// backend acknowledges with `SessionJoined`.
    pub async fn join(
        backend: &dyn MediaBackend,
        request: JoinRequest,
        events: &mpsc::UnboundedSender<BindingEvent>,
    ) -> Result<Self, BackendError> {
        let id = BindingId::new();
        let display_name = request.display_name.clone();
        let mut session = backend.open(request, EventSink::new(id, events.clone()))?;
        session.join().await?;

        debug!(binding = %id, session = %session.session_id(), "Binding joining");
        Ok(Self {
            id,
            display_name,
            membership: Membership::Joining,
            session,
        })
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn session_id(&self) -> &ExternalSessionId {
        self.session.session_id()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    pub fn supports_retarget(&self) -> bool {
        self.session.supports_retarget()
    }

    pub fn mark_joined(&mut self) {
        debug!(binding = %self.id, "Binding joined");
        self.membership = Membership::Joined;
    }

    pub fn mark_left(&mut self) {
        debug!(binding = %self.id, "Binding left");
        self.membership = Membership::Left;
    }

    /// Start leaving; `Left` is reached on the backend's acknowledgment
    pub async fn leave(&mut self) -> Result<(), BackendError> {
        if self.membership == Membership::Left {
            return Ok(());
        }
        self.membership = Membership::Leaving;
        self.session.leave().await
    }

    /// Move the underlying session to another external session in place.
    ///
    /// This binding reaches `Left` and a new binding over the same media
    /// session is returned in `Joining`.
    pub async fn retarget(
        mut self,
        target: &ExternalSessionId,
        events: &mpsc::UnboundedSender<BindingEvent>,
    ) -> Result<SessionBinding, (SessionBinding, BackendError)> {
        let next = BindingId::new();
        let previous = self.membership;
        self.membership = Membership::Leaving;
        if let Err(e) = self
            .session
            .retarget(target, EventSink::new(next, events.clone()))
            .await
        {
            self.membership = previous;
            return Err((self, e));
        }
        self.mark_left();

        debug!(from = %self.id, to = %next, session = %target, "Binding retargeted");
        Ok(SessionBinding {
            id: next,
            display_name: self.display_name,
            membership: Membership::Joining,
            session: self.session,
        })
    }

    pub async fn request_relay(
        &mut self,
        source: &ExternalSessionId,
        kinds: &[MediaKind],
    ) -> Result<(), BackendError> {
        self.session.request_relay(source, kinds).await
    }
}
