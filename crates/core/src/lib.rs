//! Roomhop Core Library
//!
//! Room registry, directory broadcast, room switching, relay and roster
//! coordination for multi-room meetings.

pub mod backend;
pub mod binding;
pub mod config;
pub mod directory;
pub mod error;
pub mod invariants;
pub mod models;
pub mod notify;
pub mod pubsub;
pub mod registry;
pub mod relay;
pub mod roster;
pub mod session;
pub mod switch;

pub use backend::{
    BackendError, BindingEvent, BindingId, EventSink, JoinRequest, LoopbackBackend,
    LoopbackOptions, MediaBackend, MediaFlags, MediaSession, SessionEvent,
};
pub use binding::{Membership, SessionBinding};
pub use config::CoordinatorConfig;
pub use directory::{DirectoryChannel, DirectoryUpdate, LocalDirectory};
pub use error::{Error, ErrorKind, Result};
pub use models::*;
pub use notify::{ChannelObserver, Notice, NullObserver, SessionObserver};
pub use pubsub::{LocalPubSub, PubSub, PublishOptions};
pub use registry::{RoomAdded, RoomRegistry, RoomRemoval};
pub use relay::{RelayCheck, RelayCoordinator, RelayOutcome};
pub use roster::ParticipantDirectory;
pub use session::{Role, RoomTarget, Session, SessionOptions};
pub use switch::{RoomSwitchCoordinator, SwitchOutcome, SwitchState};
