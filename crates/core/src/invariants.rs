//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use std::collections::HashSet;

use crate::backend::BindingId;
use crate::models::{DirectoryEntry, RelayState, Room, RoomId};

/// Validate that the registry is internally consistent
pub fn assert_registry_invariants(rooms: &[Room], current: Option<RoomId>) {
    // Room ids must be unique
    let ids: HashSet<_> = rooms.iter().map(|r| r.id).collect();
    debug_assert!(
        ids.len() == rooms.len(),
        "Registry holds duplicate room ids"
    );

    // An external session belongs to at most one room
    let sessions: HashSet<_> = rooms.iter().map(|r| &r.external_session_id).collect();
    debug_assert!(
        sessions.len() == rooms.len(),
        "Registry binds one external session to several rooms"
    );

    // Names must not be empty
    debug_assert!(
        rooms.iter().all(|r| !r.name.trim().is_empty()),
        "Registry holds a room with an empty name"
    );

    // The current room must be registered
    if let Some(current) = current {
        debug_assert!(
            ids.contains(&current),
            "Current room {} is not in the registry",
            current
        );
    }
}

/// Validate that the relay binding is not the primary binding
pub fn assert_bindings_distinct(primary: Option<BindingId>, relay: Option<BindingId>) {
    if let (Some(primary), Some(relay)) = (primary, relay) {
        debug_assert!(
            primary != relay,
            "Relay reuses the primary binding {}",
            primary
        );
    }
}

/// Validate that an active relay names two distinct, known rooms
pub fn assert_relay_invariants(state: &RelayState, known: &[DirectoryEntry]) {
    if !state.active {
        return;
    }

    debug_assert!(
        state.source_room_id.is_some() && state.target_room_id.is_some(),
        "Active relay without both rooms: {:?}",
        state
    );
    debug_assert!(
        state.source_room_id != state.target_room_id,
        "Relay source equals target: {:?}",
        state
    );
    for room in [state.source_room_id, state.target_room_id].into_iter().flatten() {
        debug_assert!(
            known.iter().any(|e| e.id == room),
            "Relay references unknown room {}",
            room
        );
    }
}
