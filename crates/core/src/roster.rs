//! Participant directory - live roster of the room the primary binding targets
//!
//! Purely reactive. It follows exactly one binding at a time; events from
//! any other binding (the relay, or a binding already switched away from)
//! are ignored. On every completed switch it is rebuilt from the new
//! session's membership rather than diffed against the old one.

use tracing::debug;

use crate::backend::{BindingId, SessionEvent};
use crate::models::{ExternalSessionId, ParticipantEntry};

#[derive(Debug, Default)]
pub struct ParticipantDirectory {
    binding: Option<BindingId>,
    session: Option<ExternalSessionId>,
    entries: Vec<ParticipantEntry>,
}

impl ParticipantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow a newly joined binding, seeded with its membership at join time
    pub fn rebind(
        &mut self,
        binding: BindingId,
        session: ExternalSessionId,
        participants: Vec<ParticipantEntry>,
    ) {
        debug!(binding = %binding, session = %session, count = participants.len(), "Roster rebuilt");
        self.binding = Some(binding);
        self.session = Some(session);
        self.entries.clear();
        for entry in participants {
            self.upsert(entry);
        }
    }

    /// Stop following any binding
    pub fn clear(&mut self) {
        self.binding = None;
        self.session = None;
        self.entries.clear();
    }

    /// Apply a membership event. Returns true if the roster changed.
    pub fn apply(&mut self, binding: BindingId, event: &SessionEvent) -> bool {
        if self.binding != Some(binding) {
            return false;
        }

        match event {
            SessionEvent::ParticipantJoined(entry) => {
                self.upsert(entry.clone());
                true
            }
            SessionEvent::ParticipantLeft { participant_id } => {
                let before = self.entries.len();
                self.entries.retain(|e| &e.participant_id != participant_id);
                self.entries.len() != before
            }
            _ => false,
        }
    }

    fn upsert(&mut self, entry: ParticipantEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.participant_id == entry.participant_id)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn entries(&self) -> &[ParticipantEntry] {
        &self.entries
    }

    pub fn session(&self) -> Option<&ExternalSessionId> {
        self.session.as_ref()
    }

    pub fn get(&self, participant_id: &str) -> Option<&ParticipantEntry> {
        self.entries.iter().find(|e| e.participant_id == participant_id)
    }

    /// This client's own entry
    pub fn local(&self) -> Option<&ParticipantEntry> {
        self.entries.iter().find(|e| e.is_local)
    }

    /// Everyone except this client
    pub fn remote(&self) -> impl Iterator<Item = &ParticipantEntry> {
        self.entries.iter().filter(|e| !e.is_local)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, local: bool) -> ParticipantEntry {
        ParticipantEntry {
            participant_id: id.to_string(),
            display_name: id.to_uppercase(),
            is_local: local,
            is_host: false,
        }
    }

    #[test]
    fn test_rebind_replaces_entries() {
        let mut roster = ParticipantDirectory::new();
        let first = BindingId::new();
        roster.rebind(first, "ext-1".into(), vec![entry("a", true), entry("b", false)]);
        assert_eq!(roster.len(), 2);

        let second = BindingId::new();
        roster.rebind(second, "ext-2".into(), vec![entry("a", true)]);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.session().unwrap().as_str(), "ext-2");
        assert!(roster.get("b").is_none());
    }

    #[test]
    fn test_events_from_other_bindings_ignored() {
        let mut roster = ParticipantDirectory::new();
        let primary = BindingId::new();
        roster.rebind(primary, "ext-1".into(), vec![entry("a", true)]);

        let relay = BindingId::new();
        assert!(!roster.apply(relay, &SessionEvent::ParticipantJoined(entry("x", false))));
        assert_eq!(roster.len(), 1);

        assert!(roster.apply(primary, &SessionEvent::ParticipantJoined(entry("c", false))));
        assert_eq!(roster.remote().count(), 1);
    }

    #[test]
    fn test_join_and_leave_events() {
        let mut roster = ParticipantDirectory::new();
        let binding = BindingId::new();
        roster.rebind(binding, "ext-1".into(), vec![entry("a", true)]);

        roster.apply(binding, &SessionEvent::ParticipantJoined(entry("b", false)));
        roster.apply(binding, &SessionEvent::ParticipantJoined(entry("b", false)));
        assert_eq!(roster.len(), 2);

        assert!(roster.apply(
            binding,
            &SessionEvent::ParticipantLeft {
                participant_id: "b".into()
            }
        ));
        assert!(!roster.apply(
            binding,
            &SessionEvent::ParticipantLeft {
                participant_id: "b".into()
            }
        ));
        assert_eq!(roster.local().unwrap().participant_id, "a");
    }

    #[test]
    fn test_clear_detaches() {
        let mut roster = ParticipantDirectory::new();
        let binding = BindingId::new();
        roster.rebind(binding, "ext-1".into(), vec![entry("a", true)]);
        roster.clear();

        assert!(roster.is_empty());
        assert!(!roster.apply(binding, &SessionEvent::ParticipantJoined(entry("b", false))));
    }
}
