//! Console rendering of session callbacks

use roomhop_core::{
    DirectoryEntry, ErrorKind, ParticipantEntry, Reaction, RelayState, SessionObserver,
    SwitchState,
};

/// Prints every callback prefixed with the client's name
pub struct PrintObserver {
    label: String,
}

impl PrintObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    fn say(&self, line: impl AsRef<str>) {
        println!("[{}] {}", self.label, line.as_ref());
    }
}

pub fn room_names(rooms: &[DirectoryEntry]) -> String {
    if rooms.is_empty() {
        return "(none)".to_string();
    }
    rooms
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn participant_labels(participants: &[ParticipantEntry]) -> String {
    participants
        .iter()
        .map(|p| {
            let mut label = p.label().to_string();
            if p.is_local {
                label.push_str(" (you)");
            }
            if p.is_host {
                label.push_str(" (host)");
            }
            label
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl SessionObserver for PrintObserver {
    fn on_state_changed(&self, state: SwitchState) {
        self.say(format!("switch: {:?}", state));
    }

    fn on_error(&self, kind: ErrorKind, detail: &str) {
        self.say(format!("error ({:?}): {}", kind, detail));
    }

    fn on_directory_changed(&self, rooms: &[DirectoryEntry]) {
        self.say(format!("rooms: {}", room_names(rooms)));
    }

    fn on_roster_changed(&self, participants: &[ParticipantEntry]) {
        self.say(format!("here: {}", participant_labels(participants)));
    }

    fn on_relay_changed(&self, state: &RelayState) {
        match (state.active, state.source_room_id, state.target_room_id) {
            (true, Some(source), Some(target)) => self.say(format!("relay: {} -> {}", source, target)),
            _ => self.say("relay: off"),
        }
    }

    fn on_move_requested(&self, room: &DirectoryEntry) {
        self.say(format!("host asks you to move to {}", room.name));
    }

    fn on_reaction(&self, reaction: &Reaction) {
        self.say(format!("{} reacted {}", reaction.sender, reaction.emoji));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_labels() {
        let people = vec![
            ParticipantEntry {
                participant_id: "p-1".into(),
                display_name: "Host".into(),
                is_local: false,
                is_host: true,
            },
            ParticipantEntry {
                participant_id: "p-2".into(),
                display_name: "Guest 1".into(),
                is_local: true,
                is_host: false,
            },
        ];
        assert_eq!(participant_labels(&people), "Host (host), Guest 1 (you)");
        assert_eq!(room_names(&[]), "(none)");
    }
}
