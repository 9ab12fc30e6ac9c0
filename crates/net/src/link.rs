//! Room link generation and parsing
//!
//! Link format: <base>?room=<external-session-id>
//! When the base already carries a query the room is appended with `&`.
//! The room value is percent-encoded on the way out and decoded on the way in.

use std::fmt;
use std::str::FromStr;

use roomhop_core::{DirectoryEntry, ExternalSessionId};
use url::form_urlencoded;

use crate::error::{Error, Result};

const ROOM_PARAM: &str = "room";

/// Shareable link that drops a participant straight into one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLink {
    pub base: String,
    pub room: ExternalSessionId,
}

impl RoomLink {
    pub fn new(base: impl Into<String>, room: ExternalSessionId) -> Self {
        Self {
            base: base.into(),
            room,
        }
    }

    /// Link for a directory entry
    pub fn for_room(base: impl Into<String>, entry: &DirectoryEntry) -> Self {
        Self::new(base, entry.external_session_id.clone())
    }

    /// Format as URL string
    pub fn to_url(&self) -> String {
        let sep = if self.base.contains('?') { '&' } else { '?' };
        let room: String = form_urlencoded::byte_serialize(self.room.as_str().as_bytes()).collect();
        format!("{}{}{}={}", self.base, sep, ROOM_PARAM, room)
    }

    /// Parse from URL string
    pub fn parse(s: &str) -> Result<Self> {
        let (path, query) = s
            .split_once('?')
            .ok_or_else(|| Error::InvalidLink(format!("no query in '{}'", s)))?;
        if path.is_empty() {
            return Err(Error::InvalidLink(format!("no base in '{}'", s)));
        }

        let mut room = None;
        let mut rest = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match decode_room(pair) {
                Some(value) => room = Some(value),
                None => rest.push(pair),
            }
        }

        let room = room
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| Error::InvalidLink(format!("no room in '{}'", s)))?;

        let base = if rest.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, rest.join("&"))
        };

        Ok(Self::new(base, ExternalSessionId::new(room)))
    }

    /// Room from what a participant pasted: a full link or a bare session id.
    ///
    /// Input mentioning `room=` is read as a link and its room value used when
    /// present. Anything else is taken as the session id itself.
    pub fn room_from_input(input: &str) -> Result<ExternalSessionId> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidLink("empty room".into()));
        }

        let from_query = match input.split_once('?') {
            Some((_, query)) if input.contains("room=") => query
                .split('&')
                .find_map(decode_room)
                .filter(|room| !room.trim().is_empty()),
            _ => None,
        };

        Ok(match from_query {
            Some(room) => ExternalSessionId::new(room),
            None => ExternalSessionId::new(input),
        })
    }
}

/// Decoded value of a `room=` query pair
fn decode_room(pair: &str) -> Option<String> {
    form_urlencoded::parse(pair.as_bytes())
        .next()
        .filter(|(key, _)| key == ROOM_PARAM)
        .map(|(_, value)| value.into_owned())
}

impl fmt::Display for RoomLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

impl FromStr for RoomLink {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomhop_core::RoomId;

    #[test]
    fn test_link_for_room() {
        let entry = DirectoryEntry {
            id: RoomId::new(),
            name: "Alpha".into(),
            external_session_id: ExternalSessionId::new("ext-1"),
        };
        let link = RoomLink::for_room("https://meet.example/join", &entry);
        assert_eq!(link.to_url(), "https://meet.example/join?room=ext-1");
        assert_eq!(RoomLink::parse(&link.to_url()).unwrap(), link);
    }

    #[test]
    fn test_link_keeps_existing_query() {
        let link = RoomLink::new("https://meet.example/join?lang=en", "ext-2".into());
        let url = link.to_url();
        assert_eq!(url, "https://meet.example/join?lang=en&room=ext-2");

        let parsed: RoomLink = url.parse().unwrap();
        assert_eq!(parsed.base, "https://meet.example/join?lang=en");
        assert_eq!(parsed.room.as_str(), "ext-2");
    }

    #[test]
    fn test_link_parse_invalid() {
        assert!(matches!(
            RoomLink::parse("https://meet.example/join"),
            Err(Error::InvalidLink(_))
        ));
        assert!(RoomLink::parse("https://meet.example/join?room=").is_err());
        assert!(RoomLink::parse("https://meet.example/join?lang=en").is_err());
        assert!(RoomLink::parse("?room=ext-1").is_err());
    }

    #[test]
    fn test_link_room_is_percent_encoded() {
        let link = RoomLink::new("https://meet.example/join", "room a&b".into());
        let url = link.to_url();
        assert_eq!(url, "https://meet.example/join?room=room+a%26b");
        assert_eq!(RoomLink::parse(&url).unwrap().room.as_str(), "room a&b");

        let parsed = RoomLink::parse("https://meet.example/join?room=ext%2D7").unwrap();
        assert_eq!(parsed.room.as_str(), "ext-7");
    }

    #[test]
    fn test_room_from_input() {
        let link = "https://meet.example/join?lang=en&room=ext%2D3";
        assert_eq!(RoomLink::room_from_input(link).unwrap().as_str(), "ext-3");

        assert_eq!(RoomLink::room_from_input("  ext-2 ").unwrap().as_str(), "ext-2");
        assert_eq!(RoomLink::room_from_input("?room=ext-4").unwrap().as_str(), "ext-4");
        // A link with no room value falls back to the raw input
        assert_eq!(RoomLink::room_from_input("room=").unwrap().as_str(), "room=");

        assert!(matches!(
            RoomLink::room_from_input("   "),
            Err(Error::InvalidLink(_))
        ));
    }
}
