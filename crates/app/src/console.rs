//! Console command parsing

use std::str::FromStr;

pub const HELP: &str = "\
commands:
  rooms                     list rooms as the focused client sees them
  create <name>             create a room (host)
  delete <room>             delete a room (host)
  switch <room>             move the focused client to a room
  relay <source> <target>   bridge source room media into target room
  unrelay                   stop the relay
  who                       participants in the focused client's room
  move <guest> <room>       ask a participant to move (host)
  link                      room link for the focused client's room
  react <emoji>             send an emoji reaction to everyone
  state                     switch and relay state
  use <host|N|name>         focus another client
  help                      this text
  quit                      leave every room and exit
rooms are given by list number or name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Rooms,
    State,
    Who,
    Link,
    Unrelay,
    Use(String),
    Create(String),
    Delete(String),
    Switch(String),
    React(String),
    Relay { source: String, target: String },
    Move { guest: String, room: String },
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let arg = |what: &str| {
            if rest.is_empty() {
                Err(format!("usage: {} {}", word, what))
            } else {
                Ok(rest.to_string())
            }
        };

        match word.to_ascii_lowercase().as_str() {
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "rooms" | "ls" => Ok(Command::Rooms),
            "state" => Ok(Command::State),
            "who" => Ok(Command::Who),
            "link" => Ok(Command::Link),
            "unrelay" => Ok(Command::Unrelay),
            "use" => arg("<host|N|name>").map(Command::Use),
            "create" => arg("<name>").map(Command::Create),
            "delete" | "rm" => arg("<room>").map(Command::Delete),
            "switch" | "go" => arg("<room>").map(Command::Switch),
            "react" => arg("<emoji>").map(Command::React),
            "relay" => match rest.split_whitespace().collect::<Vec<_>>()[..] {
                [source, target] => Ok(Command::Relay {
                    source: source.to_string(),
                    target: target.to_string(),
                }),
                _ => Err("usage: relay <source> <target>".to_string()),
            },
            "move" => match rest.split_once(char::is_whitespace) {
                Some((guest, room)) if !room.trim().is_empty() => Ok(Command::Move {
                    guest: guest.to_string(),
                    room: room.trim().to_string(),
                }),
                _ => Err("usage: move <guest> <room>".to_string()),
            },
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{}', try help", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!("rooms".parse::<Command>(), Ok(Command::Rooms));
        assert_eq!("  WHO ".parse::<Command>(), Ok(Command::Who));
        assert_eq!("exit".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn test_names_keep_spaces() {
        assert_eq!(
            "create Room C".parse::<Command>(),
            Ok(Command::Create("Room C".to_string()))
        );
        assert_eq!(
            "move guest1 Room B".parse::<Command>(),
            Ok(Command::Move {
                guest: "guest1".to_string(),
                room: "Room B".to_string(),
            })
        );
    }

    #[test]
    fn test_react() {
        assert_eq!(
            "react 👏".parse::<Command>(),
            Ok(Command::React("👏".to_string()))
        );
    }

    #[test]
    fn test_relay_takes_two_rooms() {
        assert_eq!(
            "relay 1 2".parse::<Command>(),
            Ok(Command::Relay {
                source: "1".to_string(),
                target: "2".to_string(),
            })
        );
        assert!("relay 1".parse::<Command>().is_err());
        assert!("relay 1 2 3".parse::<Command>().is_err());
    }

    #[test]
    fn test_missing_arguments() {
        assert_eq!(
            "switch".parse::<Command>(),
            Err("usage: switch <room>".to_string())
        );
        assert!("move guest1".parse::<Command>().is_err());
        assert!("react".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }
}
