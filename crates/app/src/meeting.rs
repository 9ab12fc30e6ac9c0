//! One host and a set of simulated participants driven from the console

use std::sync::Arc;
use std::time::Duration;

use roomhop_core::{
    CoordinatorConfig, DirectoryEntry, ExternalSessionId, LoopbackBackend, LoopbackOptions,
    RelayOutcome, RoomTarget, Session, SessionObserver, SessionOptions, SwitchOutcome,
};
use roomhop_net::RoomLink;
use tracing::{info, warn};

use crate::cli::Args;
use crate::console::{Command, HELP};
use crate::error::{Error, Result};
use crate::network::Transport;
use crate::observer::{participant_labels, PrintObserver};

/// How long startup waits for the first room to be joined
const STARTUP_WAIT: Duration = Duration::from_secs(5);

pub struct Member {
    pub name: String,
    pub session: Session,
}

/// What a command asks the console loop to do next
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue(String),
    Quit,
}

pub struct Meeting {
    members: Vec<Member>,
    focus: usize,
    link_base: String,
    transport: Transport,
}

impl Meeting {
    /// Start the host, wait for its first room, then start the guests from a room link
    pub async fn start(args: &Args, config: CoordinatorConfig) -> Result<Self> {
        Self::start_with(args, config, |name| Arc::new(PrintObserver::new(name))).await
    }

    pub async fn start_with(
        args: &Args,
        config: CoordinatorConfig,
        observer: impl Fn(&str) -> Arc<dyn SessionObserver>,
    ) -> Result<Self> {
        let mut transport = if args.tcp {
            Transport::tcp(args.port).await?
        } else {
            Transport::local()
        };
        info!(transport = %transport.describe(), guests = args.guests, "Starting meeting");

        let backend = Arc::new(LoopbackBackend::with_options(LoopbackOptions {
            supports_retarget: true,
            ..Default::default()
        }));

        let pubsub = transport.connect(&args.name).await?;
        let host = Session::spawn(
            backend.clone(),
            pubsub,
            observer(&args.name),
            SessionOptions::host(args.name.clone()).with_config(config.clone()),
        )
        .await?;

        let first = wait_for_defaults(&host, config.default_rooms.len()).await;
        let initial = match &args.link {
            Some(link) => Some(RoomLink::room_from_input(link)?),
            None => first.map(|r| r.external_session_id),
        };

        let mut members = vec![Member {
            name: args.name.clone(),
            session: host,
        }];

        for n in 1..=args.guests {
            let name = format!("Guest {}", n);
            let pubsub = transport.connect(&name).await?;
            let mut options = SessionOptions::participant(name.clone()).with_config(config.clone());
            if let Some(target) = &initial {
                options = options.with_initial_target(target.clone());
            }
            let session = Session::spawn(backend.clone(), pubsub, observer(&name), options).await?;
            members.push(Member { name, session });
        }

        if let Some(target) = &initial {
            for member in &members[1..] {
                if !reached(&member.session, target).await {
                    warn!(name = %member.name, "Participant did not reach its first room");
                }
            }
        }

        Ok(Self {
            members,
            focus: 0,
            link_base: args.link_base.clone(),
            transport,
        })
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn focused(&self) -> &Member {
        &self.members[self.focus]
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Parse and run one console line
    pub async fn handle_line(&mut self, line: &str) -> Flow {
        match line.parse::<Command>() {
            Ok(Command::Quit) => Flow::Quit,
            Ok(command) => match self.execute(command).await {
                Ok(out) => Flow::Continue(out),
                Err(e) => Flow::Continue(format!("error: {}", e)),
            },
            Err(usage) => Flow::Continue(usage),
        }
    }

    pub async fn execute(&mut self, command: Command) -> Result<String> {
        let session = self.focused().session.clone();
        match command {
            Command::Help => Ok(HELP.to_string()),
            Command::Quit => Ok(String::new()),
            Command::Rooms => {
                let rooms = session.list_rooms().await?;
                if rooms.is_empty() {
                    return Ok("no rooms".to_string());
                }
                let current = session.current_room().await?;
                Ok(rooms
                    .iter()
                    .enumerate()
                    .map(|(i, r)| {
                        let mark = if current.as_ref() == Some(r) { " *" } else { "" };
                        format!("{:>3}. {} ({}){}", i + 1, r.name, r.external_session_id, mark)
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            Command::Create(name) => {
                let entry = session.create_room(name).await?;
                Ok(format!("created {} ({})", entry.name, entry.external_session_id))
            }
            Command::Delete(arg) => {
                let room = self.resolve_room(&session, &arg).await?;
                if session.delete_room(room.id).await? {
                    Ok(format!("deleted {}", room.name))
                } else {
                    Ok(format!("{} was already gone", room.name))
                }
            }
            Command::Switch(arg) => {
                let room = self.resolve_room(&session, &arg).await?;
                Ok(match session.switch_to_room(RoomTarget::Room(room.id)).await? {
                    SwitchOutcome::Switched(entry) => format!("now in {}", entry.name),
                    SwitchOutcome::AlreadyInRoom(entry) => format!("already in {}", entry.name),
                })
            }
            Command::Relay { source, target } => {
                let source = self.resolve_room(&session, &source).await?;
                let target = self.resolve_room(&session, &target).await?;
                Ok(match session.activate_relay(source.id, target.id).await? {
                    RelayOutcome::Bridged => format!("relaying {} into {}", source.name, target.name),
                    RelayOutcome::BindingOnly => {
                        format!("joined {} without media forwarding", source.name)
                    }
                    RelayOutcome::AlreadyActive => "relay already running".to_string(),
                })
            }
            Command::React(emoji) => {
                session.send_reaction(emoji.clone()).await?;
                Ok(format!("sent {}", emoji))
            }
            Command::Unrelay => Ok(if session.deactivate_relay().await? {
                "relay stopped".to_string()
            } else {
                "no relay running".to_string()
            }),
            Command::Who => {
                let people = session.current_participants().await?;
                if people.is_empty() {
                    Ok("not in a room".to_string())
                } else {
                    Ok(participant_labels(&people))
                }
            }
            Command::Move { guest, room } => {
                let room = self.resolve_room(&session, &room).await?;
                let people = session.current_participants().await?;
                let person = people
                    .iter()
                    .find(|p| !p.is_local && p.label().eq_ignore_ascii_case(&guest))
                    .or_else(|| {
                        self.find_member(&guest)
                            .and_then(|m| people.iter().find(|p| !p.is_local && p.label() == m.name))
                    })
                    .ok_or_else(|| Error::Usage(format!("{} is not in this room", guest)))?;
                session.request_move(person.participant_id.clone(), room.id).await?;
                Ok(format!("asked {} to move to {}", person.label(), room.name))
            }
            Command::Link => match session.current_room().await? {
                Some(entry) => Ok(RoomLink::for_room(self.link_base.clone(), &entry).to_url()),
                None => Ok("not in a room".to_string()),
            },
            Command::State => {
                let switch = session.switch_state().await?;
                let relay = session.relay_state().await?;
                let room = session
                    .current_room()
                    .await?
                    .map(|r| r.name)
                    .unwrap_or_else(|| "-".to_string());
                Ok(format!(
                    "{}: room {}, switch {:?}, relay {}",
                    self.focused().name,
                    room,
                    switch,
                    if relay.active { "on" } else { "off" }
                ))
            }
            Command::Use(who) => {
                let index = self
                    .find_member_index(&who)
                    .ok_or_else(|| Error::Usage(format!("no client called {}", who)))?;
                self.focus = index;
                Ok(format!("using {}", self.members[index].name))
            }
        }
    }

    fn find_member_index(&self, who: &str) -> Option<usize> {
        if who.eq_ignore_ascii_case("host") {
            return Some(0);
        }
        if let Ok(n) = who.trim_start_matches(|c: char| c.is_ascii_alphabetic()).parse::<usize>() {
            return (n < self.members.len()).then_some(n);
        }
        self.members
            .iter()
            .position(|m| m.name.eq_ignore_ascii_case(who))
    }

    fn find_member(&self, who: &str) -> Option<&Member> {
        self.find_member_index(who).map(|i| &self.members[i])
    }

    /// Room by 1-based list number or by name, as the focused client sees it
    async fn resolve_room(&self, session: &Session, arg: &str) -> Result<DirectoryEntry> {
        let rooms = session.list_rooms().await?;
        let by_index = arg
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| rooms.get(i));
        by_index
            .or_else(|| rooms.iter().find(|r| r.name.eq_ignore_ascii_case(arg)))
            .cloned()
            .ok_or_else(|| Error::Usage(format!("unknown room {}", arg)))
    }

    /// Leave every room and close the transport
    pub async fn shutdown(self) {
        for member in self.members.iter().rev() {
            if let Err(e) = member.session.shutdown().await {
                warn!(name = %member.name, error = %e, "Shutdown failed");
            }
        }
        self.transport.shutdown().await;
    }
}

/// Wait until the host has created its default rooms and joined the first one
async fn wait_for_defaults(host: &Session, expected: usize) -> Option<DirectoryEntry> {
    if expected == 0 {
        return None;
    }
    tokio::time::timeout(STARTUP_WAIT, async {
        loop {
            let rooms = host.list_rooms().await.map(|r| r.len()).unwrap_or_default();
            if let Ok(Some(room)) = host.current_room().await {
                if rooms >= expected {
                    return room;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .ok()
}

async fn reached(session: &Session, target: &ExternalSessionId) -> bool {
    tokio::time::timeout(STARTUP_WAIT, async {
        loop {
            if let Ok(Some(room)) = session.current_room().await {
                if &room.external_session_id == target {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}
