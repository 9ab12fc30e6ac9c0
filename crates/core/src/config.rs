//! Coordinator configuration
//!
//! Loaded from `roomhop.toml`. Every key is optional; unknown keys are
//! rejected so typos surface instead of silently falling back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::MediaKind;

/// Config file name inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "roomhop.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Pause between leave acknowledgment and the next join
    pub settle_delay_ms: u64,
    /// Bound on waiting for a join acknowledgment
    pub join_timeout_ms: u64,
    /// Bound on waiting for a leave acknowledgment
    pub leave_timeout_ms: u64,
    /// Bound on the relay binding reaching joined
    pub relay_timeout_ms: u64,
    /// Rooms the host creates on startup, in order
    pub default_rooms: Vec<String>,
    pub directory_topic: String,
    pub move_topic: String,
    /// Transient emoji reactions, never retained
    pub reaction_topic: String,
    pub relay_kinds: Vec<MediaKind>,
    /// Appended to the display name of relay bindings
    pub relay_name_suffix: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 0,
            join_timeout_ms: 10_000,
            leave_timeout_ms: 5_000,
            relay_timeout_ms: 10_000,
            default_rooms: vec!["Room A".to_string(), "Room B".to_string()],
            directory_topic: "ROOM_LIST".to_string(),
            move_topic: "ROOM_MOVE".to_string(),
            reaction_topic: "EMOJI_REACTION".to_string(),
            relay_kinds: vec![MediaKind::Video, MediaKind::Audio],
            relay_name_suffix: " (Relay)".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path` if given, else the platform config file, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "Loading config");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Platform config location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "onyx", "roomhop").map(|d| d.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        if self.join_timeout_ms == 0 || self.leave_timeout_ms == 0 || self.relay_timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeouts must be non-zero".into()));
        }
        let topics = [&self.directory_topic, &self.move_topic, &self.reaction_topic];
        if topics.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::InvalidConfig("topics must be non-empty".into()));
        }
        if topics[0] == topics[1] || topics[0] == topics[2] || topics[1] == topics[2] {
            return Err(Error::InvalidConfig("topics must all differ".into()));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn leave_timeout(&self) -> Duration {
        Duration::from_millis(self.leave_timeout_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CoordinatorConfig::from_toml("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.default_rooms, vec!["Room A", "Room B"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let config = CoordinatorConfig::from_toml(
            r#"
settle_delay_ms = 500
default_rooms = []
relay_kinds = ["audio"]
"#,
        )
        .unwrap();

        assert_eq!(config.settle_delay(), Duration::from_millis(500));
        assert!(config.default_rooms.is_empty());
        assert_eq!(config.relay_kinds, vec![MediaKind::Audio]);
        assert_eq!(config.directory_topic, "ROOM_LIST");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = CoordinatorConfig::from_toml("join_timeout = 5");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "join_timeout_ms = 250\n").unwrap();

        let config = CoordinatorConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.join_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_timeout_invalid() {
        let config = CoordinatorConfig {
            join_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shared_reaction_topic_invalid() {
        let config = CoordinatorConfig::from_toml("reaction_topic = \"ROOM_MOVE\"").unwrap();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        assert_eq!(CoordinatorConfig::default().reaction_topic, "EMOJI_REACTION");
    }
}
