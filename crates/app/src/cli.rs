//! Command line arguments

use std::path::PathBuf;

use clap::Parser;

/// Link base used when none is given
pub const DEFAULT_LINK_BASE: &str = "https://roomhop.local/join";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Multi-room meeting console", long_about = None)]
pub struct Args {
    /// Host display name
    #[arg(short, long, default_value = "Host")]
    pub name: String,

    /// Number of simulated participants
    #[arg(short, long, default_value_t = 2)]
    pub guests: usize,

    /// Route the directory through a TCP hub instead of in-process pub/sub
    #[arg(long)]
    pub tcp: bool,

    /// Hub port when --tcp is set (0 picks a free one)
    #[arg(short, long, default_value_t = roomhop_net::DEFAULT_PORT)]
    pub port: u16,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Room link or bare room id participants start from (defaults to the host's first room)
    #[arg(short, long)]
    pub link: Option<String>,

    /// Base for generated room links
    #[arg(long, default_value = DEFAULT_LINK_BASE)]
    pub link_base: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["roomhop"]);
        assert_eq!(args.name, "Host");
        assert_eq!(args.guests, 2);
        assert!(!args.tcp);
        assert_eq!(args.port, roomhop_net::DEFAULT_PORT);
        assert!(args.link.is_none());
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from([
            "roomhop", "--tcp", "-p", "0", "-g", "3", "--link", "https://x/j?room=ext-2",
        ]);
        assert!(args.tcp);
        assert_eq!(args.port, 0);
        assert_eq!(args.guests, 3);
        assert_eq!(args.link.as_deref(), Some("https://x/j?room=ext-2"));
    }
}
