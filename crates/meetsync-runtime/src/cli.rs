//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "meetsync", about = "meeting presence detection and status sync")]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/meetsync/meetsyncd.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (presence engine + UDS server)
    Daemon(DaemonOpts),
    /// Show presence, heartbeat and credential state
    Status,
    /// Enable or disable the baseline-status heartbeat
    Heartbeat(HeartbeatOpts),
    /// Enable or disable remote status sync
    Integration {
        state: Toggle,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Config file (default: $XDG_CONFIG_HOME/meetsync/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// State database (default: $XDG_STATE_HOME/meetsync/state.db)
    #[arg(long)]
    pub state_db: Option<PathBuf>,

    /// Log status calls instead of sending them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(clap::Args)]
pub struct HeartbeatOpts {
    pub state: Toggle,

    /// Interval in minutes
    #[arg(long)]
    pub interval: Option<u64>,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/meetsync/meetsyncd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/meetsync-{user}/meetsyncd.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_parses_toggle_and_interval() {
        let cli = Cli::parse_from(["meetsync", "heartbeat", "on", "--interval", "10"]);
        match cli.command {
            Command::Heartbeat(opts) => {
                assert!(opts.state.enabled());
                assert_eq!(opts.interval, Some(10));
            }
            _ => panic!("expected heartbeat"),
        }
    }

    #[test]
    fn global_socket_path_after_subcommand() {
        let cli = Cli::parse_from(["meetsync", "status", "-s", "/tmp/x.sock"]);
        assert_eq!(cli.socket_path.as_deref(), Some("/tmp/x.sock"));
    }

    #[test]
    fn integration_off() {
        let cli = Cli::parse_from(["meetsync", "integration", "off"]);
        assert!(matches!(
            cli.command,
            Command::Integration { state: Toggle::Off }
        ));
    }
}
