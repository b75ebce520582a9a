//! meetsync: meeting presence detection and status sync.
//! One binary: the daemon plus thin CLI subcommands that talk to it over UDS.

use clap::Parser;

use meetsync_runtime::config::default_config_path;
use meetsync_runtime::daemon::{self, DaemonOptions};
use meetsync_runtime::store::default_state_db_path;

mod cli;
mod client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("MEETSYNC_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("meetsync daemon starting");

            daemon::run_daemon(DaemonOptions {
                config_path: opts.config.unwrap_or_else(default_config_path),
                state_db: opts.state_db.unwrap_or_else(default_state_db_path),
                socket_path,
                dry_run: opts.dry_run,
            })
            .await?;
        }
        cli::Command::Status => client::cmd_status(&socket_path).await?,
        cli::Command::Heartbeat(opts) => {
            client::cmd_heartbeat(&socket_path, opts.state.enabled(), opts.interval).await?;
        }
        cli::Command::Integration { state } => {
            client::cmd_integration(&socket_path, state.enabled()).await?;
        }
    }

    Ok(())
}
