//! Tether CLI
//!
//! Sign in, browse conversations, and chat from the terminal.

mod commands;
mod config;
mod logging;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use tether_client::ClientError;
use tracing::error;

use crate::config::Overrides;

/// Exit status when the session is gone and the user must sign in again.
const EXIT_REAUTH: u8 = 2;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether - chat from the terminal", version)]
struct Cli {
    /// Data directory (credentials, logs, config.toml)
    #[arg(long, global = true, env = "TETHER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// REST API base URL
    #[arg(long, global = true, env = "TETHER_API_URL")]
    api_url: Option<String>,

    /// Realtime WebSocket URL
    #[arg(long, global = true, env = "TETHER_REALTIME_URL")]
    realtime_url: Option<String>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        email: String,
        /// Read from the terminal when omitted
        #[arg(long, env = "TETHER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List conversations, most recent first
    Chats,
    /// Show the message history with a user, grouped by day
    History {
        peer: String,
        /// Also mark the conversation read
        #[arg(long)]
        mark_read: bool,
    },
    /// Send a message over the realtime channel
    Send { peer: String, text: String },
    /// Follow live messages
    Watch {
        /// Open this conversation and print its history first
        #[arg(long)]
        peer: Option<String>,
        /// Refetch interval while the realtime channel is down
        #[arg(long, default_value_t = 60)]
        refetch_secs: u64,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "tether", &mut std::io::stdout());
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        data_dir: cli.data_dir,
        api_url: cli.api_url,
        realtime_url: cli.realtime_url,
    };
    let config = config::resolve(&overrides)?;
    let _logging = logging::init_logging(&config.log_dir())?;

    match cli.command {
        Commands::Login { email, password } => commands::auth::login(config, email, password).await,
        Commands::Logout => commands::auth::logout(config),
        Commands::Whoami => commands::auth::whoami(config, cli.json),
        Commands::Chats => commands::chats::list(config, cli.json).await,
        Commands::History { peer, mark_read } => {
            commands::chats::history(config, peer, mark_read, cli.json).await
        }
        Commands::Send { peer, text } => commands::chats::send(config, peer, text).await,
        Commands::Watch { peer, refetch_secs } => commands::watch::run(config, peer, refetch_secs).await,
        Commands::Completions { .. } => Ok(()),
    }
}

fn report(err: anyhow::Error) -> ExitCode {
    error!(component = "cli", event = "cli.failed", error = %err, "Command failed");

    let status = exit_status(&err);
    if status == EXIT_REAUTH {
        eprintln!();
        eprintln!(
            "  {} Session expired. Run {} to sign in again.",
            style("!").yellow().bold(),
            style("tether login <email>").bold()
        );
        eprintln!();
    } else {
        eprintln!("  {} {err:#}", style("error:").red().bold());
    }
    ExitCode::from(status)
}

fn exit_status(err: &anyhow::Error) -> u8 {
    if err
        .downcast_ref::<ClientError>()
        .is_some_and(ClientError::requires_reauth)
    {
        EXIT_REAUTH
    } else {
        1
    }
}
