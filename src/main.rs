use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use fxquote::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for fxquote::AppCommand {
    fn from(cmd: Commands) -> fxquote::AppCommand {
        match cmd {
            Commands::Request {
                code,
                idempotency_key,
            } => fxquote::AppCommand::Request {
                code,
                idempotency_key,
            },
            Commands::Get { code, id } => fxquote::AppCommand::Get { code, id },
            Commands::Latest { code } => fxquote::AppCommand::Latest { code },
            Commands::Serve => fxquote::AppCommand::Serve,
            Commands::Drain => fxquote::AppCommand::Drain,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Accept quote requests and resolve them until Ctrl-C
    Serve,
    /// Request a quote update for a currency pair such as EUR_USD
    Request {
        code: String,
        /// Retrying with the same key returns the task admitted first
        #[arg(short, long)]
        idempotency_key: String,
    },
    /// Show a requested quote update
    Get { code: String, id: u64 },
    /// Show the latest successful quote for a currency pair
    Latest { code: String },
    /// Run a single poll cycle against the local store and exit
    Drain,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => fxquote::cli::setup::setup(),
        Some(cmd) => fxquote::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
