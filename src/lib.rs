pub mod api;
pub mod cli;
pub mod core;
pub mod providers;
pub mod store;
pub mod worker;

use crate::api::TaskClient;
use crate::core::config::AppConfig;
use crate::core::task::TaskId;
use anyhow::Result;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Request { code: String, idempotency_key: String },
    Get { code: String, id: TaskId },
    Latest { code: String },
    Serve,
    Drain,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Serve => cli::serve::serve(&config).await,
        AppCommand::Drain => cli::serve::drain(&config).await,
        AppCommand::Request {
            code,
            idempotency_key,
        } => {
            let client = TaskClient::new(&config.server.url())?;
            cli::tasks::request(&client, &code, &idempotency_key)
                .await
                .map(|_| ())
        }
        AppCommand::Get { code, id } => {
            let client = TaskClient::new(&config.server.url())?;
            cli::tasks::get(&client, &code, id).await
        }
        AppCommand::Latest { code } => {
            let client = TaskClient::new(&config.server.url())?;
            cli::tasks::latest(&client, &code).await
        }
    }
}
