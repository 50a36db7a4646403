//! Legion CLI
//!
//! Conversation management and an interactive streaming chat against the
//! Legion agent backend.

mod cli;
mod cmd_chat;
mod cmd_conversations;

use std::io;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use legion_client::logging::init_logging;
use legion_client::{ClientConfig, HttpApi};
use tracing::info;

use crate::cli::{Cli, Command};

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{} {err:#}", console::style("error:").red().bold());
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "legion", &mut io::stdout());
        return Ok(());
    }

    let config = ClientConfig::load(cli.common.data_dir.as_deref(), cli.common.server.clone())
        .context("failed to load configuration")?;
    let _logging = init_logging(&config.log_dir()).context("failed to initialize logging")?;
    info!(
        component = "cli",
        event = "cli.started",
        version = legion_client::VERSION,
        server_url = %config.server_url,
        data_dir = %config.data_dir.display(),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, config: ClientConfig) -> anyhow::Result<()> {
    let api = HttpApi::new(&config.server_url)?;
    match command {
        Command::List => cmd_conversations::list(&api).await,
        Command::New { title, work_dir } => {
            cmd_conversations::create(&api, &title, work_dir.as_deref()).await
        }
        Command::Rename { id, title } => cmd_conversations::rename(&api, &id, &title).await,
        Command::Delete { id } => cmd_conversations::delete(&api, &id).await,
        Command::History { id, json } => cmd_conversations::history(&api, &id, json).await,
        Command::Config => cmd_conversations::show_config(&api).await,
        Command::Chat(args) => cmd_chat::run(api, &config, args).await,
        Command::Completions { .. } => Ok(()),
    }
}
