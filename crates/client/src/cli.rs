use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "legion",
    author,
    version,
    about = "Terminal client for the Legion agent backend",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonOpts,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Data directory (config, logs)
    #[arg(long, value_name = "DIR", env = "LEGION_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,
    /// Backend base URL, e.g. http://127.0.0.1:18790
    #[arg(long, value_name = "URL", env = "LEGION_SERVER_URL", global = true)]
    pub server: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List conversations
    List,
    /// Create a conversation
    New {
        #[arg(long, default_value = "New Conversation")]
        title: String,
        /// Working directory for the agent
        #[arg(long, value_name = "DIR")]
        work_dir: Option<String>,
    },
    /// Rename a conversation
    Rename { id: String, title: String },
    /// Delete a conversation
    Delete { id: String },
    /// Print a conversation's history
    History {
        id: String,
        /// Emit the replayed transcript as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the backend's model and provider configuration
    Config,
    /// Chat interactively in a conversation
    Chat(ChatArgs),
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    pub id: String,
    /// Model to use; defaults to client.toml, then the backend default
    #[arg(long)]
    pub model: Option<String>,
    /// Ask the model to think before answering
    #[arg(long)]
    pub thinking: bool,
    /// Attach a file to the first message (repeatable)
    #[arg(long = "attach", value_name = "PATH")]
    pub attachments: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn chat_collects_repeated_attachments() {
        let cli = Cli::try_parse_from([
            "legion", "chat", "conv-1", "--attach", "a.png", "--attach", "b.png", "--thinking",
        ])
        .unwrap();
        match cli.command {
            Command::Chat(args) => {
                assert_eq!(args.id, "conv-1");
                assert_eq!(args.attachments.len(), 2);
                assert!(args.thinking);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
