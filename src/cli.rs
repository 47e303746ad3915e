use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{search::DEFAULT_SEARCH_LIMIT, source::AudienceTier};

#[derive(Debug, Parser)]
#[command(
    name = "storechat",
    about = "Ask questions about your store's catalog, sales and customers"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rebuild the embedding index from a catalog snapshot
    Reindex(ReindexArgs),
    /// Rank indexed records against a query
    Search(SearchArgs),
    /// Ask a question, optionally continuing a session
    Ask(AskArgs),
    /// Inspect chat sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Show system status and statistics
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Manage the ColBERT model configuration
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Reindex --

#[derive(Debug, Parser)]
pub struct ReindexArgs {
    /// JSON catalog with products, categories, sales and customers
    #[arg(long)]
    pub catalog: PathBuf,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Audience whose visibility rules apply
    #[arg(short, long, value_enum, default_value_t = AudienceTier::Customer)]
    pub tier: AudienceTier,

    /// Number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub query: String,

    /// Continue this session (a new one is started if it does not exist)
    #[arg(short, long)]
    pub session: Option<String>,

    /// Audience whose visibility rules and tone apply
    #[arg(short, long, value_enum, default_value_t = AudienceTier::Customer)]
    pub tier: AudienceTier,

    /// Output the answer and session id as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Session --

#[derive(Debug, Subcommand)]
pub enum SessionAction {
    /// List sessions, most recently active first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print every message of a session
    Show {
        /// Session id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Model --

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Show the currently resolved model
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a default model ID or local path in config.redb
    Set {
        /// Model ID (HuggingFace) or local path
        model: String,
    },
    /// Clear the stored model setting (revert to default)
    Clear,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "storechat",
            &mut std::io::stdout(),
        );
    }
}
