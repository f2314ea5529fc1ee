use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lodestar", about = "Hybrid retrieval and governed answering")]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    /// TOML config; defaults to ./lodestar.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Index text files under a path.
    Ingest {
        input: String,
        #[arg(long, default_value = "*.txt,*.md,*.markdown,*.rst")]
        pattern: String,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Hybrid search over indexed chunks.
    Search {
        query: String,
        #[arg(long, default_value_t = 12)]
        k: usize,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        document: Option<i64>,
        #[arg(long)]
        mime: Option<String>,
    },
    Plan {
        prompt: String,
    },
    Route {
        prompt: String,
        /// Task type to route; planned from the prompt when omitted.
        #[arg(long)]
        task: Option<String>,
    },
    Tunnel {
        prompt: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        locale: Option<String>,
        #[arg(long)]
        citations: Option<u32>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long, default_value_t = false)]
        no_cet: bool,
    },
    /// Full pipeline: plan, route, tunnel, retrieve, generate, govern, remember.
    Ask {
        prompt: String,
        #[arg(long, default_value = "default")]
        session: String,
        #[arg(long, default_value = "local")]
        user: String,
        #[arg(long, default_value = "governed")]
        mode: String,
        /// off, auto or always
        #[arg(long)]
        tunnel: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        locale: Option<String>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Single generation call, optionally streamed.
    Chat {
        prompt: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
    /// Run verify, critique and refine over a draft file.
    Govern {
        draft: PathBuf,
        #[arg(long)]
        model: Option<String>,
    },
    /// CET validation and property checks over a reply file.
    Validate {
        reply: PathBuf,
        /// Comma-separated property checks; the configured list when omitted.
        #[arg(long)]
        tests: Option<String>,
    },
    Distill {
        #[arg(long, default_value = "default")]
        session: String,
    },
    Summary {
        #[command(subcommand)]
        action: SummaryCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum SummaryCommand {
    Get { session: String },
    Set { session: String, text: String },
}
