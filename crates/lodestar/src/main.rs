mod cli;
mod commands;
mod config;
mod ingest;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::Runtime;

use lodestar_engine::{Domain, TunnelInput};
use lodestar_rag::SearchFilters;

use crate::cli::{Cli, Command, SummaryCommand};
use crate::commands::AskArgs;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose || logging::env_flag();
    logging::init(verbose);
    let config = config::load(cli.config.as_deref())?;
    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    match cli.command {
        Command::Ingest {
            input,
            pattern,
            owner,
        } => {
            let embedder = config::embedder()?;
            let report =
                runtime.block_on(ingest::run(&config, embedder, &input, &pattern, owner))?;
            commands::print_json(&report)
        }
        Command::Search {
            query,
            k,
            owner,
            document,
            mime,
        } => {
            let filters = SearchFilters {
                document_id: document,
                owner_id: owner,
                mime,
            };
            runtime.block_on(commands::search(&config, query, k, filters))
        }
        Command::Plan { prompt } => commands::plan(&prompt),
        Command::Route { prompt, task } => commands::route(&config, &prompt, task.as_deref()),
        Command::Tunnel {
            prompt,
            domain,
            locale,
            citations,
            role,
            no_cet,
        } => commands::tunnel_prompt(
            &config,
            TunnelInput {
                text: prompt,
                cet: !no_cet,
                role: role.unwrap_or_default(),
                domain: domain.as_deref().map(Domain::from_str),
                locale,
                require_citations: citations,
            },
        ),
        Command::Ask {
            prompt,
            session,
            user,
            mode,
            tunnel,
            domain,
            locale,
            json,
        } => {
            let engine = config::open_engine(config)?;
            runtime.block_on(commands::ask(
                &engine,
                AskArgs {
                    prompt,
                    session,
                    user,
                    mode,
                    tunnel,
                    domain,
                    locale,
                    json,
                },
            ))
        }
        Command::Chat {
            prompt,
            model,
            stream,
        } => {
            let client = config::llm_client(&config)?;
            runtime.block_on(commands::chat(&client, prompt, model, stream))
        }
        Command::Govern { draft, model } => {
            let client = config::llm_client(&config)?;
            runtime.block_on(commands::govern(&client, &draft, model))
        }
        Command::Validate { reply, tests } => commands::validate(&config, &reply, tests),
        Command::Distill { session } => commands::distill(&config, &session),
        Command::Summary { action } => match action {
            SummaryCommand::Get { session } => commands::summary_get(&config, &session),
            SummaryCommand::Set { session, text } => {
                commands::summary_set(&config, &session, &text)
            }
        },
    }
}
