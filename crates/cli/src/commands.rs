use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlrag::NewBusinessRule;
use sqlrag_server::{config::get_config, state::build_app_state};
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture the live schema as a new snapshot and rebuild the index
    Index,
    /// Compare the live schema with the current snapshot
    Drift,
    /// Ask a question in natural language
    Ask(AskArgs),
    /// Run a statement through the validation pipeline without executing it
    Validate(ValidateArgs),
    /// Manage stored example queries
    Examples {
        #[command(subcommand)]
        command: ExampleCommands,
    },
    /// Manage business rules
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// List stored schema snapshots
    Snapshots,
    /// Make an older snapshot current again
    Rollback {
        version: u64,
    },
}

#[derive(Parser, Debug)]
pub struct AskArgs {
    question: String,
    /// Continue an existing conversation. Sessions live only as long as the process.
    #[arg(long, default_value = "cli")]
    session: String,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    sql: String,
    /// The question the statement answers; enables the injection check.
    #[arg(long)]
    question: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ExampleCommands {
    List,
    Add {
        #[arg(long)]
        question: String,
        #[arg(long)]
        sql: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RuleCommands {
    List,
    Add {
        #[arg(long)]
        term: String,
        #[arg(long = "alias")]
        aliases: Vec<String>,
        #[arg(long)]
        fragment: Option<String>,
        #[arg(long)]
        clarification: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(config_path: Option<&str>, command: &Commands) -> Result<()> {
    let config = get_config(config_path).map_err(|e| anyhow!(e.to_string()))?;
    info!(db_url = %config.db_url, "Opening pipeline");
    let state = build_app_state(config).await?;
    let executor = &state.executor;

    match command {
        Commands::Index => print_json(&executor.monitor.refresh().await?),
        Commands::Drift => print_json(&executor.monitor.check_for_drift().await?),
        Commands::Ask(args) => {
            let response = executor.ask(&args.session, &args.question).await?;
            print_json(&response)
        }
        Commands::Validate(args) => {
            let verdict = executor.validate_only(&args.sql, args.question.as_deref())?;
            print_json(&verdict)?;
            if !verdict.passed() {
                return Err(anyhow!("{}", verdict.explanation));
            }
            Ok(())
        }
        Commands::Examples { command } => match command {
            ExampleCommands::List => print_json(&executor.examples.list()),
            ExampleCommands::Add { question, sql } => {
                print_json(&executor.add_example(question, sql).await?)
            }
        },
        Commands::Rules { command } => match command {
            RuleCommands::List => print_json(&executor.rules.list()),
            RuleCommands::Add {
                term,
                aliases,
                fragment,
                clarification,
            } => {
                let rule = executor
                    .add_rule(NewBusinessRule {
                        term: term.clone(),
                        aliases: aliases.clone(),
                        sql_fragment: fragment.clone(),
                        clarification: clarification.clone(),
                    })
                    .await?;
                print_json(&rule)
            }
        },
        Commands::Snapshots => print_json(&executor.snapshots.versions()),
        Commands::Rollback { version } => {
            let snapshot = executor.monitor.rollback_to(*version).await?;
            print_json(&serde_json::json!({
                "version": snapshot.version,
                "tables": snapshot.table_names().collect::<Vec<_>>(),
            }))
        }
    }
}
