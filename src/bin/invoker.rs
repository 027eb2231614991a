//! Command Invokers CLI
//!
//! Runs one command against a JSON document snapshot with the basic action
//! set registered, waits for every follow-up to settle, and prints the
//! resulting document together with the event trail.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use command_invokers::actions::register_basic_actions;
use command_invokers::{
    CommandEngine, CommandEventKind, DispatchOutcome, DocumentTree, EngineConfig, InMemoryDocument,
};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "invoker")]
#[command(about = "Command Invokers CLI - Run declarative commands against a document snapshot")]
#[command(version = "0.1")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional TOML file with engine overrides
    #[arg(long, env = "INVOKER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a command and print the resulting document
    Run {
        /// JSON document snapshot
        #[arg(long)]
        document: PathBuf,

        /// Command string, e.g. "--text:set:hello"
        #[arg(long)]
        command: String,

        /// Target element id or selector list
        #[arg(long)]
        target: String,

        /// Id of the invoking element whose chain markup should be honored
        #[arg(long)]
        source: Option<String>,

        /// Print only the event trail
        #[arg(long)]
        quiet: bool,
    },

    /// List the registered commands
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenv();

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = EngineConfig::load(cli.config.as_deref())?;
    debug!(?config, "Engine configuration");

    match cli.command {
        Commands::Run {
            document,
            command,
            target,
            source,
            quiet,
        } => run(config, document, &command, &target, source.as_deref(), quiet).await?,

        Commands::List => {
            let engine = CommandEngine::with_config(Arc::new(InMemoryDocument::new()), config);
            register_basic_actions(&engine);
            for name in engine.registered_commands() {
                println!("{}", name.cyan());
            }
        }
    }

    Ok(())
}

async fn run(
    config: EngineConfig,
    path: PathBuf,
    command: &str,
    target: &str,
    source: Option<&str>,
    quiet: bool,
) -> Result<()> {
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("reading document {}", path.display()))?;
    let document = Arc::new(InMemoryDocument::from_json(&json)?);
    let engine = CommandEngine::with_config(document.clone(), config);
    register_basic_actions(&engine);

    let source = match source {
        Some(id) => Some(
            document
                .get_element_by_id(id)
                .with_context(|| format!("no invoker with id '{id}'"))?,
        ),
        None => None,
    };

    let mut events = engine.subscribe();
    info!(command, target, "Running command");

    match engine.execute_command(command, target, source).await {
        Ok(DispatchOutcome::Executed(result)) if result.success => {
            println!("{} {}", "✔".green(), command.bold());
        }
        Ok(DispatchOutcome::Executed(result)) => {
            let reason = result.error.map(|e| e.to_string()).unwrap_or_default();
            println!("{} {} {}", "✘".red(), command.bold(), reason.red());
        }
        Ok(DispatchOutcome::Skipped(state)) => {
            println!("{} {} ({})", "•".yellow(), command.bold(), state);
        }
        Err(err) => {
            error!(%err, "Command rejected");
            println!("{} {} {}", "✘".red(), command.bold(), err.to_string().red());
        }
    }

    engine.wait_for_idle().await;

    loop {
        match events.try_recv() {
            Ok(event) => {
                let label = match &event.kind {
                    CommandEventKind::Executed { success: true, .. } => "executed".green(),
                    CommandEventKind::Executed { success: false, .. } => "failed".red(),
                    CommandEventKind::Rejected { .. } => "rejected".red(),
                    CommandEventKind::Skipped { .. } => "skipped".yellow(),
                };
                let target = event.target.as_deref().unwrap_or("-");
                let origin = if event.chained { "chain" } else { "direct" };
                println!("  {:<9} {:<6} {} -> {}", label, origin, event.command, target);
            }
            Err(TryRecvError::Lagged(missed)) => {
                println!("  {} {} events not shown", "…".dimmed(), missed);
            }
            Err(_) => break,
        }
    }

    if !quiet {
        println!("{}", document.to_json_pretty()?);
    }

    let stats = engine.stats();
    println!(
        "{} {} executions in the last {:?}",
        "ℹ".blue(),
        stats.executions,
        stats.window
    );

    Ok(())
}
