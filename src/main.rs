use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use juggle::agent::{
    AgentLoop, AgentLoopConfig, AgentLoopResult, ClaudeRunner, ClaudeRunnerConfig, LoopEvent, format_duration,
};
use juggle::domain::{ItemState, ModelSize, Priority, Session, Todo, WorkItem};
use juggle::prompt::SessionPromptProvider;
use juggle::storage::{LoopStore, ProjectStore};

mod cli;
mod config;

use cli::Cli;
use cli::commands::{AgentCommands, AgentRunArgs, Commands, ItemCommands, SessionCommands};
use config::{Config, minutes};

/// Exit code when the run is interrupted with Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("juggle")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("juggle.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let root = match &cli.project {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let store = ProjectStore::open_in(&root, &config.storage.dir_name)
        .context(format!("Failed to open project at {}", root.display()))?;

    match &cli.command {
        Commands::Session { command } => handle_session_command(command, &store),
        Commands::Item { command } => handle_item_command(command, &store),
        Commands::Agent {
            command: AgentCommands::Run(args),
        } => handle_agent_run(args, store, config, cli.is_verbose()).await,
    }
}

fn handle_session_command(command: &SessionCommands, store: &ProjectStore) -> Result<()> {
    info!("Handling session command: {:?}", command);
    match command {
        SessionCommands::Create {
            id,
            description,
            context,
            criteria,
            model,
        } => {
            let mut session = Session::new(id.as_str(), description.as_str());
            if let Some(context) = context {
                session.set_context(context.as_str());
            }
            for criterion in criteria {
                session.add_criterion(criterion.as_str());
            }
            if let Some(model) = model {
                session = session.with_model(model.parse::<ModelSize>()?);
            }
            store.sessions().create(&session)?;
            println!("{} {}", "Created session:".green(), session.id);
        }
        SessionCommands::Edit {
            id,
            description,
            context,
            criteria,
            model,
        } => {
            let model = model.as_deref().map(|m| m.parse::<ModelSize>()).transpose()?;
            let session = store.sessions().modify(id, |s| {
                if let Some(description) = description {
                    s.description = description.clone();
                }
                if let Some(context) = context {
                    s.set_context(context.as_str());
                }
                for criterion in criteria {
                    s.add_criterion(criterion.as_str());
                }
                if model.is_some() {
                    s.default_model = model;
                }
                Ok(())
            })?;
            println!("{} {}", "Updated session:".green(), session.id);
        }
        SessionCommands::List => {
            let sessions = store.sessions().list_all()?;
            if sessions.is_empty() {
                println!("{}", "No sessions".dimmed());
            }
            for session in sessions {
                let counts = store.items().counts_for_session(&session.id)?;
                println!(
                    "{} {}/{} complete, {} blocked  {}",
                    format!("{:<24}", session.id).bold(),
                    counts.complete,
                    counts.total,
                    counts.blocked,
                    session.description.dimmed()
                );
            }
        }
        SessionCommands::Show { id } => {
            let session = store.sessions().require(id)?;
            println!("{} {}", "Session:".green(), session.id.bold());
            if !session.description.is_empty() {
                println!("  {}", session.description);
            }
            if let Some(model) = session.default_model {
                println!("  model: {}", model.model_name());
            }
            if !session.context.is_empty() {
                println!("  context: {}", session.context);
            }
            for criterion in &session.acceptance_criteria {
                println!("  - {}", criterion);
            }
            let items = store.items().find_by_session(id)?;
            for item in &items {
                print_item(item);
            }
        }
    }
    Ok(())
}

fn handle_item_command(command: &ItemCommands, store: &ProjectStore) -> Result<()> {
    info!("Handling item command: {:?}", command);
    let items = store.items();
    let item = match command {
        ItemCommands::Add {
            title,
            priority,
            tags,
            todos,
            criteria,
        } => {
            let mut item = WorkItem::new(title.as_str()).with_priority(priority.parse::<Priority>()?);
            for tag in tags {
                item.add_tag(tag.as_str());
            }
            for todo in todos {
                item.add_todo(Todo::new(todo.as_str()));
            }
            item.acceptance_criteria.extend(criteria.iter().cloned());
            items.create(&item)?;
            println!("{} {}", "Added:".green(), item.id);
            return Ok(());
        }
        ItemCommands::List { session, state } => {
            let state = state.as_deref().map(|s| s.parse::<ItemState>()).transpose()?;
            let list = select_items(store, session.as_deref(), state)?;
            if list.is_empty() {
                println!("{}", "No items".dimmed());
            }
            for item in &list {
                print_item(item);
            }
            return Ok(());
        }
        ItemCommands::Todo { id, number } => {
            let (item, done) = toggle_item_todo(store, id, *number)?;
            let mark = if done { "done".green() } else { "open".normal() };
            println!("{} todo {} is now {}", item.id.bold(), number, mark);
            return Ok(());
        }
        ItemCommands::Start { id } => items.modify(id, |i| i.start())?,
        ItemCommands::Block { id, reason } => items.modify(id, |i| i.block(reason.as_str()))?,
        ItemCommands::Unblock { id } => items.modify(id, |i| i.unblock())?,
        ItemCommands::Complete { id, note } => items.modify(id, |i| i.complete(note.as_str()))?,
    };
    println!("{} is now {}", item.id.bold(), colored_state(item.state, 0));
    Ok(())
}

/// Items of a session, or in a state, or both; everything when unfiltered.
fn select_items(store: &ProjectStore, session: Option<&str>, state: Option<ItemState>) -> Result<Vec<WorkItem>> {
    let items = store.items();
    let mut list = match (session, state) {
        (Some(session), _) => items.find_by_session(session)?,
        (None, Some(state)) => items.find_by_state(state)?,
        (None, None) => items.list_all()?,
    };
    if let Some(state) = state {
        list.retain(|i| i.state == state);
    }
    Ok(list)
}

/// Flip todo `number` (1-based) of an item; returns the item and the new done flag.
fn toggle_item_todo(store: &ProjectStore, id: &str, number: usize) -> Result<(WorkItem, bool)> {
    let index = number
        .checked_sub(1)
        .ok_or_else(|| eyre::eyre!("todo numbers start at 1"))?;
    let mut done = false;
    let item = store.items().modify(id, |i| {
        done = i.toggle_todo(index)?;
        Ok(())
    })?;
    Ok((item, done))
}

fn print_item(item: &WorkItem) {
    println!(
        "  {:<16} {} {:<7} {}",
        item.id,
        colored_state(item.state, 12),
        item.priority.to_string(),
        item.title
    );
    if let Some(reason) = &item.blocked_reason {
        println!("  {:<16} {}", "", reason.red());
    }
}

fn colored_state(state: ItemState, width: usize) -> ColoredString {
    let label = format!("{:<width$}", state.to_string(), width = width);
    match state {
        ItemState::Pending => label.normal(),
        ItemState::InProgress => label.cyan(),
        ItemState::Blocked => label.red(),
        ItemState::Complete => label.green(),
    }
}

/// Model for the agent: the flag, then the session default, then config.
///
/// `small`/`medium`/`large` (or `s`/`m`/`l`) map to the agent's aliases; any
/// other value is passed through.
fn resolve_model(flag: Option<&str>, session: Option<ModelSize>, config: Option<&str>) -> Option<String> {
    let explicit = |value: &str| match value.parse::<ModelSize>() {
        Ok(size) => size.model_name().to_string(),
        Err(_) => value.to_string(),
    };
    flag.map(explicit)
        .or_else(|| session.map(|size| size.model_name().to_string()))
        .or_else(|| config.map(explicit))
}

fn loop_config(args: &AgentRunArgs, root: &Path, config: &Config) -> AgentLoopConfig {
    let agent = &config.agent;
    AgentLoopConfig::new(args.session.as_str(), root)
        .max_iterations(args.max_iterations.unwrap_or(agent.max_iterations))
        .trust(args.trust || agent.trust)
        .debug(args.debug)
        .iteration_delay(args.delay.map(Duration::from_secs).unwrap_or_else(|| agent.delay()))
        .iteration_timeout(
            args.timeout
                .map(minutes)
                .unwrap_or_else(|| agent.timeout()),
        )
        .max_wait(
            args.max_wait
                .map(minutes)
                .unwrap_or_else(|| agent.max_wait()),
        )
}

async fn handle_agent_run(args: &AgentRunArgs, store: ProjectStore, config: &Config, verbose: bool) -> Result<()> {
    let session = store.load_session(&args.session)?;
    let root = store.root().to_path_buf();
    let model = resolve_model(args.model.as_deref(), session.default_model, config.agent.model.as_deref());
    let loop_config = loop_config(args, &root, config);
    info!("Agent run for {} with model {:?}: {:?}", session.id, model, loop_config);

    let runner = ClaudeRunner::new(
        ClaudeRunnerConfig::default()
            .program(config.agent.command.as_str())
            .args(config.agent.args.iter().cloned())
            .model(model.clone())
            .working_dir(&root),
    );
    let prompts = SessionPromptProvider::new(config.storage.dir_name.as_str());

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx, verbose));
    let agent = AgentLoop::new(Arc::new(runner), Arc::new(prompts), Arc::new(store)).with_events(tx);

    println!(
        "{} {} ({} iterations max{})",
        "Running agent on".cyan(),
        session.id.bold(),
        loop_config.max_iterations,
        model.map(|m| format!(", model {}", m)).unwrap_or_default()
    );

    let result = tokio::select! {
        result = agent.run(&loop_config) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping agent loop");
            println!("\n{}", "Interrupted".yellow());
            std::process::exit(EXIT_INTERRUPTED);
        }
    };

    drop(agent);
    if let Err(e) = printer.await {
        log::debug!("Event printer task failed: {}", e);
    }

    print_summary(&result);
    std::process::exit(result.outcome().exit_code());
}

async fn print_events(mut rx: tokio::sync::mpsc::UnboundedReceiver<LoopEvent>, verbose: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            LoopEvent::IterationStarted {
                iteration,
                max_iterations,
            } => println!("{}", format!("=== Iteration {}/{} ===", iteration, max_iterations).bold()),
            LoopEvent::RateLimited { wait, retry, .. } => println!(
                "{} waiting {} (retry {})",
                "Rate limited:".yellow(),
                format_duration(wait),
                retry
            ),
            LoopEvent::WaitRemaining { remaining } => {
                println!("  {} remaining", format_duration(remaining).dimmed())
            }
            LoopEvent::PrematureCompletion { counts } => println!(
                "{} agent said complete, but {}/{} items are terminal",
                "Warning:".yellow(),
                counts.terminal,
                counts.total
            ),
            LoopEvent::CountsRefreshed { counts } => println!(
                "  {}/{} complete, {} blocked",
                counts.complete, counts.total, counts.blocked
            ),
            LoopEvent::Delay { duration } if verbose => {
                println!("  {}", format!("next iteration in {}", format_duration(duration)).dimmed())
            }
            LoopEvent::Delay { .. } | LoopEvent::Finished { .. } => {}
        }
    }
}

fn print_summary(result: &AgentLoopResult) {
    let outcome = result.outcome();
    let label = match outcome.exit_code() {
        0 => outcome.label().green(),
        2 => outcome.label().red(),
        _ => outcome.label().yellow(),
    };
    println!();
    println!("{} {}", "Result:".bold(), label);
    if let Some(reason) = &result.blocked_reason {
        println!("  reason: {}", reason);
    }
    if let Some(message) = &result.timeout_message {
        println!("  {}", message);
    }
    println!("  iterations: {}", result.iterations);
    println!(
        "  items: {}/{} complete, {} blocked",
        result.items_complete, result.items_total, result.items_blocked
    );
    if !result.total_wait.is_zero() {
        println!("  rate limit wait: {}", format_duration(result.total_wait));
    }
    println!("  elapsed: {}", format_duration(result.elapsed()));
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    if let Err(e) = run_application(&cli, &config).await {
        log::error!("Application failed: {:?}", e);
        eprintln!("{} {:#}", "Error:".red(), e);
        std::process::exit(1);
    }

    Ok(())
}
