//! Command-line driver.
//!
//! Commands for asking questions, running an interactive session and
//! listing the templates and tools the agent can use.

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentResponse};
use crate::config::Config;
use crate::error::AgentError;
use crate::db::{DataStore, FixtureStore, PgStore};
use crate::llm::create_reasoning_engine;
use crate::query::catalog::builtin_registry;
use crate::query::{QueryExecutor, Value};
use crate::tools::builtin::register_builtin;
use crate::tools::{Filters, ToolRegistry};

#[derive(Parser, Debug)]
#[command(name = "marketing-agent", version, about = "Ask questions about marketing performance")]
pub struct Cli {
    /// Serve the built-in demo dataset instead of connecting to PostgreSQL
    #[arg(long, global = true)]
    pub fixture: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Ask one question and print the answer
    Ask {
        /// The question
        message: String,

        /// Session to continue
        #[arg(long, default_value = "cli")]
        session: String,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Start an interactive session
    Repl {
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// List the registered query templates
    Templates,

    /// List the tools and their argument schemas
    Tools,
}

/// Dashboard filters applied to every question.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    pub date_from: Option<NaiveDate>,

    /// End date (YYYY-MM-DD)
    #[arg(long)]
    pub date_to: Option<NaiveDate>,

    /// Customer segment
    #[arg(long)]
    pub segment: Option<String>,

    /// Marketing channel
    #[arg(long)]
    pub channel: Option<String>,
}

impl FilterArgs {
    pub fn to_filters(&self) -> Option<Filters> {
        let filters = Filters {
            date_from: self.date_from,
            date_to: self.date_to,
            segment: self.segment.clone(),
            channel: self.channel.clone(),
        };
        (!filters.is_empty()).then_some(filters)
    }
}

/// Run a parsed command line.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Command::Ask {
            message,
            session,
            json,
            filters,
        } => {
            let agent = build_agent(&config, cli.fixture).await?;
            run_ask(&agent, &session, &message, filters.to_filters(), json).await
        }
        Command::Repl { filters } => {
            let agent = build_agent(&config, cli.fixture).await?;
            run_repl(&agent, filters.to_filters()).await
        }
        Command::Templates => list_templates(),
        Command::Tools => list_tools(),
    }
}

/// Wire the store, executor, tools and reasoning engine together.
pub async fn build_agent(config: &Config, fixture: bool) -> anyhow::Result<Agent> {
    let store: Arc<dyn DataStore> = if fixture {
        tracing::info!("Using the built-in demo dataset");
        Arc::new(FixtureStore::demo())
    } else {
        Arc::new(PgStore::connect(&config.database).await?)
    };

    let executor = Arc::new(
        QueryExecutor::new(Arc::new(builtin_registry()?), store)
            .with_timeout(config.database.query_timeout),
    );

    let mut tools = ToolRegistry::new();
    register_builtin(&mut tools, Arc::clone(&executor))?;

    let engine = create_reasoning_engine(&config.llm)?;

    Ok(Agent::new(
        engine,
        Arc::new(tools),
        executor,
        config.agent.clone(),
        config.llm.timeout,
    ))
}

async fn run_ask(
    agent: &Agent,
    session: &str,
    message: &str,
    filters: Option<Filters>,
    json: bool,
) -> anyhow::Result<()> {
    let response = agent
        .handle(session, message, filters)
        .await
        .map_err(service_error)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

/// Log the full failure and hand back only the generic text, which is what
/// the process prints on exit.
fn service_error(err: AgentError) -> anyhow::Error {
    tracing::error!(error = %err, "Question failed");
    anyhow::anyhow!(err.user_message())
}

async fn run_repl(agent: &Agent, filters: Option<Filters>) -> anyhow::Result<()> {
    use rustyline::DefaultEditor;
    use rustyline::error::ReadlineError;

    let session = format!("repl-{}", uuid::Uuid::new_v4());
    let mut rl = DefaultEditor::new().map_err(|e| anyhow::anyhow!("failed to start line editor: {e}"))?;

    println!("Ask about campaigns, channels, segments or KPIs. Ctrl-C cancels a question, Ctrl-D exits.");

    loop {
        let line = match tokio::task::block_in_place(|| rl.readline("analyst> ")) {
            Ok(line) => line,
            Err(ReadlineError::Eof) => break,
            Err(ReadlineError::Interrupted) => continue,
            Err(e) => return Err(anyhow::anyhow!("readline error: {e}")),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        rl.add_history_entry(line)
            .map_err(|e| anyhow::anyhow!("failed to record history: {e}"))?;

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        match agent
            .handle_with_cancel(&session, line, filters.clone(), &cancel)
            .await
        {
            Ok(response) => print_response(&response),
            Err(e) => eprintln!("{}", e.user_message()),
        }
        watcher.abort();
    }

    Ok(())
}

fn print_response(response: &AgentResponse) {
    println!("{}", response.answer);

    if let Some(chart) = &response.chart {
        println!();
        println!(
            "Chart: {} \"{}\" ({} points, {} series)",
            chart.kind,
            chart.title,
            chart.data_points,
            chart.series.len()
        );
    }

    for table in &response.tables {
        println!();
        println!("{} ({} rows)", table.template, table.row_count());
        println!("  {}", table.columns.join(" | "));
        for row in table.to_table() {
            let cells: Vec<String> = row.iter().map(format_cell).collect();
            println!("  {}", cells.join(" | "));
        }
    }

    let steps: Vec<String> = response
        .trace
        .iter()
        .map(|s| match (&s.tool, s.success) {
            (Some(tool), Some(true)) => tool.clone(),
            (Some(tool), _) => format!("{} (failed)", tool),
            (None, _) => s.action.clone(),
        })
        .collect();
    println!();
    println!("Steps: {}", steps.join(" -> "));
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Float(f) => format!("{:.2}", f),
        other => other.to_string(),
    }
}

fn list_templates() -> anyhow::Result<()> {
    let registry = builtin_registry()?;
    for info in registry.describe() {
        println!("{}", info.id);
        println!("  {}", info.description);
        for param in &info.params {
            let required = if param.required { "required" } else { "optional" };
            println!("    {} ({}): {}", param.name, required, param.description);
        }
    }
    Ok(())
}

fn list_tools() -> anyhow::Result<()> {
    // Listing never runs a query, so an empty store is enough.
    let executor = Arc::new(QueryExecutor::new(
        Arc::new(builtin_registry()?),
        Arc::new(FixtureStore::new()),
    ));
    let mut tools = ToolRegistry::new();
    register_builtin(&mut tools, executor)?;

    for schema in tools.schemas() {
        println!("{}", schema.name);
        println!("  {}", schema.description);
        println!("  {}", serde_json::to_string(&schema.parameters)?);
    }
    Ok(())
}
