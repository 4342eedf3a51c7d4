//! # loom
//!
//! Loom binary: runs the headless API server, an interactive chat session
//! against one graph, and a few maintenance commands.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use loom_core::provider::LlmProvider;
use loom_engine::persistence::{export_graph, import_graph, load_graph, save_graph};
use loom_engine::tools::create_default_registry;
use loom_engine::{
    AgentCatalog, Orchestrator, OrchestratorConfig, PredicateRegistry, ResponseCode, TurnReport,
    TurnStatus,
};
use loom_llm::ScriptedProvider;
use loom_settings::{load_settings, resolve_path, LoomSettings};
use loom_store::{Database, GraphRepo};
use loom_telemetry::{init_telemetry, parse_level, LogQuery, SqliteLogSink, TelemetryConfig};

/// Loom task orchestration engine.
#[derive(Parser, Debug)]
#[command(name = "loom", about = "Drive task graphs of cooperating LLM agents")]
struct Cli {
    /// Path to the graph database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON-RPC API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Chat with a graph on stdin. Resumes the graph when `--graph` names a saved one.
    Chat {
        /// Objective for a new graph. Asked for on stdin when omitted.
        objective: Option<String>,
        #[arg(long)]
        graph: Option<String>,
        /// JSON array of canned model replies used instead of the configured provider.
        #[arg(long)]
        scripted: Option<PathBuf>,
    },
    /// List the configured agents.
    Agents,
    /// Show persisted warnings and errors.
    Logs {
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        graph: Option<String>,
        #[arg(long, default_value = "50")]
        limit: u32,
    },
    /// Write a saved graph to a JSON file.
    Export { graph: String, file: PathBuf },
    /// Read a graph from a JSON file into the database.
    Import { file: PathBuf },
}

fn telemetry_config(settings: &LoomSettings) -> TelemetryConfig {
    let log_level = match parse_level(&settings.logging.level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("loom: {e}; using info");
            tracing::Level::INFO
        }
    };
    TelemetryConfig {
        log_level,
        module_levels: Vec::new(),
        json: settings.logging.json,
        persist_warnings: settings.logging.persist_warnings,
        log_db_path: resolve_path(&settings.paths.log_database),
    }
}

fn open_database(cli: &Cli, settings: &LoomSettings) -> Result<Database> {
    let path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| resolve_path(&settings.paths.database));
    Database::open(&path).with_context(|| format!("Failed to open database: {}", path.display()))
}

fn build_orchestrator(
    settings: &LoomSettings,
    provider: Arc<dyn LlmProvider>,
) -> Result<Orchestrator> {
    let tools = Arc::new(create_default_registry());
    let agents_file = settings.paths.agents_file.as_deref().map(resolve_path);
    let catalog = AgentCatalog::load(agents_file.as_deref(), &tools)
        .context("Failed to load agent definitions")?;
    tracing::info!(agents = catalog.len(), tools = tools.count(), "Agents loaded");
    let config = OrchestratorConfig::from_settings(settings);
    Ok(Orchestrator::new(provider, Arc::new(catalog), tools, config)?)
}

fn configured_provider(settings: &LoomSettings) -> Result<Arc<dyn LlmProvider>> {
    loom_llm::from_settings(&settings.llm).context("LLM provider not available")
}

fn scripted_provider(path: &Path) -> Result<Arc<dyn LlmProvider>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let provider = ScriptedProvider::from_json(&raw)
        .with_context(|| format!("{} must be a JSON array of strings", path.display()))?
        .with_fallback(r#"{"user_message": "(script exhausted)", "ask_human": true}"#);
    Ok(Arc::new(provider))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings().context("Failed to load settings")?;
    let telemetry = Arc::new(init_telemetry(telemetry_config(&settings)));

    match &cli.command {
        Command::Serve { host, port } => {
            let db = open_database(&cli, &settings)?;
            let orchestrator = build_orchestrator(&settings, configured_provider(&settings)?)?;
            let mut config = loom_server::ServerConfig::from_settings(&settings.server);
            if let Some(host) = host {
                config.host = host.clone();
            }
            if let Some(port) = port {
                config.port = *port;
            }

            let mut state = loom_server::HandlerState::new(Arc::new(orchestrator), db)
                .with_telemetry(Arc::clone(&telemetry));
            if let Some(path) = settings.paths.agents_file.as_deref() {
                state = state.with_agents_file(resolve_path(path));
            }
            let state = Arc::new(state);
            let shutdown = CancellationToken::new();
            let handle = loom_server::start(config, state, shutdown.clone())
                .await
                .context("Failed to start server")?;
            tracing::info!(port = handle.port, "Loom server ready");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl+c")?;
            tracing::info!("Shutting down");
            shutdown.cancel();
            handle.join().await;
        }
        Command::Chat {
            objective,
            graph,
            scripted,
        } => {
            let provider = match scripted {
                Some(path) => scripted_provider(path)?,
                None => configured_provider(&settings)?,
            };
            let orchestrator = build_orchestrator(&settings, provider)?;
            let repo = GraphRepo::new(open_database(&cli, &settings)?);
            chat(&orchestrator, &repo, objective.as_deref(), graph.as_deref()).await?;
        }
        Command::Agents => {
            let tools = create_default_registry();
            let agents_file = settings.paths.agents_file.as_deref().map(resolve_path);
            let catalog = AgentCatalog::load(agents_file.as_deref(), &tools)?;
            for agent in catalog.list() {
                println!("{:<16} {}", agent.name, agent.description);
                if !agent.tool_names.is_empty() {
                    let tools: Vec<&str> = agent.tool_names.iter().map(String::as_str).collect();
                    println!("{:<16}   tools: {}", "", tools.join(", "));
                }
                if !agent.delegates.is_empty() {
                    println!("{:<16}   delegates: {}", "", agent.delegates.join(", "));
                }
            }
        }
        Command::Logs {
            level,
            graph,
            limit,
        } => {
            let path = resolve_path(&settings.paths.log_database);
            let sink = SqliteLogSink::new(&path)
                .with_context(|| format!("Failed to open log database: {}", path.display()))?;
            let query = LogQuery {
                level: level.clone(),
                graph_id: graph.clone(),
                limit: Some(*limit),
                ..LogQuery::default()
            };
            for record in sink.query(&query)? {
                let scope = match (&record.graph_id, &record.task) {
                    (Some(g), Some(t)) => format!(" [{g}/{t}]"),
                    (Some(g), None) => format!(" [{g}]"),
                    _ => String::new(),
                };
                println!(
                    "{} {:<5} {}{}: {}",
                    record.timestamp, record.level, record.target, scope, record.message
                );
            }
        }
        Command::Export { graph, file } => {
            let repo = GraphRepo::new(open_database(&cli, &settings)?);
            let graph = load_graph(&repo, graph, PredicateRegistry::new())?;
            export_graph(&graph, file)?;
            println!("Exported {} to {}", graph.name(), file.display());
        }
        Command::Import { file } => {
            let repo = GraphRepo::new(open_database(&cli, &settings)?);
            let graph = import_graph(file, PredicateRegistry::new())?;
            if repo.exists(graph.name())? {
                bail!("Graph {} already exists", graph.name());
            }
            save_graph(&repo, &graph)?;
            println!("Imported {}", graph.name());
        }
    }
    Ok(())
}

/// Interactive loop on stdin. `/state`, `/save` and `/quit` are handled
/// locally; anything else goes to the active task.
async fn chat(
    orchestrator: &Orchestrator,
    repo: &GraphRepo,
    objective: Option<&str>,
    name: Option<&str>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let saved = match name {
        Some(name) if repo.exists(name)? => {
            Some(load_graph(repo, name, orchestrator.predicates().clone())?)
        }
        _ => None,
    };
    let mut session = match saved {
        Some(graph) => {
            println!("Resumed {}: {}", graph.name(), graph.objective());
            orchestrator.resume(graph)
        }
        None => {
            let objective = match objective {
                Some(o) => o.to_string(),
                None => {
                    println!("Objective?");
                    match lines.next_line().await? {
                        Some(line) if !line.trim().is_empty() => line.trim().to_string(),
                        _ => bail!("An objective is required to start a graph"),
                    }
                }
            };
            orchestrator.create_session(&objective, name)?
        }
    };
    println!("Graph {} ({})", session.id, session.state.active_task);

    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" => break,
            "/save" => {
                save_graph(repo, &session.graph)?;
                println!("Saved {}", session.id);
                continue;
            }
            "/state" => {
                let state = session.snapshot();
                println!("active: {}", state.active_task);
                println!("pending: {}", state.pending_tasks.join(", "));
                println!("completed: {}", state.completed_tasks.join(", "));
                continue;
            }
            _ => {}
        }

        // Ctrl+C cancels the turn in flight, not the process.
        let cancel = CancellationToken::new();
        session.cancel = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        let result = orchestrator.post_message(&mut session, text).await;
        watcher.abort();

        match result {
            Ok(report) => {
                print_replies(&report);
                if report.code != ResponseCode::Success {
                    println!("({})", report.code);
                }
                if report.status == TurnStatus::Done {
                    println!("All tasks are complete.");
                }
            }
            Err(failure) => {
                print_replies(&failure.report);
                println!("({}) {}", failure.code(), failure.error);
            }
        }
    }

    save_graph(repo, &session.graph)?;
    println!("Saved {}", session.id);
    Ok(())
}

fn print_replies(report: &TurnReport) {
    for reply in &report.replies {
        println!("[{} / {}] {}", reply.task, reply.agent, reply.text);
    }
}
