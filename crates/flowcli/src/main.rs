// crates/flowcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{FlowGraph, GlobalConfig, RunEvent};
use flowruntime::{resolve_logic, FlowExecutor, LogicRegistry};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to the flow JSON file
        #[arg(short, long)]
        flow: PathBuf,

        /// Path to the global configuration JSON file
        #[arg(short, long)]
        global_config: Option<PathBuf>,

        /// Initial payload as a JSON string
        #[arg(short, long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Path to a JSON file holding the initial payload
        #[arg(long)]
        payload_file: Option<PathBuf>,

        /// Log filter used when RUST_LOG is unset
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Do not print the terminal results
        #[arg(long)]
        no_print_results: bool,

        /// Print the global state after the run
        #[arg(long)]
        print_state: bool,

        /// Write the execution trace to this file
        #[arg(long)]
        trace_out: Option<PathBuf>,

        /// Show node progress as it happens
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file
    Validate {
        /// Path to the flow JSON file
        file: PathBuf,
    },

    /// List available node logic
    Nodes,

    /// Serve process-pool tasks on stdin/stdout
    Worker,

    /// Create an example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            flow,
            global_config,
            payload,
            payload_file,
            log_level,
            no_print_results,
            print_state,
            trace_out,
            verbose,
        } => {
            let level = if verbose { "debug" } else { log_level.as_str() };
            init_logging(level);

            let options = RunOptions {
                print_results: !no_print_results,
                print_state,
                trace_out,
                verbose,
            };
            let payload = load_payload(payload, payload_file)?;
            run_flow(&flow, global_config.as_deref(), payload, options).await?;
        }

        Commands::Validate { file } => {
            init_logging("warn");
            validate_flow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Worker => {
            init_logging("warn");
            tokio::task::spawn_blocking(|| flowruntime::worker::serve(&flownodes::standard_registry()))
                .await??;
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries results and, for workers, the pool
/// protocol.
fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct RunOptions {
    print_results: bool,
    print_state: bool,
    trace_out: Option<PathBuf>,
    verbose: bool,
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn load_payload(payload: Option<String>, payload_file: Option<PathBuf>) -> Result<Value> {
    match (payload, payload_file) {
        (Some(_), Some(_)) => bail!("specify either --payload or --payload-file, not both"),
        (Some(text), None) => serde_json::from_str(&text).context("--payload is not valid JSON"),
        (None, Some(path)) => read_json(&path),
        (None, None) => Ok(Value::Null),
    }
}

fn load_graph(path: &Path) -> Result<FlowGraph> {
    let graph = FlowGraph::from_json(read_json(path)?)
        .with_context(|| format!("invalid flow {}", path.display()))?;
    Ok(graph)
}

async fn run_flow(
    flow: &Path,
    global_config: Option<&Path>,
    payload: Value,
    options: RunOptions,
) -> Result<()> {
    let graph = load_graph(flow)?;
    let config = match global_config {
        Some(path) => GlobalConfig::from_json(read_json(path)?)
            .with_context(|| format!("invalid global config {}", path.display()))?,
        None => GlobalConfig::default(),
    };

    let registry = flownodes::standard_registry();
    let executor = FlowExecutor::new(graph, config, &registry).await?;

    let printer = options.verbose.then(|| {
        let mut events = executor.subscribe_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(missed)) => eprintln!("  … {} events skipped", missed),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let outcome = executor.run(payload).await;
    executor.shutdown().await;
    // Dropping the executor closes the event bus, which ends the printer.
    drop(executor);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let outcome = outcome?;

    if options.print_results {
        let results: Vec<Value> = outcome.results.iter().map(|r| r.to_value()).collect();
        println!("{}", serde_json::to_string_pretty(&results)?);
    }
    if options.print_state {
        println!("{}", serde_json::to_string_pretty(&outcome.state)?);
    }
    if let Some(path) = options.trace_out {
        match &outcome.trace {
            Some(trace) => {
                std::fs::write(&path, serde_json::to_string_pretty(&trace.to_value()?)?)
                    .with_context(|| format!("failed to write trace to {}", path.display()))?;
                tracing::info!(path = %path.display(), events = trace.len(), "trace written");
            }
            None => tracing::warn!("tracing is disabled in the global config; no trace written"),
        }
    }

    Ok(())
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::RunStarted { flow, .. } => {
            eprintln!("▶️  Flow '{}' started", flow);
        }
        RunEvent::NodeStarted {
            node_id,
            predecessor,
            worker,
            ..
        } => match predecessor {
            Some(from) => eprintln!("  ⚡ [{}] {} (from {})", worker, node_id, from),
            None => eprintln!("  ⚡ [{}] {}", worker, node_id),
        },
        RunEvent::NodeFinished {
            node_id,
            status,
            duration_ms,
            successors,
            ..
        } => {
            let mark = match status.as_str() {
                "error" | "timeout" => "❌",
                _ => "✅",
            };
            eprintln!(
                "  {} {} -> {} in {}ms {:?}",
                mark, node_id, status, duration_ms, successors
            );
        }
        RunEvent::RunFinished {
            success,
            results,
            duration_ms,
            ..
        } => {
            if *success {
                eprintln!("✨ Flow completed with {} results in {}ms", results, duration_ms);
            } else {
                eprintln!("💥 Flow aborted after {}ms", duration_ms);
            }
        }
    }
}

fn validate_flow(file: &Path) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let graph = load_graph(file)?;
    let registry = flownodes::standard_registry();
    let unknown = unresolved(&graph, &registry);

    println!("✅ Flow structure is valid:");
    println!("   Name: {}", graph.name());
    println!("   Nodes: {}", graph.len());
    println!("   Start: {}", graph.start().join(", "));

    let unreachable = graph.unreachable_nodes();
    if !unreachable.is_empty() {
        println!("⚠️  Unreachable nodes: {}", unreachable.join(", "));
    }
    if !unknown.is_empty() {
        for problem in &unknown {
            println!("❌ {}", problem);
        }
        bail!("{} node(s) cannot be resolved", unknown.len());
    }

    Ok(())
}

fn unresolved(graph: &FlowGraph, registry: &LogicRegistry) -> Vec<String> {
    graph
        .nodes()
        .filter_map(|node| resolve_logic(node, registry).err())
        .map(|e| e.to_string())
        .collect()
}

fn list_nodes() {
    println!("📦 Available Node Logic:");
    println!();

    let registry = flownodes::standard_registry();
    for key in registry.keys() {
        match registry.metadata(key) {
            Some(metadata) if !metadata.description.is_empty() => {
                println!("  • {} ({})", key, metadata.category);
                println!("    {}", metadata.description);
            }
            _ => println!("  • {}", key),
        }
    }
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let flow = json!({
        "name": "parity-demo",
        "description": "Stores the payload, branches on its parity and reports the shared state",
        "start": ["start"],
        "nodes": [
            {"id": "start", "callable": "demo.starter", "transitions": {"default": ["branch"]}},
            {
                "id": "branch",
                "callable": "demo.branching",
                "transitions": {"even": ["sum"], "odd": ["finish"]}
            },
            {
                "id": "sum",
                "executor": "process",
                "callable": "demo.intensive",
                "timeout": 30,
                "transitions": ["finish"]
            },
            {"id": "finish", "callable": "demo.finalizer"}
        ]
    });

    std::fs::write(&output, serde_json::to_string_pretty(&flow)?)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --flow {} --payload '{{\"number\": 4}}' --print-state",
        output.display()
    );

    Ok(())
}
