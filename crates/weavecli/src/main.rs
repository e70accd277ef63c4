use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use weavecore::{
    ExecutionEvent, ExecutionOptions, ExecutionRecord, ExecutionStatus, NodeEvent, NodeSpec,
    NodeStatus, Value, Workflow,
};
use weaveruntime::{NodeRegistry, RuntimeConfig, WeaveRuntime};

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Workflow engine CLI", long_about = None)]
struct Cli {
    /// Runtime configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Run timeout in milliseconds (0 disables it)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Retry ceiling for nodes using the standard policy
        #[arg(long)]
        max_retries: Option<u32>,

        /// Keep running and report success when nodes fail
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Run {
            file,
            input,
            timeout_ms,
            max_retries,
            continue_on_error,
        } => {
            let options = ExecutionOptions {
                timeout_ms,
                max_retries,
                continue_on_error: continue_on_error.then_some(true),
                ..Default::default()
            };
            run_workflow(config, &file, input, options).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(config, &file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn runtime(config: RuntimeConfig) -> WeaveRuntime {
    let mut registry = NodeRegistry::new();
    weavenodes::register_all(&mut registry);
    WeaveRuntime::with_config(registry, config)
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json =
        std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&workflow_json).with_context(|| format!("{} is not a valid workflow", file.display()))
}

async fn run_workflow(
    config: RuntimeConfig,
    file: &Path,
    input: Option<String>,
    options: ExecutionOptions,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let workflow = load_workflow(file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let trigger: Value = match input {
        Some(input_str) => serde_json::from_str(&input_str).context("input must be valid JSON")?,
        None => Value::Null,
    };

    let runtime = runtime(config);
    let mut events = runtime.subscribe_events();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let finished = matches!(event, ExecutionEvent::ExecutionFinished { .. });
            print_event(event);
            if finished {
                break;
            }
        }
    });

    let execution_id = runtime.start_execution(workflow, options, trigger).await?;
    let record = runtime.wait_for_completion(execution_id).await?;

    // Let the listener drain what is already buffered
    let _ = tokio::time::timeout(tokio::time::Duration::from_millis(100), event_task).await;

    print_summary(&record);
    if record.status != ExecutionStatus::Completed {
        bail!(
            "execution {} ended as {:?}{}",
            record.id,
            record.status,
            record.error_message.map(|m| format!(": {}", m)).unwrap_or_default()
        );
    }
    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::ExecutionQueued { position, .. } => {
            println!("⏳ Queued (position {})", position);
        }
        ExecutionEvent::ExecutionStarted { .. } => {
            println!("▶️  Workflow started");
        }
        ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeRetrying {
            node_id,
            attempt,
            delay_ms,
            error,
            ..
        } => {
            println!("  🔁 Node {} retry {} in {}ms: {}", node_id, attempt, delay_ms, error);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeSkipped { node_id, reason, .. } => {
            println!("  ⏭️  Node {} skipped: {}", node_id, reason);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", node_id, percent);
                }
            }
        },
        ExecutionEvent::ExecutionFinished { status, duration_ms, .. } => match status {
            ExecutionStatus::Completed => println!("✨ Workflow completed successfully in {}ms", duration_ms),
            other => println!("💥 Workflow ended as {:?} after {}ms", other, duration_ms),
        },
    }
}

fn print_summary(record: &ExecutionRecord) {
    let metrics = &record.metrics;
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {} (#{})", record.id, record.execution_number);
    println!("   Status: {:?}", record.status);
    println!(
        "   Nodes: {}/{} succeeded, {} failed, {} skipped",
        metrics.completed_nodes, metrics.total_nodes, metrics.failed_nodes, metrics.skipped_nodes
    );

    let retried: Vec<_> = record.nodes.iter().filter(|n| n.retry_count > 0).collect();
    for node in retried {
        println!("   Node {} needed {} retries", node.node_id, node.retry_count);
    }
    for node in record.nodes.iter().filter(|n| n.status == NodeStatus::Failed) {
        println!("   Node {} error: {}", node.node_id, node.error.as_deref().unwrap_or("unknown"));
    }

    if let Some(result) = &record.result {
        println!();
        println!("📤 Result:");
        match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", result),
        }
    }
}

fn validate_workflow(config: RuntimeConfig, file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let result = runtime(config).validate(&workflow);

    for warning in &result.warnings {
        println!("   ⚠️  [{}] {}", warning.code.as_str(), warning.message);
    }
    for error in &result.errors {
        println!("   ❌ [{}] {}", error.code.as_str(), error.message);
    }
    if !result.valid {
        bail!("workflow {} has {} error(s)", workflow.name, result.errors.len());
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");

    let mut registry = NodeRegistry::new();
    weavenodes::register_all(&mut registry);

    for (category, definitions) in registry.by_category() {
        println!();
        println!("  [{}]", category);
        for definition in definitions {
            println!("  • {} ({:?} retries)", definition.node_type, definition.retry_class);
            println!("    {}", definition.description);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Example Order Workflow");
    workflow.description = Some("Totals an order and logs whether it needs review".to_string());

    workflow.add_node(NodeSpec::new("trigger", "trigger.manual").with_name("Order"));
    workflow.add_node(
        NodeSpec::new("total", "math.add")
            .with_name("Total")
            .with_data("operands", json!(["{{Order.subtotal}}", "{{Order.shipping}}"]))
            .with_data("transformOutput", json!({"amount": "{{$output}}"})),
    );
    workflow.add_node(
        NodeSpec::new("check", "logic.condition")
            .with_name("Large Order")
            .with_data("left", "{{Total.amount}}")
            .with_data("operator", ">")
            .with_data("right", 100),
    );
    workflow.add_node(
        NodeSpec::new("review", "debug.log")
            .with_name("Needs Review")
            .with_data("message", "Order total {{Total.amount}} needs review"),
    );
    workflow.add_node(
        NodeSpec::new("auto", "debug.log")
            .with_name("Auto Approve")
            .with_data("message", "Order total {{Total.amount}} approved"),
    );

    workflow.connect("trigger", "total");
    workflow.connect("total", "check");
    workflow.connect_handle("check", "true", "review");
    workflow.connect_handle("check", "false", "auto");

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  weave run --file {} --input '{{\"subtotal\": 120, \"shipping\": 5}}'",
        output.display()
    );

    Ok(())
}
