use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use pricerun_config::{NodeKind, WorkflowDef};
use pricerun_connector::{
  ConnectorInvoker, HandlerError, HandlerRegistry, Invocation, NodeHandler,
  StaticCredentialResolver,
};
use pricerun_engine::{ExecutionEngine, RunStatus};
use pricerun_workflow::Workflow;

/// Pricerun - investigation and remediation workflows for pricing operations
#[derive(Parser)]
#[command(name = "pricerun")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a workflow file and print its execution order
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Execute a workflow with dry-run connectors
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Trigger payload as inline JSON; read from stdin when omitted
    #[arg(long)]
    input: Option<String>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let cli = Cli::parse();
  match cli.command {
    Commands::Validate { workflow_file } => validate(workflow_file),
    Commands::Run {
      workflow_file,
      input,
    } => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(workflow_file, input))
    }
  }
}

fn load_workflow(workflow_file: &PathBuf) -> Result<Workflow> {
  let content = std::fs::read_to_string(workflow_file)
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  let def: WorkflowDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;
  Workflow::validate(def).context("workflow failed validation")
}

fn validate(workflow_file: PathBuf) -> Result<()> {
  let workflow = load_workflow(&workflow_file)?;

  println!("workflow:  {} ({})", workflow.name, workflow.workflow_id);
  println!("nodes:     {}", workflow.nodes().len());
  println!("trigger:   {}", workflow.trigger_id());
  println!("order:     {}", workflow.topological_order().join(" -> "));

  Ok(())
}

async fn run(workflow_file: PathBuf, input: Option<String>) -> Result<()> {
  let workflow = Arc::new(load_workflow(&workflow_file)?);
  let payload = match input {
    Some(raw) => serde_json::from_str(&raw).context("failed to parse --input JSON")?,
    None => read_payload_from_stdin()?,
  };

  let invoker = ConnectorInvoker::new(
    dry_run_registry(),
    Arc::new(StaticCredentialResolver::new()),
  );
  let engine = ExecutionEngine::new(invoker);

  let report = engine
    .execute(workflow, payload, CancellationToken::new())
    .await
    .context("workflow execution aborted")?;

  let outputs: serde_json::Map<String, serde_json::Value> = report
    .context
    .results()
    .iter()
    .map(|(id, r)| (id.clone(), r.output.clone()))
    .collect();
  println!("{}", serde_json::to_string_pretty(&outputs)?);

  match report.status {
    RunStatus::Completed => Ok(()),
    status => anyhow::bail!("run {} finished as {:?}", report.run_id, status),
  }
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}

/// Echoes each node's resolved config back as its output, so `run`
/// exercises resolution, routing and branching without touching any
/// external system.
struct DryRunHandler;

#[async_trait]
impl NodeHandler for DryRunHandler {
  async fn invoke(&self, invocation: Invocation) -> Result<serde_json::Value, HandlerError> {
    tracing::info!(
      node_id = %invocation.node_id,
      kind = %invocation.kind,
      "dry-run connector invoked"
    );
    Ok(serde_json::Value::Object(invocation.config))
  }
}

fn dry_run_registry() -> HandlerRegistry {
  use NodeKind::*;

  let handler: Arc<dyn NodeHandler> = Arc::new(DryRunHandler);
  let mut registry = HandlerRegistry::new();
  for kind in [
    OracleQuery,
    UnixCommand,
    LlmAnalysis,
    McpServer,
    ToolHttp,
    ToolTransform,
    ToolScript,
    ToolValidator,
    OutputEmail,
    OutputChat,
    OutputServicenow,
    OutputSms,
    OutputAlert,
    OutputReport,
    OutputPrint,
    OutputArchive,
  ] {
    registry.register(kind, handler.clone());
  }
  registry
}
