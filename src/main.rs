use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cairn_activity::ActivityRegistry;
use cairn_activity::builtin::{DelayActivity, PassthroughActivity};
use cairn_config::{TriggerType, WorkflowDefinition};
use cairn_engine::{Engine, EngineConfig, EngineError, ExecutionResult, ResultStatus, Signal};
use cairn_journal::{Journal, SqliteJournal};
use cairn_workflow::validate_with;

/// Node types every trigger kind maps to.
const TRIGGER_TYPES: [&str; 6] = [
  "trigger",
  "manualTrigger",
  "webhookTrigger",
  "scheduleTrigger",
  "pollTrigger",
  "apiTrigger",
];

/// Cairn - a durable workflow engine
#[derive(Parser)]
#[command(name = "cairn")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.cairn)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Engine configuration file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Extra node types to run as passthrough activities
  #[arg(long = "passthrough", global = true, value_delimiter = ',')]
  passthrough: Vec<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a workflow definition without running it
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Run a workflow with the payload read from stdin
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Organization the execution belongs to
    #[arg(long, default_value = "default")]
    org: String,

    /// Trigger type recorded for the execution
    #[arg(long, default_value = "manual")]
    trigger: TriggerType,
  },

  /// Continue an unfinished execution from the journal
  Resume {
    execution_id: String,
  },

  /// Continue every unfinished execution in the journal
  Recover,

  /// Replay the journal of an execution and print its record
  Inspect {
    execution_id: String,
  },

  /// Print the journal of an execution, one event per line
  Events {
    execution_id: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".cairn"),
  };
  let registry = registry(&cli.passthrough);

  let Some(command) = cli.command else {
    println!("cairn - use --help to see available commands");
    return Ok(());
  };

  if let Commands::Validate { workflow_file } = &command {
    return validate_workflow(workflow_file, &registry);
  }

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(execute(command, cli.config, data_dir, registry))
}

async fn execute(
  command: Commands,
  config: Option<PathBuf>,
  data_dir: PathBuf,
  registry: ActivityRegistry,
) -> Result<()> {
  let config = load_config(config.as_deref()).await?;
  let journal = open_journal(&data_dir).await?;
  let engine = Engine::new(journal, registry, config);

  let outcome = match command {
    Commands::Run {
      workflow_file,
      org,
      trigger,
    } => run_workflow(&engine, &workflow_file, &org, trigger).await,
    Commands::Resume { execution_id } => resume_execution(&engine, &execution_id).await,
    Commands::Recover => recover_executions(&engine).await,
    Commands::Inspect { execution_id } => inspect_execution(&engine, &execution_id).await,
    Commands::Events { execution_id } => print_events(&engine, &execution_id).await,
    Commands::Validate { workflow_file } => validate_workflow(&workflow_file, engine.registry()),
  };

  engine.shutdown().await;
  outcome
}

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cairn=info,warn"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(io::stderr)
    .init();
}

fn registry(passthrough: &[String]) -> ActivityRegistry {
  let mut registry = ActivityRegistry::new()
    .with("passthrough", PassthroughActivity)
    .with("noop", PassthroughActivity)
    .with("delay", DelayActivity);
  for node_type in TRIGGER_TYPES.iter().map(|t| t.to_string()).chain(passthrough.iter().cloned()) {
    registry.register(node_type, PassthroughActivity);
  }
  registry
}

async fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
  let Some(path) = path else {
    return Ok(EngineConfig::default());
  };
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

async fn open_journal(data_dir: &Path) -> Result<Arc<dyn Journal>> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  let path = data_dir.join("journal.db");
  let journal = SqliteJournal::connect(&path)
    .await
    .with_context(|| format!("failed to open journal: {}", path.display()))?;
  Ok(Arc::new(journal))
}

fn load_definition(workflow_file: &Path) -> Result<WorkflowDefinition> {
  let content = std::fs::read_to_string(workflow_file)
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))
}

fn validate_workflow(workflow_file: &Path, registry: &ActivityRegistry) -> Result<()> {
  let definition = load_definition(workflow_file)?;
  let report = validate_with(&definition, |node_type| registry.contains(node_type));

  if report.valid {
    eprintln!(
      "Workflow '{}' is valid ({} nodes, {} edges)",
      definition.id,
      definition.nodes.len(),
      definition.edges.len()
    );
    return Ok(());
  }
  for message in report.messages() {
    eprintln!("  - {}", message);
  }
  bail!("workflow '{}' is invalid", definition.id)
}

async fn run_workflow(
  engine: &Engine,
  workflow_file: &Path,
  organization_id: &str,
  trigger: TriggerType,
) -> Result<()> {
  let definition = load_definition(workflow_file)?;
  eprintln!("Loaded workflow: {}", definition.name.as_deref().unwrap_or(&definition.id));

  let payload = read_payload_from_stdin()?;
  eprintln!("Payload: {}", payload);

  let execution_id = match engine.start(definition, payload, organization_id, trigger).await {
    Ok(id) => id,
    Err(EngineError::Validation { errors }) => {
      for message in &errors {
        eprintln!("  - {}", message);
      }
      bail!("workflow rejected with {} error(s)", errors.len());
    }
    Err(e) => return Err(e).context("failed to start workflow"),
  };
  eprintln!("Execution started: {}", execution_id);

  let result = wait_for_result(engine, &execution_id).await?;
  report(result)
}

async fn resume_execution(engine: &Engine, execution_id: &str) -> Result<()> {
  let state = engine
    .resume(execution_id)
    .await
    .with_context(|| format!("failed to resume execution {}", execution_id))?;
  eprintln!(
    "Resumed execution {} ({:?}, {} nodes finished)",
    execution_id,
    state.status,
    state.completed_nodes.len()
  );

  let result = wait_for_result(engine, execution_id).await?;
  report(result)
}

async fn inspect_execution(engine: &Engine, execution_id: &str) -> Result<()> {
  let record = engine.load_record(execution_id).await?;
  println!("{}", serde_json::to_string_pretty(&record)?);
  Ok(())
}

async fn print_events(engine: &Engine, execution_id: &str) -> Result<()> {
  for event in engine.events(execution_id).await? {
    println!("{}", serde_json::to_string(&event)?);
  }
  Ok(())
}

async fn recover_executions(engine: &Engine) -> Result<()> {
  let resumed = engine.recover().await.context("failed to scan journal")?;
  eprintln!("Recovered {} execution(s)", resumed.len());

  let mut failed = 0;
  for execution_id in &resumed {
    let result = wait_for_result(engine, execution_id).await?;
    eprintln!("{}: {:?}", execution_id, result.status);
    if result.status != ResultStatus::Success {
      failed += 1;
    }
  }
  if failed > 0 {
    bail!("{} recovered execution(s) did not succeed", failed);
  }
  Ok(())
}

/// Wait for the result, cancelling the execution on Ctrl-C.
async fn wait_for_result(engine: &Engine, execution_id: &str) -> Result<ExecutionResult> {
  tokio::select! {
    result = engine.await_result(execution_id) => Ok(result?),
    _ = tokio::signal::ctrl_c() => {
      eprintln!("Interrupted, cancelling execution {}", execution_id);
      engine.signal(execution_id, Signal::Cancel).await?;
      Ok(engine.await_result(execution_id).await?)
    }
  }
}

fn report(result: ExecutionResult) -> Result<()> {
  eprintln!("Execution finished: {} ({:?})", result.execution_id, result.status);
  println!("{}", serde_json::to_string_pretty(&result.results)?);

  match (result.status, result.error) {
    (ResultStatus::Success, _) => Ok(()),
    (status, Some(error)) => bail!("execution {:?}: {}", status, error),
    (status, None) => bail!("execution {:?}", status),
  }
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
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
}
