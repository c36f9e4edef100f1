mod settings;

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flowline_engine::{Engine, TriggerEvent, TriggerType};
use flowline_resolver::{
  FsDefinitionSource, MemoryDefinitionSource, Resolver, StandardResolver, validate,
};
use flowline_store::SqliteStore;
use flowline_task::{Builtins, HandlerRegistry};

use crate::settings::Settings;

/// Flowline - an automation workflow engine
#[derive(Parser)]
#[command(name = "flowline")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.flowline)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate an automation definition file
  Validate {
    /// Path to the automation file (JSON)
    automation_file: PathBuf,
  },

  /// Run an automation once, reading the trigger payload from stdin
  Run {
    /// Path to the automation file (JSON)
    automation_file: PathBuf,

    /// Trigger type recorded on the run
    #[arg(long, default_value = "manual")]
    trigger: TriggerType,

    /// External event id used for dedup
    #[arg(long)]
    event_id: Option<String>,
  },

  /// Inspect recorded runs
  Runs {
    #[command(subcommand)]
    command: RunsCommand,
  },

  /// Resume suspended runs that are due now
  Resume,

  /// Deliver a named event to runs waiting for it, payload from stdin
  Deliver {
    automation_id: String,
    event_name: String,
  },

  /// Cancel a run
  Cancel { run_id: String },
}

#[derive(Subcommand)]
enum RunsCommand {
  /// Most recent runs of an automation
  List {
    automation_id: String,

    #[arg(long, default_value_t = 20)]
    limit: u32,
  },

  /// A run with its per-node results
  Show { run_id: String },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowline=info,warn")),
    )
    .with_writer(io::stderr)
    .with_target(false)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".flowline"),
  };

  let Some(command) = cli.command else {
    println!("flowline - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { dispatch(command, data_dir).await })
}

async fn dispatch(command: Commands, data_dir: PathBuf) -> Result<()> {
  match command {
    Commands::Validate { automation_file } => validate_file(&automation_file).await,
    Commands::Run {
      automation_file,
      trigger,
      event_id,
    } => run_file(&data_dir, &automation_file, trigger, event_id).await,
    Commands::Runs { command } => {
      let engine = open_engine(&data_dir, None).await?;
      match command {
        RunsCommand::List {
          automation_id,
          limit,
        } => {
          let runs = engine.list_runs(&automation_id, limit).await?;
          println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        RunsCommand::Show { run_id } => {
          let run = engine.get_run(&run_id).await?;
          println!("{}", serde_json::to_string_pretty(&run)?);
        }
      }
      Ok(())
    }
    Commands::Resume => {
      let engine = open_engine(&data_dir, None).await?;
      let settled = engine.resume_due(Utc::now()).await?;
      eprintln!("Resumed {} suspended node(s)", settled);
      Ok(())
    }
    Commands::Deliver {
      automation_id,
      event_name,
    } => {
      let payload = read_payload_from_stdin()?;
      let engine = open_engine(&data_dir, None).await?;
      let delivered = engine
        .deliver_event(&automation_id, &event_name, payload)
        .await?;
      eprintln!("Delivered '{}' to {} waiting node(s)", event_name, delivered);
      Ok(())
    }
    Commands::Cancel { run_id } => {
      let engine = open_engine(&data_dir, None).await?;
      engine
        .cancel_run(&run_id)
        .await
        .with_context(|| format!("failed to cancel run {}", run_id))?;
      eprintln!("Cancelled run {}", run_id);
      Ok(())
    }
  }
}

async fn validate_file(automation_file: &Path) -> Result<()> {
  let def = FsDefinitionSource::read_file(automation_file)
    .await
    .with_context(|| format!("failed to load automation: {}", automation_file.display()))?;

  let automation = validate(def).context("automation is invalid")?;

  eprintln!(
    "Automation '{}' is valid: {} nodes, {} connections",
    automation.automation_id,
    automation.nodes.len(),
    automation.connections.len()
  );
  if !automation.unreachable.is_empty() {
    eprintln!(
      "Unreachable from trigger: {}",
      automation.unreachable.join(", ")
    );
  }
  Ok(())
}

async fn run_file(
  data_dir: &Path,
  automation_file: &Path,
  trigger: TriggerType,
  event_id: Option<String>,
) -> Result<()> {
  let def = FsDefinitionSource::read_file(automation_file)
    .await
    .with_context(|| format!("failed to load automation: {}", automation_file.display()))?;
  let automation_id = def.id.clone();
  eprintln!("Loaded automation: {}", automation_id);

  let payload = read_payload_from_stdin()?;

  let source = MemoryDefinitionSource::new();
  source.insert(def);
  let engine = open_engine(data_dir, Some(source)).await?;

  let mut event = TriggerEvent::new(automation_id, trigger, payload);
  if let Some(event_id) = event_id {
    event = event.with_event_id(event_id);
  }

  let run_id = engine.start_run(event).await.context("run failed to start")?;
  let record = engine.get_run(&run_id).await?;

  eprintln!("Run {} is {}", run_id, record.status.as_str());
  println!("{}", serde_json::to_string_pretty(&record)?);
  Ok(())
}

/// Open the store and build an engine. Definitions come from `source` when
/// given, otherwise from the configured definitions directory.
async fn open_engine(data_dir: &Path, source: Option<MemoryDefinitionSource>) -> Result<Engine> {
  let settings = Settings::load(data_dir)?;

  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let database_url = settings.database_url(data_dir);
  let store = SqliteStore::connect(&database_url)
    .await
    .with_context(|| format!("failed to open database: {}", database_url))?;
  store.migrate().await.context("failed to migrate database")?;

  let resolver: Arc<dyn Resolver> = match source {
    Some(source) => Arc::new(StandardResolver::new(source)),
    None => Arc::new(StandardResolver::new(FsDefinitionSource::new(
      settings.definitions_dir(data_dir),
    ))),
  };

  Ok(Engine::new(
    resolver,
    Arc::new(store),
    Arc::new(HandlerRegistry::with_builtins(Builtins::default())),
    settings.engine,
  ))
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
