use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use machina_binding::HostStores;
use machina_config::{Event, FlowDef};
use machina_registry::Registry;
use machina_runtime::FlowInstance;

/// Machina - a declarative flow compiler and runtime
#[derive(Parser)]
#[command(name = "machina")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Tracing filter, e.g. "info" or "machina=debug"
  #[arg(long, global = true, default_value = "warn")]
  log: String,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a flow definition and print its validation report
  Validate {
    /// Path to the flow definition (JSON)
    flow_file: PathBuf,
  },

  /// Run a flow, feeding newline-delimited JSON events from stdin
  Run {
    /// Path to the flow definition (JSON)
    flow_file: PathBuf,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_new(&cli.log).context("invalid --log filter")?,
    )
    .with_writer(std::io::stderr)
    .init();

  match cli.command {
    Commands::Validate { flow_file } => validate(flow_file),
    Commands::Run { flow_file } => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(flow_file))
    }
  }
}

fn load_flow(flow_file: &PathBuf) -> Result<FlowDef> {
  let content = std::fs::read_to_string(flow_file)
    .with_context(|| format!("failed to read flow file: {}", flow_file.display()))?;
  FlowDef::from_json(&content)
    .with_context(|| format!("failed to parse flow file: {}", flow_file.display()))
}

fn validate(flow_file: PathBuf) -> Result<()> {
  let def = load_flow(&flow_file)?;
  let registry = Registry::new();
  let report = machina_graph::validate(&def, &registry);

  for error in &report.errors {
    println!("error: {error}");
  }
  for warning in &report.warnings {
    println!("warning: {warning}");
  }
  if report.valid {
    println!("flow '{}' is valid", def.id);
    Ok(())
  } else {
    bail!("flow '{}' failed validation", def.id);
  }
}

async fn run(flow_file: PathBuf) -> Result<()> {
  let def = load_flow(&flow_file)?;
  let registry = Arc::new(Registry::new());

  let compiled = match machina_graph::compile(&def, &registry) {
    Ok(compiled) => Arc::new(compiled),
    Err(errors) => {
      for error in &errors {
        eprintln!("error: {error}");
      }
      bail!("flow '{}' failed to compile", def.id);
    }
  };
  for warning in &compiled.warnings {
    eprintln!("warning: {warning}");
  }

  let handle = FlowInstance::spawn(compiled, registry, HostStores::in_memory());
  let mut snapshots = handle.subscribe();

  eprintln!(
    "running flow '{}'; send events as JSON lines, e.g. {{\"type\":\"NEXT\"}}",
    def.id
  );

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    tokio::select! {
      snapshot = snapshots.recv() => {
        match snapshot {
          Some(snapshot) => {
            println!("{}", serde_json::to_string(&snapshot)?);
            if handle.is_terminated() {
              eprintln!("flow reached a final state");
              break;
            }
          }
          None => break,
        }
      }
      line = lines.next_line() => {
        match line? {
          Some(line) if line.trim().is_empty() => {}
          Some(line) => {
            match serde_json::from_str::<Event>(&line) {
              Ok(event) => {
                if let Err(e) = handle.send(event) {
                  eprintln!("error: {e}");
                  break;
                }
              }
              Err(e) => eprintln!("error: invalid event: {e}"),
            }
          }
          None => break,
        }
      }
    }
  }

  handle.stop();
  Ok(())
}
