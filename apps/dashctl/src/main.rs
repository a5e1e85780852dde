use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use backend_spi::{BackendFixtures, InMemoryBackend};
use clap::{Parser, Subcommand};
use dashboard_engine::DashboardEngine;
use tokio::task::LocalSet;
use tracing::{info, warn};

mod config;
mod script;

use config::load_settings;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "dashctl.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replays a command script against an in-memory backend, printing every event.
    Run {
        script: PathBuf,
        /// JSON file with `dashboards`, `insights` and `attributes` to seed the backend.
        #[arg(long)]
        fixtures: Option<PathBuf>,
        /// Print the final dashboard definition after the script.
        #[arg(long)]
        print_state: bool,
        /// Stop at the first command that does not succeed.
        #[arg(long)]
        fail_fast: bool,
    },
    /// Checks that every command in a script is well formed.
    Validate { script: PathBuf },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli.config)?;
    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run {
            script,
            fixtures,
            print_state,
            fail_fast,
        } => {
            let commands = read_script(&script)?;
            let backend = match fixtures {
                Some(path) => {
                    let raw = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let fixtures: BackendFixtures = serde_json::from_str(&raw)
                        .with_context(|| format!("invalid fixtures in {}", path.display()))?;
                    InMemoryBackend::from_fixtures(fixtures)
                }
                None => InMemoryBackend::new(),
            };
            let engine = DashboardEngine::builder()
                .config(settings.engine_config())
                .backend(Arc::new(backend))
                .build()?;

            LocalSet::new()
                .run_until(replay(&engine, commands, fail_fast))
                .await?;

            if print_state {
                let definition = engine.state().definition();
                println!("{}", serde_json::to_string_pretty(&definition)?);
            }
        }
        Command::Validate { script } => {
            let commands = read_script(&script)?;
            script::validate(&commands)?;
            println!("{} commands ok", commands.len());
        }
    }

    Ok(())
}

fn read_script(path: &Path) -> Result<Vec<serde_json::Value>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    script::parse_script(&raw)
}

async fn replay(
    engine: &DashboardEngine,
    commands: Vec<serde_json::Value>,
    fail_fast: bool,
) -> Result<()> {
    let _printer = engine.subscribe_events(|event| {
        let wire = match event.to_wire() {
            Ok(wire) => wire,
            Err(error) => {
                warn!(%error, event = event.event_type(), "failed to encode event");
                return;
            }
        };
        if let Err(error) = writeln!(io::stdout().lock(), "{wire}") {
            warn!(%error, event = event.event_type(), "failed to print event");
        }
    });

    let total = commands.len();
    let mut failed = 0usize;
    for command in commands {
        let terminal = engine.run_wire(command).await;
        if !terminal.kind.is_success() {
            failed += 1;
            if fail_fast {
                bail!(
                    "command {} ended with {}",
                    terminal.correlation_id,
                    terminal.event_type()
                );
            }
        }
    }
    info!(total, failed, "script finished");
    Ok(())
}
