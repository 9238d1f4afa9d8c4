mod engine;
mod evaluator;
mod executor;
mod pool;
mod registry;
mod runner;


use anyhow::{Context, Result};
use clap::Parser;
use crucible_common::types::JobRequest;
use crucible_common::Settings;
use registry::RuntimeRegistry;
use runner::JudgeRunner;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "crucible-worker")]
#[command(about = "Crucible worker - execute one submitted job in the local sandbox", long_about = None)]
struct Cli {
    /// Path to the judge configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a job request JSON file (reads stdin when omitted)
    #[arg(short, long)]
    job: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_or_default(cli.config.as_deref())?;

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Crucible worker booting...");
    info!(
        data_directory = %settings.data_directory.display(),
        disable_networking = settings.disable_networking,
        "Configuration loaded"
    );

    let registry = RuntimeRegistry::scan(&settings.packages_root())?;
    let installed: Vec<String> = registry
        .list()
        .iter()
        .map(|r| format!("{}-{}", r.language, r.version))
        .collect();
    info!("Discovered runtimes: {:?}", installed);

    let raw = match &cli.job {
        Some(path) => std::fs::read_to_string(path)
            .context(format!("Failed to read job file {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read job request from stdin")?;
            buffer
        }
    };

    let request: JobRequest =
        serde_json::from_str(&raw).context("Failed to parse job request")?;

    let runner = JudgeRunner::new(settings, registry);
    let response = runner.submit(request).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
