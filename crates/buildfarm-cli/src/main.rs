//! Buildfarm - build-pipeline orchestrator CLI
//!
//! The `buildfarm` command runs one phase of a CI build in the current
//! checkout. Each phase is invoked separately by the CI platform.
//!
//! ## Commands
//!
//! - `prebuild`: review-app gate, credentials, build engine and addons
//! - `build`: build, tag and publish the image
//! - `postbuild`: run the test command against the built image

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use buildfarm_core::{BuildContext, Settings, SkipGate, Workspace};
use buildfarm_pipeline::{Phase, PhaseReport, Pipeline, Ports};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "buildfarm")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, test and publish container images from CI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Checkout to build
    #[arg(long, global = true, default_value = ".", env = "BUILDFARM_WORKDIR")]
    workdir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Prepare credentials, builder, network and addon containers
    Prebuild,
    /// Build and publish the image
    Build,
    /// Run the test command in a container from the built image
    Postbuild,
}

impl Commands {
    fn phase(self) -> Phase {
        match self {
            Commands::Prebuild => Phase::Prebuild,
            Commands::Build => Phase::Build,
            Commands::Postbuild => Phase::Postbuild,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    buildfarm_core::init_tracing(cli.json, level);

    let settings = Settings::from_env();
    let ports = Ports::from_cli(&cli.workdir);
    let gate = SkipGate::new(Workspace::new(&cli.workdir, &settings), ports.scm.clone());
    let phase = cli.command.phase();

    let result = run_phase(phase, &cli.workdir, settings, ports).await;
    match result {
        Ok(report) => {
            print_report(&report, cli.json)?;
            Ok(())
        }
        Err(e) => {
            // downstream artifact collection expects these files on failure too
            if let Err(finish_err) = gate.finish().await {
                warn!(error = %finish_err, "failed to write build artifacts");
            }
            Err(e)
        }
    }
}

async fn run_phase(
    phase: Phase,
    workdir: &Path,
    settings: Settings,
    ports: Ports,
) -> Result<PhaseReport> {
    let ctx = BuildContext::from_env();
    let pipeline = Pipeline::load(ctx, settings, ports, workdir)
        .await
        .with_context(|| format!("Failed to load manifests from {}", workdir.display()))?;
    pipeline
        .run(phase)
        .await
        .with_context(|| format!("{} failed", phase.as_str()))
}

fn print_report(report: &PhaseReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        info!(
            phase = report.phase.as_str(),
            outcome = ?report.outcome,
            duration_ms = report.duration_ms,
            "done"
        );
    }
    Ok(())
}
