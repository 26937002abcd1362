//! Command-line interface for the fedidir binary.
//!
//! The CLI exposes subcommands for running one full directory sweep and for
//! probing a single instance when diagnosing an operator report.

use std::{io, path::PathBuf, process, sync::Arc};

use clap::{ArgAction, Args, Parser, Subcommand};
use fedidir::{
    ApiMode, Error, ProbeOutcome, ProbeSettings, SweepOrchestrator, SweepReport, YamlRegistry,
    build_client, load_config, probe,
};
use tracing_subscriber::EnvFilter;

/// Command line interface for the instance directory sweep engine.
#[derive(Debug, Parser)]
#[command(name = "fedidir", version, about = "Sweep and refresh a directory of federated instances")]
struct Cli {
    #[command(subcommand)]
    command: Command
}

#[derive(Debug, Subcommand)]
/// Supported commands exposed by the CLI.
enum Command {
    /// Run one full sweep over all non-banned instances.
    Sweep(SweepArgs),
    /// Probe a single instance and print the normalized snapshot.
    Probe(ProbeArgs)
}

#[derive(Debug, Args)]
/// Arguments accepted by the `sweep` subcommand.
struct SweepArgs {
    /// Path to the YAML configuration file describing the sweep deployment.
    #[arg(long = "config", value_name = "PATH")]
    config: PathBuf,

    /// Output formatted JSON for easier inspection.
    #[arg(long = "pretty", action = ArgAction::SetTrue)]
    pretty: bool
}

#[derive(Debug, Args)]
/// Arguments accepted by the `probe` subcommand.
struct ProbeArgs {
    /// Host identifier of the instance to probe.
    #[arg(long = "host", value_name = "HOST")]
    host: String,

    /// API dialect spoken by the instance.
    #[arg(long = "mode", value_name = "MODE")]
    mode: ApiMode,

    /// Bound on the probe request, in seconds.
    #[arg(long = "timeout-secs", value_name = "SECS", default_value_t = 10)]
    timeout_secs: u64,

    /// Output formatted JSON for easier inspection.
    #[arg(long = "pretty", action = ArgAction::SetTrue)]
    pretty: bool
}

/// Entry point that reports errors and sets the appropriate exit status.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(error) = run().await {
        eprintln!("{}", error.to_display_string());
        process::exit(1);
    }
}

/// Executes the CLI using parsed arguments.
///
/// # Errors
///
/// Propagates errors originating from configuration loading, the sweep and
/// serialization.
async fn run() -> Result<(), Error> {
    let cli = Cli::parse();

    match cli.command {
        Command::Sweep(args) => run_sweep(args).await,
        Command::Probe(args) => run_probe(args).await
    }
}

async fn run_sweep(args: SweepArgs) -> Result<(), Error> {
    let config = load_config(&args.config)?;
    let store = Arc::new(YamlRegistry::new(config.registry.clone()));
    let orchestrator = SweepOrchestrator::from_config(store, &config)?;

    let report = orchestrator.sweep().await?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_report(&mut handle, &report, args.pretty)
}

fn write_report<W: io::Write>(
    writer: &mut W,
    report: &SweepReport,
    pretty: bool
) -> Result<(), Error> {
    if pretty {
        serde_json::to_writer_pretty(writer, report)?;
    } else {
        serde_json::to_writer(writer, report)?;
    }

    Ok(())
}

async fn run_probe(args: ProbeArgs) -> Result<(), Error> {
    let settings = ProbeSettings {
        timeout_secs: args.timeout_secs,
        ..ProbeSettings::default()
    };
    let client = build_client(&settings)?;

    let outcome = probe(&client, &args.host, args.mode).await;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_probe_outcome(&mut handle, &args.host, &outcome, args.pretty)
}

fn write_probe_outcome<W: io::Write>(
    writer: &mut W,
    host: &str,
    outcome: &ProbeOutcome,
    pretty: bool
) -> Result<(), Error> {
    let value = match outcome {
        ProbeOutcome::Online(snapshot) => {
            serde_json::json!({"host": host, "online": true, "snapshot": snapshot})
        }
        ProbeOutcome::Unreachable {
            reason
        } => serde_json::json!({"host": host, "online": false, "reason": reason})
    };

    if pretty {
        serde_json::to_writer_pretty(writer, &value)?;
    } else {
        serde_json::to_writer(writer, &value)?;
    }

    Ok(())
}
