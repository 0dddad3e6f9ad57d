/*!
 * Pulsar CLI - configuration management for the control plane
 */

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pulsar::config::{LoggingConfig, PulsarConfig, SinkKind};
use pulsar::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pulsar")]
#[command(version, about = "Fleet control plane for remote host agents", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Where to write the configuration
        #[arg(short, long, default_value = "pulsar.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load, validate and summarise a configuration file
    Validate {
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LoggingConfig {
        verbose: cli.verbose,
        ..Default::default()
    };
    logging::init_logging(&log_config).context("failed to initialise logging")?;

    match cli.command {
        Commands::Init { output, force } => init(output, force),
        Commands::Validate { config } => validate(config),
    }
}

fn init(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }
    PulsarConfig::default()
        .to_file(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(path = %output.display(), "Wrote default configuration");
    println!("Wrote {}", output.display());
    Ok(())
}

fn validate(path: PathBuf) -> Result<()> {
    let config = PulsarConfig::from_file(&path)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    println!("{}: OK", path.display());
    println!(
        "  enrollment:   {}-byte node keys, {} attempts on collision",
        config.enrollment.node_key_bytes, config.enrollment.max_key_attempts
    );
    println!(
        "  campaigns:    lifetime {}s, accelerate {}s, sweep every {}s, retain {}s",
        config.campaigns.max_lifetime_secs,
        config.campaigns.default_accelerate_secs,
        config.campaigns.sweep_interval_secs,
        config.campaigns.retention_secs
    );
    println!(
        "  host refresh: details {}s, labels {}s, new-host accelerate {}s",
        config.host_refresh.detail_interval_secs,
        config.host_refresh.label_interval_secs,
        config.host_refresh.new_host_accelerate_secs
    );
    println!(
        "  log sinks:    status {}, result {} (timeout {}s)",
        describe_sink(&config.log_sinks.status),
        describe_sink(&config.log_sinks.result),
        config.log_sinks.forward_timeout_secs
    );
    Ok(())
}

fn describe_sink(kind: &SinkKind) -> String {
    match kind {
        SinkKind::Filesystem { path } => format!("file {}", path.display()),
        SinkKind::Stdout => "stdout".to_string(),
        SinkKind::Discard => "discard".to_string(),
    }
}
