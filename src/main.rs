//! charsim - headless sandbox for the impulse character controller

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use std::io::Write;
use std::path::PathBuf;

use impulse_character::config::SandboxConfig;
use impulse_character::sandbox::Sandbox;

#[derive(Parser)]
#[command(name = "charsim")]
#[command(about = "Run scripted character controller scenarios without a window", long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", env = "CHARSIM_LOG")]
    log_level: LevelFilter,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default sandbox configuration
    Init {
        /// Where to write the file
        #[arg(default_value = "sandbox.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Parse and validate a sandbox configuration
    Check {
        /// Path to the configuration file
        #[arg(default_value = "sandbox.toml")]
        config: PathBuf,
    },
    /// Play the scripted input of a sandbox configuration
    Run {
        /// Path to the configuration file (built-in defaults when omitted)
        config: Option<PathBuf>,
        /// Number of frames to run (default: script length)
        #[arg(long)]
        ticks: Option<u32>,
        /// Print one JSON line per frame to stdout
        #[arg(long)]
        trace: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    SimpleLogger::new().with_level(cli.log_level).init()?;

    match cli.command {
        Commands::Init { path, force } => init_config(path, force),
        Commands::Check { config } => check_config(config),
        Commands::Run { config, ticks, trace } => run_sandbox(config, ticks, trace),
    }
}

fn init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let text = SandboxConfig::default().to_toml()?;
    let contents = format!("# charsim sandbox configuration\n\n{}", text);
    std::fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Created {}", path.display());
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = SandboxConfig::from_file(&path)?;
    info!(
        "{} is valid: {} obstacles, {} scripted frames, climb {}",
        path.display(),
        config.obstacles.len(),
        config.script.ticks,
        if config.movement.climb.enabled { "on" } else { "off" }
    );
    Ok(())
}

fn run_sandbox(path: Option<PathBuf>, ticks: Option<u32>, trace: bool) -> Result<()> {
    let config = match &path {
        Some(path) => SandboxConfig::from_file(path)?,
        None => SandboxConfig::default(),
    };

    let mut sandbox = Sandbox::new(config).context("Failed to build sandbox")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut write_error = None;
    let summary = sandbox.run(ticks, |record| {
        if !trace || write_error.is_some() {
            return;
        }
        let line = serde_json::to_string(record).map_err(anyhow::Error::from);
        if let Err(e) = line.and_then(|line| writeln!(out, "{}", line).map_err(anyhow::Error::from)) {
            write_error = Some(e);
        }
    })?;
    if let Some(e) = write_error {
        return Err(e.context("Failed to write trace"));
    }

    writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
    Ok(())
}
