use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use varpool_core::config::PoolConfig;

mod repl;
mod session;

use session::Session;

const DEFAULT_TRACE_FILTER: &str =
    "varpool::table=debug,varpool::var=info,varpool::rt=debug,varpool::image=info,varpool::config=warn,varpool::cli=info";

#[derive(Debug, Parser)]
#[command(name = "varpool", author, version, about = "Drive the variable pool from scripts or a REPL", long_about = None)]
struct CliArgs {
    /// TOML file with pool sizes
    #[arg(long, global = true, value_name = "FILE", value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive session (default).
    Repl,
    /// Execute a command script.
    Run {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
}

/// Script, config and image paths may not climb out of the working directory.
fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let path = PathBuf::from(raw);
    if path.components().any(|comp| comp == Component::ParentDir) {
        bail!("'{}' leaves the working directory ('..' is not accepted)", raw);
    }
    Ok(path)
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

/// What `VARPOOL_TRACE` asks for.
#[derive(Debug, PartialEq, Eq)]
enum TraceSetting {
    Off,
    /// `RUST_LOG` if set, else the pool's default targets.
    Default,
    Filter(String),
}

fn trace_setting(raw: &str) -> TraceSetting {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "off" | "no" => TraceSetting::Off,
        "1" | "true" | "on" | "yes" => TraceSetting::Default,
        _ => TraceSetting::Filter(trimmed.to_string()),
    }
}

fn init_tracing(setting: TraceSetting) {
    use tracing_subscriber::EnvFilter;

    let expr = match setting {
        TraceSetting::Off => return,
        TraceSetting::Default => std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_TRACE_FILTER.to_string()),
        TraceSetting::Filter(expr) => expr,
    };
    let filter = EnvFilter::try_new(&expr).unwrap_or_else(|err| {
        eprintln!("ignoring VARPOOL_TRACE filter '{}': {}", expr, err);
        EnvFilter::new(DEFAULT_TRACE_FILTER)
    });
    // A subscriber installed by an embedding process wins.
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

/// File settings first, then `VARPOOL_*` overrides.
fn load_config(path: Option<&Path>) -> anyhow::Result<PoolConfig> {
    let base = match path {
        Some(path) => PoolConfig::load(path)?,
        None => PoolConfig::default(),
    };
    Ok(base.with_env(|key| std::env::var(key).ok()))
}

fn run_script(path: &Path, config: &PoolConfig) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path).with_context(|| format!("Failed to read file '{}'", path.display()))?;
    let mut session = Session::new(config);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    session.run_script(&source, &mut out)?;
    out.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    if let Ok(raw) = std::env::var("VARPOOL_TRACE") {
        init_tracing(trace_setting(&raw));
    }

    let CliArgs { config, command } = CliArgs::parse();
    let config = load_config(config.as_deref())?;

    match command {
        None | Some(Commands::Repl) => repl::run(&config),
        Some(Commands::Run { file }) => run_script(&file, &config),
    }
}
