pub mod commands;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use purge_core::{load_purge_config, EngineStatus, PurgeConfig, SelectorDef};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use commands::completions::CompletionsArgs;
use commands::run::RunArgs;

pub type Result<T> = std::result::Result<T, AppError>;

/// Used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "configs/purge.toml";
/// Environment variable holding the log filter when `--log-level` is absent.
pub const LOG_ENV: &str = "PURGE_LOG";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] purge_core::ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] purge_core::BrowserError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid log filter: {0}")]
    LogFilter(String),
    #[error("run ended with an error: {0}")]
    RunFailed(String),
}

#[derive(Parser, Debug)]
#[command(
    name = "purgectl",
    author,
    version,
    about = "Bulk removal of items from an infinite-scroll web list",
    long_about = None
)]
pub struct Cli {
    /// Path to purge.toml (defaults to configs/purge.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    /// Log filter such as `info` or `purge_core=debug`; overrides PURGE_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Select and remove items until the count is reached or the list ends
    Run(RunArgs),
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions(CompletionsArgs),
}

pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Completions(args) => {
            args.write(&mut io::stdout());
        }
        Commands::Config => {
            init_logging(cli.log_level.as_deref())?;
            let config = load_config(cli.config.as_deref())?;
            render(&config, cli.format)?;
        }
        Commands::Run(args) => {
            init_logging(cli.log_level.as_deref())?;
            let config = args.apply(load_config(cli.config.as_deref())?)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let outcome = runtime.block_on(commands::run::execute(config, args));
            // stdin reads park a blocking thread that never sees EOF on a tty
            runtime.shutdown_timeout(Duration::from_millis(200));
            let report = outcome?;
            render(&report, cli.format)?;
            if report.status == EngineStatus::Error {
                return Err(AppError::RunFailed(
                    report.error.unwrap_or_else(|| "unknown failure".to_string()),
                ));
            }
        }
    }
    Ok(())
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => {
            EnvFilter::try_new(level).map_err(|err| AppError::LogFilter(err.to_string()))?
        }
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // A subscriber may already be installed when embedded; keep the existing one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
    Ok(())
}

/// Reads `path`, else [`DEFAULT_CONFIG_PATH`] when it exists, else the
/// built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<PurgeConfig> {
    match path {
        Some(path) => Ok(load_purge_config(path)?),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Ok(load_purge_config(DEFAULT_CONFIG_PATH)?)
        }
        None => {
            let config = PurgeConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

pub(crate) fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for PurgeConfig {
    fn display(&self) -> String {
        let engine = &self.engine;
        let retry = &self.retry;
        let chromium = &self.chromium;
        let mut lines = vec![
            "Engine:".to_string(),
            format!("  max_count: {}", engine.max_count),
            format!("  timeout_ms: {}", engine.timeout_ms),
            format!("  poll_delay_ms: {}", engine.poll_delay_ms),
            format!("  dry_run: {}", engine.dry_run),
            "Retry:".to_string(),
            format!(
                "  {} retries, {}ms to {}ms, factor {}",
                retry.max_retries, retry.base_delay_ms, retry.max_delay_ms, retry.factor
            ),
            "Chromium:".to_string(),
            format!("  target_url: {}", chromium.target_url),
            format!("  headless: {}", chromium.headless),
            format!(
                "  window: {}x{}",
                chromium.window_width, chromium.window_height
            ),
            format!(
                "  user_data_dir: {}",
                chromium.user_data_dir.as_deref().unwrap_or("-")
            ),
            "Selectors:".to_string(),
        ];
        for def in self.selectors.definitions() {
            lines.push(selector_line(def));
        }
        lines.push(format!(
            "  confirm label: {:?}",
            self.selectors.confirm_label
        ));
        lines.join("\n")
    }
}

fn selector_line(def: &SelectorDef) -> String {
    format!("  {}: {}", def.name, def.identifiers().collect::<Vec<_>>().join(" | "))
}
