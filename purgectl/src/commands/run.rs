use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::Args;
use purge_core::browser::{BackoffPolicy, ChromiumSurface, LaunchOverrides};
use purge_core::engine::{format_elapsed, format_eta, ActivityLog};
use purge_core::{
    BrowserLauncher, EngineEvent, EngineEventKind, EngineMetrics, EngineOverrides, EngineStatus,
    Progress, PurgeConfig, PurgeEngine, TargetSurface,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{DisplayFallback, Result};

/// Runs a bulk removal against the configured page.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Stop once this many items have been removed
    #[arg(long)]
    pub max_count: Option<u64>,
    /// Count and deselect items instead of removing them
    #[arg(long)]
    pub dry_run: bool,
    /// How long to wait for items, controls or a cleared selection
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
    /// Interval between page checks while waiting
    #[arg(long, value_name = "MS")]
    pub poll_delay_ms: Option<u64>,
    /// Page to open instead of chromium.target_url
    #[arg(long)]
    pub url: Option<String>,
    /// Launch Chromium without a window
    #[arg(long)]
    pub headless: bool,
    /// Stop the run after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub max_run_seconds: Option<u64>,
    /// Ignore p/r/s control lines on stdin
    #[arg(long)]
    pub no_input: bool,
}

impl RunArgs {
    /// Layers the flags over the file configuration and re-validates it.
    pub fn apply(&self, mut config: PurgeConfig) -> Result<PurgeConfig> {
        config.engine = config.engine.with_overrides(EngineOverrides {
            max_count: self.max_count,
            timeout_ms: self.timeout_ms,
            poll_delay_ms: self.poll_delay_ms,
            dry_run: self.dry_run.then_some(true),
        });
        if let Some(url) = &self.url {
            config.chromium.target_url = url.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Stop,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "p" | "pause" => Some(ControlCommand::Pause),
            "r" | "resume" => Some(ControlCommand::Resume),
            "s" | "stop" | "q" | "quit" => Some(ControlCommand::Stop),
            _ => None,
        }
    }

    pub fn apply<S: TargetSurface>(self, engine: &PurgeEngine<S>) {
        match self {
            ControlCommand::Pause => engine.pause(),
            ControlCommand::Resume => engine.resume(),
            ControlCommand::Stop => engine.stop(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: EngineStatus,
    pub deleted: u64,
    pub max_count: u64,
    pub dry_run: bool,
    pub elapsed_seconds: u64,
    pub batches: usize,
    pub rate_per_minute: f64,
    pub fallbacks_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: EngineMetrics,
}

impl RunReport {
    pub fn from_engine<S: TargetSurface>(engine: &PurgeEngine<S>, progress: Progress) -> Self {
        let (elapsed, batches, rate) = engine.with_activity(|activity| {
            (
                activity.elapsed(),
                activity.batch_count(),
                activity.rate_per_minute(),
            )
        });
        Self {
            status: progress.status,
            deleted: progress.deleted,
            max_count: engine.config().max_count,
            dry_run: engine.config().dry_run,
            elapsed_seconds: elapsed.as_secs(),
            batches,
            rate_per_minute: rate,
            fallbacks_used: engine.resolver().registry().len(),
            error: progress.error,
            metrics: engine.metrics(),
        }
    }
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        let verb = if self.dry_run { "Counted" } else { "Removed" };
        let mut lines = vec![
            format!("Status: {}", self.status.label()),
            format!(
                "{verb}: {} of {} in {} ({} batches)",
                self.deleted,
                self.max_count,
                format_elapsed(Duration::from_secs(self.elapsed_seconds)),
                self.batches
            ),
            format!("Rate: {:.1}/min", self.rate_per_minute),
        ];
        if self.fallbacks_used > 0 {
            lines.push(format!(
                "Fallback identifiers used: {}",
                self.fallbacks_used
            ));
        }
        if let Some(error) = &self.error {
            lines.push(format!("Error: {error}"));
        }
        lines.join("\n")
    }
}

/// Launches Chromium on the target page and drives a full run on it.
pub async fn execute(config: PurgeConfig, args: &RunArgs) -> Result<RunReport> {
    let launcher = BrowserLauncher::new(config.chromium.clone());
    let automation = launcher
        .launch_with_overrides(LaunchOverrides {
            headless: args.headless.then_some(true),
        })
        .await?;
    let context = match automation.open_target().await {
        Ok(context) => context,
        Err(err) => {
            if let Err(shutdown) = automation.shutdown().await {
                warn!(error = %shutdown, "browser shutdown failed");
            }
            return Err(err.into());
        }
    };
    info!(url = automation.target_url(), "target page opened");

    let engine = PurgeEngine::new(ChromiumSurface::from_context(&context), config.engine)
        .with_selectors(config.selectors)
        .with_backoff(BackoffPolicy::new(config.retry));
    let report = supervise(Arc::new(engine), args).await;

    if let Err(err) = automation.shutdown().await {
        warn!(error = %err, "browser shutdown failed");
    }
    Ok(report)
}

/// Wires progress output, stdin control, Ctrl-C and the run time limit
/// around one engine run.
pub async fn supervise<S>(engine: Arc<PurgeEngine<S>>, args: &RunArgs) -> RunReport
where
    S: TargetSurface + 'static,
{
    attach_progress_printer(&engine);

    let mut tasks = vec![spawn_interrupt_handler(Arc::clone(&engine))];
    if !args.no_input {
        tasks.push(spawn_stdin_control(Arc::clone(&engine)));
    }
    if let Some(seconds) = args.max_run_seconds {
        tasks.push(spawn_deadline(Arc::clone(&engine), seconds));
    }

    let progress = engine.run().await;
    for task in tasks {
        task.abort();
    }
    engine.events().remove_all_listeners(None);
    RunReport::from_engine(&engine, progress)
}

fn attach_progress_printer<S>(engine: &Arc<PurgeEngine<S>>)
where
    S: TargetSurface + 'static,
{
    let weak = Arc::downgrade(engine);
    let max_count = engine.config().max_count;
    let last_printed: Mutex<Option<(EngineStatus, u64)>> = Mutex::new(None);
    engine.on(EngineEventKind::Progress, move |event| {
        let EngineEvent::Progress(progress) = event else {
            return;
        };
        {
            let mut last = last_printed.lock().unwrap_or_else(PoisonError::into_inner);
            let key = (progress.status, progress.deleted);
            if *last == Some(key) {
                return;
            }
            *last = Some(key);
        }
        let Some(engine) = weak.upgrade() else {
            return;
        };
        let line = engine.with_activity(|activity| progress_line(progress, activity, max_count));
        eprintln!("{line}");
    });
}

pub fn progress_line(progress: &Progress, activity: &ActivityLog, max_count: u64) -> String {
    let eta = activity
        .estimate_remaining(max_count)
        .map(format_eta)
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "[{}] {} removed {}/{} selected {} rate {:.1}/min eta {}",
        format_elapsed(activity.elapsed()),
        progress.status.label(),
        progress.deleted,
        max_count,
        progress.selected,
        activity.rate_per_minute(),
        eta
    );
    if let Some(error) = &progress.error {
        line.push_str(&format!(" ({error})"));
    }
    line
}

fn spawn_interrupt_handler<S>(engine: Arc<PurgeEngine<S>>) -> JoinHandle<()>
where
    S: TargetSurface + 'static,
{
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current step");
            engine.stop();
        }
    })
}

fn spawn_stdin_control<S>(engine: Arc<PurgeEngine<S>>) -> JoinHandle<()>
where
    S: TargetSurface + 'static,
{
    eprintln!("Controls: p = pause, r = resume, s = stop");
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match ControlCommand::parse(&line) {
                    Some(command) => command.apply(&engine),
                    None if line.trim().is_empty() => {}
                    None => warn!(input = line.trim(), "unknown control command"),
                },
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "stdin closed");
                    break;
                }
            }
        }
    })
}

fn spawn_deadline<S>(engine: Arc<PurgeEngine<S>>, seconds: u64) -> JoinHandle<()>
where
    S: TargetSurface + 'static,
{
    tokio::spawn(async move {
        sleep(Duration::from_secs(seconds)).await;
        warn!(seconds, "run time limit reached, stopping");
        engine.stop();
    })
}
