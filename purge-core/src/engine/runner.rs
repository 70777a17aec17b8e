use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::browser::{
    wait_until, BackoffPolicy, BrowserError, BrowserResult, FallbackRegistry, TargetResolver,
    TargetSurface,
};
use crate::config::{EngineConfig, SelectorSet};

use super::activity::ActivityLog;
use super::events::{EngineEvent, EngineEventKind, EventBus, Subscription};
use super::metrics::EngineMetrics;
use super::progress::{EngineStatus, Progress};

/// Pause after clicking so the page can re-render before state is re-read.
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);
/// How long a single scroll step waits for new items to render.
pub const SCROLL_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ControlState {
    paused: bool,
    stopped: bool,
}

#[derive(Debug, Default)]
struct RunState {
    progress: Progress,
    /// Status to restore on resume; transitions made while paused land here.
    resume_status: Option<EngineStatus>,
}

struct Batch<N> {
    selected: u64,
    last: Option<N>,
}

/// Selects, scrolls and removes items on a [`TargetSurface`] until the
/// configured count is reached, the list runs out, or the run is stopped.
///
/// `run` takes `&self`, so the engine can be shared (for example behind an
/// `Arc`) with whatever calls [`pause`](Self::pause), [`resume`](Self::resume)
/// and [`stop`](Self::stop). Those calls only flip flags; the running loop
/// observes them between steps.
pub struct PurgeEngine<S: TargetSurface> {
    config: EngineConfig,
    selectors: SelectorSet,
    backoff: BackoffPolicy,
    resolver: TargetResolver<S>,
    state: Mutex<RunState>,
    activity: Mutex<ActivityLog>,
    metrics: Mutex<EngineMetrics>,
    events: EventBus<EngineEvent>,
    control: watch::Sender<ControlState>,
}

impl<S: TargetSurface> PurgeEngine<S> {
    pub fn new(surface: S, config: EngineConfig) -> Self {
        Self::with_registry(surface, config, FallbackRegistry::new())
    }

    pub fn with_registry(surface: S, config: EngineConfig, registry: FallbackRegistry) -> Self {
        let (control, _) = watch::channel(ControlState::default());
        Self {
            config,
            selectors: SelectorSet::default(),
            backoff: BackoffPolicy::default(),
            resolver: TargetResolver::with_registry(surface, registry),
            state: Mutex::new(RunState::default()),
            activity: Mutex::new(ActivityLog::new()),
            metrics: Mutex::new(EngineMetrics::default()),
            events: EventBus::new(),
            control,
        }
    }

    pub fn with_selectors(mut self, selectors: SelectorSet) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Registers `callback` for every progress snapshot, exactly like a
    /// `Progress` event listener.
    pub fn with_progress_callback<F>(self, callback: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.events.on(EngineEventKind::Progress, move |event| {
            if let EngineEvent::Progress(progress) = event {
                callback(progress);
            }
        });
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn selectors(&self) -> &SelectorSet {
        &self.selectors
    }

    pub fn resolver(&self) -> &TargetResolver<S> {
        &self.resolver
    }

    pub fn events(&self) -> &EventBus<EngineEvent> {
        &self.events
    }

    pub fn on<F>(&self, kind: EngineEventKind, listener: F) -> Subscription<EngineEvent>
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, listener)
    }

    pub fn progress(&self) -> Progress {
        self.lock_state().progress.clone()
    }

    pub fn activity(&self) -> ActivityLog {
        self.lock_activity().clone()
    }

    pub fn with_activity<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ActivityLog) -> R,
    {
        f(&self.lock_activity())
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.lock_metrics().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.control.borrow().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.control.borrow().stopped
    }

    pub fn pause(&self) {
        let snapshot = {
            let mut state = self.lock_state();
            if state.progress.status.is_terminal() {
                return;
            }
            let changed = self.control.send_if_modified(|control| {
                if control.paused || control.stopped {
                    return false;
                }
                control.paused = true;
                true
            });
            if !changed {
                return;
            }
            state.resume_status = Some(state.progress.status);
            state.progress.status = EngineStatus::Paused;
            state.progress.clone()
        };
        info!("bulk removal paused");
        self.events.emit(&EngineEvent::Progress(snapshot));
        self.events.emit(&EngineEvent::Paused);
    }

    pub fn resume(&self) {
        let snapshot = {
            let mut state = self.lock_state();
            let changed = self.control.send_if_modified(|control| {
                if !control.paused {
                    return false;
                }
                control.paused = false;
                true
            });
            if !changed {
                return;
            }
            if let Some(status) = state.resume_status.take() {
                state.progress.status = status;
            }
            state.progress.clone()
        };
        info!("bulk removal resumed");
        self.events.emit(&EngineEvent::Progress(snapshot));
        self.events.emit(&EngineEvent::Resumed);
    }

    /// Requests a stop. A paused run is released so it can wind down.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        let mut was_paused = false;
        self.control.send_modify(|control| {
            was_paused = control.paused;
            control.paused = false;
            control.stopped = true;
        });
        if was_paused {
            if let Some(status) = state.resume_status.take() {
                state.progress.status = status;
            }
        }
        drop(state);
        info!("bulk removal stop requested");
    }

    /// Drives one run to completion and returns the final progress.
    pub async fn run(&self) -> Progress {
        let run_id = Uuid::new_v4();
        self.run_inner()
            .instrument(info_span!("purge_run", %run_id))
            .await
    }

    async fn run_inner(&self) -> Progress {
        self.control
            .send_modify(|control| *control = ControlState::default());
        {
            let mut state = self.lock_state();
            *state = RunState::default();
        }
        self.lock_activity().start();
        info!(
            max_count = self.config.max_count,
            dry_run = self.config.dry_run,
            timeout_ms = self.config.timeout_ms,
            "bulk removal started"
        );
        self.transition(EngineStatus::Selecting);

        let mut failure = match self.drive().await {
            Ok(()) => None,
            Err(err) if err.is_exhaustion() => {
                info!(reason = %err, "no more items to select");
                None
            }
            Err(err) => {
                self.record_failure(&err);
                Some(err)
            }
        };

        if let Err(err) = self.finalize().await {
            if failure.is_none() {
                self.record_failure(&err);
                failure = Some(err);
            } else {
                warn!(error = %err, "final flush failed after an earlier error");
            }
        }

        let status = if failure.is_some() {
            EngineStatus::Error
        } else if self.is_stopped() {
            EngineStatus::Idle
        } else {
            EngineStatus::Done
        };
        self.control.send_modify(|control| control.paused = false);
        let snapshot = {
            let mut state = self.lock_state();
            state.progress.status = status;
            state.resume_status = None;
            state.progress.clone()
        };
        self.events.emit(&EngineEvent::Progress(snapshot.clone()));
        if status == EngineStatus::Done {
            self.events.emit(&EngineEvent::Done(snapshot.clone()));
        }
        info!(
            status = %status,
            deleted = snapshot.deleted,
            batches = self.lock_activity().batch_count(),
            "bulk removal finished"
        );
        snapshot
    }

    async fn drive(&self) -> BrowserResult<()> {
        let mut gate = self.control.subscribe();
        while !self.is_stopped() {
            self.wait_while_paused(&mut gate).await;
            if self.is_stopped() {
                break;
            }
            let budget = self.remaining_budget();
            if budget == 0 {
                info!(max_count = self.config.max_count, "max count reached");
                break;
            }

            let batch = self.select_batch(budget).await?;
            match batch.last {
                Some(last) if batch.selected < budget => self.advance(&last).await?,
                _ => {
                    self.finalize().await?;
                    if self.remaining_budget() > 0 {
                        self.transition(EngineStatus::Selecting);
                    }
                }
            }
        }
        Ok(())
    }

    async fn wait_while_paused(&self, gate: &mut watch::Receiver<ControlState>) {
        if !self.is_paused() {
            return;
        }
        debug!("waiting for resume");
        // Only fails once the sender is gone, and `self` owns it.
        gate.wait_for(|control| !control.paused || control.stopped)
            .await
            .ok();
    }

    async fn select_batch(&self, budget: u64) -> BrowserResult<Batch<S::Node>> {
        let resolver = &self.resolver;
        let item = &self.selectors.item;
        let items = wait_until(
            "selectable items",
            || async move {
                let nodes = resolver.query_all(item).await?;
                Ok::<_, BrowserError>((!nodes.is_empty()).then_some(nodes))
            },
            self.config.timeout(),
            self.config.poll_delay(),
        )
        .await
        .map_err(BrowserError::into_exhaustion)?;

        let current = self.selection_count().await?;
        let remaining = usize::try_from(budget.saturating_sub(current)).unwrap_or(usize::MAX);
        let mut batch: Vec<S::Node> = items.into_iter().take(remaining).collect();
        for node in &batch {
            resolver.surface().click(node).await?;
        }
        sleep(SETTLE_DELAY).await;

        let selected = self.selection_count().await?;
        self.lock_state().progress.selected = selected;
        self.lock_metrics().record_batch(batch.len());
        self.emit_progress();
        debug!(clicked = batch.len(), selected, budget, "batch selected");

        Ok(Batch {
            selected,
            last: batch.pop(),
        })
    }

    /// Scrolls the list by the offset of the last selected item and waits
    /// for fresh items to render.
    async fn advance(&self, last: &S::Node) -> BrowserResult<()> {
        self.transition(EngineStatus::Scrolling);
        let resolver = &self.resolver;
        let surface = resolver.surface();
        let container = resolver.require_one(&self.selectors.container).await?;
        let offset = surface.offset_top(last).await?;
        let item = &self.selectors.item;
        let poll_delay = self.config.poll_delay();
        let container = &container;

        wait_until(
            "list to advance",
            || async move {
                surface.scroll_by(container, offset).await?;
                let probe = wait_until(
                    "selectable item after scroll",
                    || async move { resolver.query_one(item).await },
                    SCROLL_PROBE_TIMEOUT,
                    poll_delay,
                )
                .await;
                match probe {
                    Ok(_) => Ok(Some(())),
                    Err(BrowserError::Timeout { .. }) => Ok(None),
                    Err(err) => Err(err),
                }
            },
            self.config.timeout(),
            poll_delay,
        )
        .await
        .map_err(BrowserError::into_exhaustion)?;

        self.lock_metrics().record_scroll();
        debug!(offset, "list advanced");
        self.transition(EngineStatus::Selecting);
        Ok(())
    }

    /// Turns the pending selection into a removal (or, in dry-run mode, a
    /// counted deselection). A no-op when nothing is selected.
    async fn finalize(&self) -> BrowserResult<()> {
        let count = self.selection_count().await?;
        if count == 0 {
            return Ok(());
        }

        if self.config.dry_run {
            info!(count, "dry run, deselecting instead of removing");
            self.commit(count);
            return self.deselect_all().await;
        }

        self.transition(EngineStatus::Deleting);
        info!(count, "removing selected items");
        let resolver = &self.resolver;
        let surface = resolver.surface();
        let timeout = self.config.timeout();
        let poll_delay = self.config.poll_delay();

        let trigger = resolver
            .require_one(&self.selectors.removal_trigger)
            .await?;
        self.backoff
            .run("removal trigger", |_| surface.click(&trigger))
            .await?;
        self.lock_metrics().record_removal_command();

        let label = self.selectors.confirm_label.as_str();
        let confirm = wait_until(
            "removal confirmation",
            || async move { resolver.find_control(label).await },
            timeout,
            poll_delay,
        )
        .await?;
        self.backoff
            .run("removal confirmation", |_| surface.click(&confirm))
            .await?;
        self.lock_metrics().record_confirmation();

        wait_until(
            "selection to clear",
            || async move {
                let cleared = self.selection_count().await? == 0;
                Ok::<_, BrowserError>(cleared.then_some(()))
            },
            timeout,
            poll_delay,
        )
        .await?;
        self.commit(count);

        let container = resolver.require_one(&self.selectors.container).await?;
        surface.scroll_to_top(&container).await?;
        Ok(())
    }

    async fn deselect_all(&self) -> BrowserResult<()> {
        let selected = self
            .resolver
            .query_all(&self.selectors.selected_item)
            .await?;
        for node in &selected {
            self.resolver.surface().click(node).await?;
        }
        self.lock_metrics().record_deselections(selected.len());
        sleep(SETTLE_DELAY).await;
        Ok(())
    }

    fn commit(&self, count: u64) {
        let snapshot = {
            let mut state = self.lock_state();
            state.progress.deleted += count;
            state.progress.selected = 0;
            state.progress.clone()
        };
        self.lock_activity().record(count);
        self.lock_metrics().record_finalized();
        info!(count, total = snapshot.deleted, "batch finalized");
        self.events.emit(&EngineEvent::Progress(snapshot));
        self.events.emit(&EngineEvent::Deleted(count));
    }

    async fn selection_count(&self) -> BrowserResult<u64> {
        let Some(counter) = self.resolver.query_one(&self.selectors.counter).await? else {
            return Ok(0);
        };
        let text = self.resolver.surface().text(&counter).await?;
        Ok(text.as_deref().map(parse_count).unwrap_or(0))
    }

    fn remaining_budget(&self) -> u64 {
        let deleted = self.lock_state().progress.deleted;
        self.config.max_count.saturating_sub(deleted)
    }

    fn transition(&self, status: EngineStatus) {
        {
            let mut state = self.lock_state();
            if self.is_paused() {
                state.resume_status = Some(status);
            } else {
                state.progress.status = status;
            }
        }
        self.emit_progress();
    }

    fn record_failure(&self, err: &BrowserError) {
        error!(error = ?err, "bulk removal failed");
        let message = err.to_string();
        let snapshot = {
            let mut state = self.lock_state();
            state.progress.status = EngineStatus::Error;
            state.progress.error = Some(message.clone());
            state.resume_status = None;
            state.progress.clone()
        };
        self.events.emit(&EngineEvent::Progress(snapshot));
        self.events.emit(&EngineEvent::Error(message));
    }

    fn emit_progress(&self) {
        let snapshot = self.progress();
        self.events.emit(&EngineEvent::Progress(snapshot));
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_activity(&self) -> MutexGuard<'_, ActivityLog> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_metrics(&self) -> MutexGuard<'_, EngineMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reads the leading number of a selection counter such as `"1,204 selected"`.
/// Anything unreadable counts as zero.
pub fn parse_count(text: &str) -> u64 {
    static LEADING_NUMBER: OnceLock<Regex> = OnceLock::new();
    let regex = LEADING_NUMBER
        .get_or_init(|| Regex::new(r"^\s*(\d[\d.,\u{a0}\u{202f}]*)").expect("valid regex"));
    regex
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|number| {
            number
                .as_str()
                .chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
        })
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}
