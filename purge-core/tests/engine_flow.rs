use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use purge_core::browser::{BackoffPolicy, BrowserError, BrowserResult};
use purge_core::{
    EngineConfig, EngineEventKind, EngineStatus, FallbackRegistry, PurgeEngine, RetrySection,
    SelectorDef, SelectorSet, TargetSurface,
};
use tokio::time::sleep;

const UNCHECKED: &str = ".item:unchecked";
const CHECKED: &str = ".item:checked";

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Counter,
    Item(usize),
    Container,
    Trigger,
    Control(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemState {
    Available,
    Selected,
    Removed,
}

#[derive(Debug)]
struct ListState {
    items: Vec<ItemState>,
    window: usize,
    offset: usize,
    trigger_present: bool,
    trigger_failures: usize,
    confirm_open: bool,
    item_clicks: usize,
    trigger_clicks: usize,
    confirm_clicks: usize,
    scrolls: usize,
    top_resets: usize,
}

impl ListState {
    fn visible(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, state)| **state != ItemState::Removed)
            .map(|(index, _)| index)
            .skip(self.offset)
            .take(self.window)
            .collect()
    }

    fn visible_in(&self, wanted: ItemState) -> Vec<Node> {
        self.visible()
            .into_iter()
            .filter(|index| self.items[*index] == wanted)
            .map(Node::Item)
            .collect()
    }

    fn count(&self, wanted: ItemState) -> usize {
        self.items.iter().filter(|state| **state == wanted).count()
    }
}

/// An infinite-scroll list of checkable items with a selection counter, a
/// removal button and a confirmation dialog.
#[derive(Clone)]
struct FakeList {
    state: Arc<Mutex<ListState>>,
}

impl FakeList {
    fn new(total: usize, window: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ListState {
                items: vec![ItemState::Available; total],
                window,
                offset: 0,
                trigger_present: true,
                trigger_failures: 0,
                confirm_open: false,
                item_clicks: 0,
                trigger_clicks: 0,
                confirm_clicks: 0,
                scrolls: 0,
                top_resets: 0,
            })),
        }
    }

    fn without_trigger(self) -> Self {
        self.state.lock().unwrap().trigger_present = false;
        self
    }

    fn failing_trigger(self, failures: usize) -> Self {
        self.state.lock().unwrap().trigger_failures = failures;
        self
    }

    fn inspect<R>(&self, f: impl FnOnce(&ListState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl TargetSurface for FakeList {
    type Node = Node;

    async fn query_one(&self, identifier: &str) -> BrowserResult<Option<Node>> {
        let state = self.state.lock().unwrap();
        Ok(match identifier {
            "#count" => (state.count(ItemState::Selected) > 0).then_some(Node::Counter),
            "#list" => Some(Node::Container),
            "#trash" => state.trigger_present.then_some(Node::Trigger),
            UNCHECKED => state.visible_in(ItemState::Available).into_iter().next(),
            CHECKED => state.visible_in(ItemState::Selected).into_iter().next(),
            _ => None,
        })
    }

    async fn query_all(&self, identifier: &str) -> BrowserResult<Vec<Node>> {
        let state = self.state.lock().unwrap();
        Ok(match identifier {
            UNCHECKED => state.visible_in(ItemState::Available),
            CHECKED => state.visible_in(ItemState::Selected),
            _ => Vec::new(),
        })
    }

    async fn controls(&self) -> BrowserResult<Vec<Node>> {
        let state = self.state.lock().unwrap();
        if !state.confirm_open {
            return Ok(Vec::new());
        }
        Ok(vec![
            Node::Control("Cancel".into()),
            Node::Control(" Move to trash ".into()),
        ])
    }

    async fn text(&self, node: &Node) -> BrowserResult<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(match node {
            Node::Counter => Some(format!("{} selected", state.count(ItemState::Selected))),
            Node::Control(label) => Some(label.clone()),
            _ => None,
        })
    }

    async fn click(&self, node: &Node) -> BrowserResult<()> {
        let mut state = self.state.lock().unwrap();
        match node {
            Node::Item(index) => {
                state.item_clicks += 1;
                let index = *index;
                state.items[index] = match state.items[index] {
                    ItemState::Available => ItemState::Selected,
                    ItemState::Selected => ItemState::Available,
                    ItemState::Removed => ItemState::Removed,
                };
            }
            Node::Trigger => {
                state.trigger_clicks += 1;
                if state.trigger_failures > 0 {
                    state.trigger_failures -= 1;
                    return Err(BrowserError::Script("element is not clickable".into()));
                }
                state.confirm_open = true;
            }
            Node::Control(label) if label.trim() == "Move to trash" => {
                state.confirm_clicks += 1;
                for item in state.items.iter_mut() {
                    if *item == ItemState::Selected {
                        *item = ItemState::Removed;
                    }
                }
                state.confirm_open = false;
            }
            Node::Control(_) => state.confirm_open = false,
            Node::Counter | Node::Container => {}
        }
        Ok(())
    }

    async fn offset_top(&self, node: &Node) -> BrowserResult<f64> {
        let state = self.state.lock().unwrap();
        let position = match node {
            Node::Item(index) => state.visible().iter().position(|i| i == index).unwrap_or(0),
            _ => 0,
        };
        Ok(position as f64 * 100.0)
    }

    async fn scroll_by(&self, _container: &Node, _delta_y: f64) -> BrowserResult<()> {
        let mut state = self.state.lock().unwrap();
        state.scrolls += 1;
        let remaining = state.count(ItemState::Available) + state.count(ItemState::Selected);
        state.offset = (state.offset + state.window).min(remaining);
        Ok(())
    }

    async fn scroll_to_top(&self, _container: &Node) -> BrowserResult<()> {
        let mut state = self.state.lock().unwrap();
        state.offset = 0;
        state.top_resets += 1;
        Ok(())
    }
}

fn def(name: &str, primary: &str) -> SelectorDef {
    SelectorDef::new(name, primary, Vec::<String>::new())
}

fn selectors() -> SelectorSet {
    SelectorSet {
        counter: def("Counter", "#count"),
        item: def("Item", UNCHECKED),
        selected_item: def("Selected item", CHECKED),
        container: def("List", "#list"),
        removal_trigger: def("Removal trigger", "#trash"),
        confirm_label: "Move to trash".into(),
    }
}

fn config(max_count: u64) -> EngineConfig {
    EngineConfig {
        max_count,
        timeout_ms: 2_000,
        poll_delay_ms: 50,
        dry_run: false,
    }
}

fn fast_backoff(max_retries: u32) -> BackoffPolicy {
    BackoffPolicy::new(RetrySection {
        max_retries,
        base_delay_ms: 10,
        max_delay_ms: 100,
        factor: 2.0,
    })
}

fn engine(list: &FakeList, config: EngineConfig) -> PurgeEngine<FakeList> {
    PurgeEngine::new(list.clone(), config)
        .with_selectors(selectors())
        .with_backoff(fast_backoff(3))
}

fn count_events(engine: &PurgeEngine<FakeList>, kind: EngineEventKind) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    engine.on(kind, move |_| {
        handle.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[tokio::test(start_paused = true)]
async fn removes_exactly_max_count_in_one_batch() {
    let list = FakeList::new(25, 25);
    let engine = engine(&list, config(25));
    let done = count_events(&engine, EngineEventKind::Done);
    let deleted = count_events(&engine, EngineEventKind::Deleted);

    let progress = engine.run().await;

    assert_eq!(progress.status, EngineStatus::Done);
    assert_eq!(progress.deleted, 25);
    assert_eq!(progress.selected, 0);
    assert!(progress.error.is_none());
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
    list.inspect(|state| {
        assert_eq!(state.trigger_clicks, 1);
        assert_eq!(state.confirm_clicks, 1);
        assert_eq!(state.count(ItemState::Removed), 25);
        assert_eq!(state.top_resets, 1);
    });
    assert_eq!(engine.activity().total_deleted(), 25);
}

#[tokio::test(start_paused = true)]
async fn scrolls_until_the_budget_is_selected() {
    let list = FakeList::new(100, 20);
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    let engine = engine(&list, config(50)).with_progress_callback(move |progress| {
        sink.lock().unwrap().push((progress.status, progress.deleted));
    });

    let progress = engine.run().await;

    assert_eq!(progress.status, EngineStatus::Done);
    assert_eq!(progress.deleted, 50);
    list.inspect(|state| {
        assert_eq!(state.scrolls, 2);
        assert_eq!(state.trigger_clicks, 1);
        assert_eq!(state.count(ItemState::Removed), 50);
        assert_eq!(state.count(ItemState::Available), 50);
    });

    let metrics = engine.metrics();
    assert_eq!(metrics.batches_selected, 3);
    assert_eq!(metrics.items_clicked, 50);
    assert_eq!(metrics.scroll_advances, 2);
    assert_eq!(metrics.removal_commands, 1);
    assert_eq!(metrics.confirmations, 1);

    let statuses = statuses.lock().unwrap();
    let seen: Vec<EngineStatus> = statuses.iter().map(|(status, _)| *status).collect();
    assert!(seen.contains(&EngineStatus::Selecting));
    assert!(seen.contains(&EngineStatus::Scrolling));
    assert!(seen.contains(&EngineStatus::Deleting));
    assert_eq!(seen.last(), Some(&EngineStatus::Done));
    assert!(statuses.windows(2).all(|pair| pair[0].1 <= pair[1].1));
}

#[tokio::test(start_paused = true)]
async fn short_list_is_flushed_when_nothing_more_loads() {
    let list = FakeList::new(30, 30);
    let engine = engine(&list, config(50));
    let errors = count_events(&engine, EngineEventKind::Error);

    let progress = engine.run().await;

    assert_eq!(progress.status, EngineStatus::Done);
    assert_eq!(progress.deleted, 30);
    assert!(progress.error.is_none());
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    list.inspect(|state| {
        assert_eq!(state.trigger_clicks, 1);
        assert!(state.scrolls >= 1);
    });
}

#[tokio::test(start_paused = true)]
async fn dry_run_counts_and_deselects_without_removing() {
    let list = FakeList::new(10, 10);
    let engine = engine(
        &list,
        EngineConfig {
            dry_run: true,
            ..config(10)
        },
    );

    let progress = engine.run().await;

    assert_eq!(progress.status, EngineStatus::Done);
    assert_eq!(progress.deleted, 10);
    list.inspect(|state| {
        assert_eq!(state.trigger_clicks, 0);
        assert_eq!(state.confirm_clicks, 0);
        assert_eq!(state.count(ItemState::Available), 10);
        assert_eq!(state.item_clicks, 20);
    });
    assert_eq!(engine.metrics().deselections, 10);
    assert_eq!(engine.metrics().removal_commands, 0);
}

#[tokio::test(start_paused = true)]
async fn missing_removal_trigger_ends_in_error() {
    let list = FakeList::new(10, 10).without_trigger();
    let engine = engine(&list, config(10));
    let errors = count_events(&engine, EngineEventKind::Error);
    let done = count_events(&engine, EngineEventKind::Done);

    let progress = engine.run().await;

    assert_eq!(progress.status, EngineStatus::Error);
    assert_eq!(progress.deleted, 0);
    let message = progress.error.expect("error message");
    assert!(message.contains("Removal trigger not found"), "{message}");
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(done.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn flaky_trigger_is_retried() {
    let list = FakeList::new(10, 10).failing_trigger(2);
    let engine = engine(&list, config(10));

    let progress = engine.run().await;

    assert_eq!(progress.status, EngineStatus::Done);
    assert_eq!(progress.deleted, 10);
    list.inspect(|state| assert_eq!(state.trigger_clicks, 3));
    assert_eq!(engine.metrics().removal_commands, 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_trigger_failure_surfaces_last_error() {
    let list = FakeList::new(10, 10).failing_trigger(usize::MAX);
    let engine = engine(&list, config(10)).with_backoff(fast_backoff(2));

    let progress = engine.run().await;

    assert_eq!(progress.status, EngineStatus::Error);
    assert_eq!(
        progress.error.as_deref(),
        Some("page script failed: element is not clickable")
    );
    assert_eq!(progress.deleted, 0);
}

#[tokio::test(start_paused = true)]
async fn fallback_identifiers_are_recorded_in_the_shared_registry() {
    let list = FakeList::new(10, 10);
    let registry = FallbackRegistry::new();
    let mut selectors = selectors();
    selectors.item = SelectorDef::new("Item", ".tile", [UNCHECKED]);
    let engine = PurgeEngine::with_registry(list.clone(), config(10), registry.clone())
        .with_selectors(selectors)
        .with_backoff(fast_backoff(3));

    let progress = engine.run().await;

    assert_eq!(progress.deleted, 10);
    assert_eq!(registry.len(), 1);
    assert!(registry.contains("Item", UNCHECKED));
}

#[tokio::test(start_paused = true)]
async fn pause_holds_the_run_until_resume_and_stop_ends_it_idle() {
    let list = FakeList::new(5_000, 20);
    let engine = engine(&list, config(5_000));
    let paused = count_events(&engine, EngineEventKind::Paused);
    let resumed = count_events(&engine, EngineEventKind::Resumed);
    let done = count_events(&engine, EngineEventKind::Done);

    let control = async {
        sleep(Duration::from_secs(1)).await;
        engine.pause();
        sleep(Duration::from_secs(5)).await;
        assert!(engine.is_paused());
        assert_eq!(engine.progress().status, EngineStatus::Paused);
        let clicks = list.inspect(|state| state.item_clicks);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(list.inspect(|state| state.item_clicks), clicks);

        engine.resume();
        sleep(Duration::from_secs(1)).await;
        assert!(list.inspect(|state| state.item_clicks) > clicks);
        engine.stop();
    };
    let (progress, ()) = tokio::join!(engine.run(), control);

    assert_eq!(progress.status, EngineStatus::Idle);
    assert!(engine.is_stopped());
    assert!(!engine.is_paused());
    assert!(progress.deleted > 0);
    assert_eq!(paused.load(Ordering::SeqCst), 1);
    assert_eq!(resumed.load(Ordering::SeqCst), 1);
    assert_eq!(done.load(Ordering::SeqCst), 0);
    list.inspect(|state| {
        assert_eq!(state.trigger_clicks, 1);
        assert_eq!(state.count(ItemState::Selected), 0);
        assert_eq!(state.count(ItemState::Removed) as u64, progress.deleted);
    });
}

#[tokio::test(start_paused = true)]
async fn stop_releases_a_paused_run() {
    let list = FakeList::new(5_000, 20);
    let engine = engine(&list, config(5_000));

    let control = async {
        sleep(Duration::from_secs(1)).await;
        engine.pause();
        sleep(Duration::from_secs(10)).await;
        engine.stop();
    };
    let (progress, ()) = tokio::join!(engine.run(), control);

    assert_eq!(progress.status, EngineStatus::Idle);
    assert!(!engine.is_paused());
    assert!(progress.deleted > 0);
}
