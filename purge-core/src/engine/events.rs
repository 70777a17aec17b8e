use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::error;

use super::progress::Progress;

/// An event that can be routed by its kind.
pub trait BusEvent {
    type Kind: Copy + Eq + Hash + Debug;

    fn kind(&self) -> Self::Kind;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Progress(Progress),
    Error(String),
    Done(Progress),
    Paused,
    Resumed,
    /// Size of a finalized batch.
    Deleted(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEventKind {
    Progress,
    Error,
    Done,
    Paused,
    Resumed,
    Deleted,
}

impl BusEvent for EngineEvent {
    type Kind = EngineEventKind;

    fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::Progress(_) => EngineEventKind::Progress,
            EngineEvent::Error(_) => EngineEventKind::Error,
            EngineEvent::Done(_) => EngineEventKind::Done,
            EngineEvent::Paused => EngineEventKind::Paused,
            EngineEvent::Resumed => EngineEventKind::Resumed,
            EngineEvent::Deleted(_) => EngineEventKind::Deleted,
        }
    }
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    id: u64,
    once: bool,
    listener: Listener<E>,
}

struct Registry<E: BusEvent> {
    next_id: u64,
    listeners: HashMap<E::Kind, Vec<Entry<E>>>,
}

/// Synchronous publish/subscribe. Listeners run on the emitting task, one at
/// a time; a panicking listener is logged and skipped.
pub struct EventBus<E: BusEvent> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: E::Kind, listener: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(kind, Arc::new(listener), false)
    }

    /// Like [`on`](Self::on) but removed before its first invocation.
    pub fn once<F>(&self, kind: E::Kind, listener: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(kind, Arc::new(listener), true)
    }

    pub fn emit(&self, event: &E) {
        let kind = event.kind();
        let listeners: Vec<Listener<E>> = {
            let mut registry = self.lock();
            let Some(entries) = registry.listeners.get_mut(&kind) else {
                return;
            };
            let snapshot = entries
                .iter()
                .map(|entry| Arc::clone(&entry.listener))
                .collect();
            entries.retain(|entry| !entry.once);
            snapshot
        };
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                error!(
                    event = ?kind,
                    panic = panic_message(panic.as_ref()),
                    "event listener panicked"
                );
            }
        }
    }

    pub fn remove_all_listeners(&self, kind: Option<E::Kind>) {
        let mut registry = self.lock();
        match kind {
            Some(kind) => {
                registry.listeners.remove(&kind);
            }
            None => registry.listeners.clear(),
        }
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    fn insert(&self, kind: E::Kind, listener: Listener<E>, once: bool) -> Subscription<E> {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push(Entry { id, once, listener });
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by [`EventBus::on`]. Dropping it keeps the listener
/// registered; call [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription<E: BusEvent> {
    kind: E::Kind,
    id: u64,
    registry: Weak<Mutex<Registry<E>>>,
}

impl<E: BusEvent> Subscription<E> {
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = registry.listeners.get_mut(&self.kind) {
            entries.retain(|entry| entry.id != self.id);
            if entries.is_empty() {
                registry.listeners.remove(&self.kind);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&EngineEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &EngineEvent| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn emit_reaches_every_listener_of_the_kind() {
        let bus = EventBus::<EngineEvent>::new();
        let (first, listener_a) = counter();
        let (second, listener_b) = counter();
        let (other, listener_c) = counter();
        bus.on(EngineEventKind::Paused, listener_a);
        bus.on(EngineEventKind::Paused, listener_b);
        bus.on(EngineEventKind::Resumed, listener_c);

        bus.emit(&EngineEvent::Paused);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let bus = EventBus::<EngineEvent>::new();
        let (kept, listener_a) = counter();
        let (removed, listener_b) = counter();
        bus.on(EngineEventKind::Deleted, listener_a);
        let subscription = bus.on(EngineEventKind::Deleted, listener_b);
        assert_eq!(bus.listener_count(EngineEventKind::Deleted), 2);

        subscription.unsubscribe();
        bus.emit(&EngineEvent::Deleted(5));

        assert_eq!(bus.listener_count(EngineEventKind::Deleted), 1);
        assert_eq!(kept.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn once_fires_a_single_time() {
        let bus = EventBus::<EngineEvent>::new();
        let (count, listener) = counter();
        bus.once(EngineEventKind::Resumed, listener);

        bus.emit(&EngineEvent::Resumed);
        bus.emit(&EngineEvent::Resumed);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(EngineEventKind::Resumed), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_others() {
        let bus = EventBus::<EngineEvent>::new();
        let (count, listener) = counter();
        bus.on(EngineEventKind::Error, |_| panic!("observer failed"));
        bus.on(EngineEventKind::Error, listener);

        bus.emit(&EngineEvent::Error("boom".into()));
        bus.emit(&EngineEvent::Error("again".into()));

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.listener_count(EngineEventKind::Error), 2);
    }

    #[test]
    fn listeners_may_unsubscribe_while_emitting() {
        let bus = EventBus::<EngineEvent>::new();
        let slot: Arc<Mutex<Option<Subscription<EngineEvent>>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let subscription = bus.on(EngineEventKind::Paused, move |_| {
            if let Some(subscription) = inner.lock().unwrap().take() {
                subscription.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(subscription);

        bus.emit(&EngineEvent::Paused);
        assert_eq!(bus.listener_count(EngineEventKind::Paused), 0);
    }

    #[test]
    fn remove_all_listeners_by_kind_or_entirely() {
        let bus = EventBus::<EngineEvent>::new();
        bus.on(EngineEventKind::Paused, |_| {});
        bus.on(EngineEventKind::Resumed, |_| {});
        bus.on(EngineEventKind::Resumed, |_| {});

        bus.remove_all_listeners(Some(EngineEventKind::Resumed));
        assert_eq!(bus.listener_count(EngineEventKind::Resumed), 0);
        assert_eq!(bus.listener_count(EngineEventKind::Paused), 1);

        bus.remove_all_listeners(None);
        assert_eq!(bus.listener_count(EngineEventKind::Paused), 0);
    }

    #[test]
    fn event_kinds_follow_variants() {
        assert_eq!(EngineEvent::Deleted(3).kind(), EngineEventKind::Deleted);
        assert_eq!(
            EngineEvent::Progress(Progress::default()).kind(),
            EngineEventKind::Progress
        );
    }
}
