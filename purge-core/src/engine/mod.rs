mod activity;
mod events;
mod metrics;
mod progress;
mod runner;

pub use activity::{ActivityEntry, ActivityLog, DEFAULT_RATE_WINDOW};
pub use events::{BusEvent, EngineEvent, EngineEventKind, EventBus, Subscription};
pub use metrics::EngineMetrics;
pub use progress::{format_elapsed, format_eta, EngineStatus, Progress};
pub use runner::{parse_count, PurgeEngine, SCROLL_PROBE_TIMEOUT, SETTLE_DELAY};
