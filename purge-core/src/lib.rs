pub mod browser;
pub mod config;
pub mod engine;
pub mod error;

pub use browser::{
    BrowserAutomation, BrowserError, BrowserLauncher, BrowserResult, ChromiumSurface,
    FallbackRegistry, TargetResolver, TargetSurface,
};
pub use config::{
    load_purge_config, ChromiumSection, EngineConfig, EngineOverrides, PurgeConfig, RetrySection,
    SelectorDef, SelectorSet,
};
pub use engine::{
    ActivityLog, EngineEvent, EngineEventKind, EngineMetrics, EngineStatus, EventBus, Progress,
    PurgeEngine,
};
pub use error::{ConfigError, Result};
