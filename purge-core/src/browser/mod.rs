mod automation;
mod error;
mod poll;
mod resolver;
mod surface;

pub use automation::{BrowserAutomation, BrowserContext, BrowserLauncher, LaunchOverrides};
pub use error::{BrowserError, BrowserResult};
pub use poll::{wait_until, BackoffPolicy, RetryOutcome};
pub use resolver::{FallbackRegistry, Resolution, TargetResolver};
pub use surface::{ChromiumSurface, TargetSurface};
