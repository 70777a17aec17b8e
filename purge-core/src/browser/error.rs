use std::time::Duration;

use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {}ms waiting for {what}", elapsed.as_millis())]
    Timeout { what: String, elapsed: Duration },
    #[error("no more selectable items after {}ms", waited.as_millis())]
    Exhausted { waited: Duration },
    #[error("{0}")]
    Resolution(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("page script failed: {0}")]
    Script(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    /// Reinterprets a timeout as the list having run out of items. Any other
    /// error is returned unchanged.
    pub fn into_exhaustion(self) -> Self {
        match self {
            BrowserError::Timeout { elapsed, .. } => BrowserError::Exhausted { waited: elapsed },
            other => other,
        }
    }

    pub fn is_exhaustion(&self) -> bool {
        matches!(self, BrowserError::Exhausted { .. })
    }
}
