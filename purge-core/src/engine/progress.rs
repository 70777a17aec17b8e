use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    Selecting,
    Deleting,
    Scrolling,
    Paused,
    Done,
    Error,
}

impl EngineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineStatus::Idle => "idle",
            EngineStatus::Selecting => "selecting",
            EngineStatus::Deleting => "deleting",
            EngineStatus::Scrolling => "scrolling",
            EngineStatus::Paused => "paused",
            EngineStatus::Done => "done",
            EngineStatus::Error => "error",
        }
    }

    /// Human-facing description for progress displays.
    pub fn label(self) -> &'static str {
        match self {
            EngineStatus::Idle => "Ready",
            EngineStatus::Selecting => "Selecting items…",
            EngineStatus::Deleting => "Deleting batch…",
            EngineStatus::Scrolling => "Loading more…",
            EngineStatus::Paused => "Paused",
            EngineStatus::Done => "Complete",
            EngineStatus::Error => "Error",
        }
    }

    pub fn is_running(self) -> bool {
        match self {
            EngineStatus::Selecting | EngineStatus::Deleting | EngineStatus::Scrolling => true,
            EngineStatus::Idle | EngineStatus::Paused | EngineStatus::Done | EngineStatus::Error => {
                false
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            EngineStatus::Done | EngineStatus::Error => true,
            EngineStatus::Idle
            | EngineStatus::Selecting
            | EngineStatus::Deleting
            | EngineStatus::Scrolling
            | EngineStatus::Paused => false,
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub deleted: u64,
    pub selected: u64,
    pub status: EngineStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            deleted: 0,
            selected: 0,
            status: EngineStatus::Idle,
            started_at: Utc::now(),
            error: None,
        }
    }
}

/// `"1m 30s"`, or `"45s"` under a minute.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let minutes = total / 60;
    let seconds = total % 60;
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Like [`format_elapsed`] but switches to `"2h 5m"` past the hour.
pub fn format_eta(remaining: Duration) -> String {
    let total = remaining.as_secs();
    let hours = total / 3600;
    if hours > 0 {
        format!("{hours}h {}m", (total % 3600) / 60)
    } else {
        format_elapsed(remaining)
    }
}
