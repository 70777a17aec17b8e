use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PurgeConfig {
    pub engine: EngineConfig,
    pub retry: RetrySection,
    pub chromium: ChromiumSection,
    pub selectors: SelectorSet,
}

impl PurgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_count == 0 {
            return Err(invalid("engine.max_count", "must be greater than zero"));
        }
        if self.engine.poll_delay_ms == 0 {
            return Err(invalid("engine.poll_delay_ms", "must be greater than zero"));
        }
        if self.retry.factor.is_nan() || self.retry.factor < 1.0 {
            return Err(invalid(
                "retry.factor",
                format!("must be at least 1.0, got {}", self.retry.factor),
            ));
        }
        let url = Url::parse(&self.chromium.target_url)
            .map_err(|err| invalid("chromium.target_url", err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(
                "chromium.target_url",
                format!("unsupported scheme {}", url.scheme()),
            ));
        }
        for def in self.selectors.definitions() {
            if def.primary.trim().is_empty() {
                return Err(invalid(
                    "selectors",
                    format!("{} has an empty primary identifier", def.name),
                ));
            }
        }
        if self.selectors.confirm_label.trim().is_empty() {
            return Err(invalid("selectors.confirm_label", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Per-run engine settings. Durations are kept in milliseconds so the TOML
/// file and the CLI flags share one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_count: u64,
    pub timeout_ms: u64,
    pub poll_delay_ms: u64,
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_count: 10_000,
            timeout_ms: 600_000,
            poll_delay_ms: 300,
            dry_run: false,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn with_overrides(mut self, overrides: EngineOverrides) -> Self {
        if let Some(max_count) = overrides.max_count {
            self.max_count = max_count;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(poll_delay_ms) = overrides.poll_delay_ms {
            self.poll_delay_ms = poll_delay_ms;
        }
        if let Some(dry_run) = overrides.dry_run {
            self.dry_run = dry_run;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOverrides {
    pub max_count: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub poll_delay_ms: Option<u64>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub user_data_dir: Option<String>,
    pub target_url: String,
    pub window_width: u32,
    pub window_height: u32,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: false,
            sandbox: true,
            user_data_dir: Some("profiles/default".to_string()),
            target_url: "https://photos.google.com/".to_string(),
            window_width: 1366,
            window_height: 900,
            request_timeout_seconds: None,
        }
    }
}

/// A logical UI concept and the identifiers that may locate it, most
/// specific first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorDef {
    pub name: String,
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl SelectorDef {
    pub fn new<I, S>(name: impl Into<String>, primary: impl Into<String>, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            primary: primary.into(),
            fallbacks: fallbacks.into_iter().map(Into::into).collect(),
        }
    }

    /// Primary identifier followed by the fallbacks, in resolution order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    pub counter: SelectorDef,
    pub item: SelectorDef,
    pub selected_item: SelectorDef,
    pub container: SelectorDef,
    pub removal_trigger: SelectorDef,
    /// Visible text of the control that confirms a removal.
    pub confirm_label: String,
}

impl SelectorSet {
    pub fn definitions(&self) -> [&SelectorDef; 5] {
        [
            &self.counter,
            &self.item,
            &self.selected_item,
            &self.container,
            &self.removal_trigger,
        ]
    }
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            counter: SelectorDef::new(
                "Selected photo count",
                ".rtExYb",
                ["[data-selection-count]", ".Mfixef .rtExYb"],
            ),
            item: SelectorDef::new(
                "Photo checkbox",
                ".ckGgle[aria-checked=false]",
                [
                    "[role=\"checkbox\"][aria-checked=\"false\"]",
                    "[data-lat][aria-checked=\"false\"]",
                ],
            ),
            selected_item: SelectorDef::new(
                "Selected photo checkbox",
                ".ckGgle[aria-checked=true]",
                [
                    "[role=\"checkbox\"][aria-checked=\"true\"]",
                    "[data-lat][aria-checked=\"true\"]",
                ],
            ),
            container: SelectorDef::new(
                "Photo container",
                ".yDSiEe.uGCjIb.zcLWac.eejsDc.TWmIyd",
                [".yDSiEe.uGCjIb.zcLWac", "[role=\"list\"]", "[role=\"grid\"]"],
            ),
            removal_trigger: SelectorDef::new(
                "Delete button",
                "button[aria-label=\"Move to trash\"]",
                ["button[aria-label=\"Delete\"]", "button[data-delete-origin]"],
            ),
            confirm_label: "Move to trash".to_string(),
        }
    }
}

pub fn load_purge_config<P: AsRef<Path>>(path: P) -> Result<PurgeConfig> {
    let config: PurgeConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
