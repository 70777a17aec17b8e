use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: ChromiumSection,
}

impl BrowserLauncher {
    pub fn new(config: ChromiumSection) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChromiumSection {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        self.launch_with_overrides(LaunchOverrides::default()).await
    }

    pub async fn launch_with_overrides(
        &self,
        overrides: LaunchOverrides,
    ) -> BrowserResult<BrowserAutomation> {
        let headless = overrides.headless.unwrap_or(self.config.headless);
        let profile_dir = self.prepare_profile_dir()?;
        let chromium_config = self.build_chromium_config(profile_dir.as_ref(), headless)?;
        info!(
            profile = ?profile_dir,
            width = self.config.window_width,
            height = self.config.window_height,
            headless,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            target_url: self.config.target_url.clone(),
        })
    }

    fn prepare_profile_dir(&self) -> BrowserResult<Option<PathBuf>> {
        match &self.config.user_data_dir {
            Some(dir) => {
                let path = PathBuf::from(dir);
                std::fs::create_dir_all(&path)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    fn build_chromium_config(
        &self,
        profile_dir: Option<&PathBuf>,
        headless: bool,
    ) -> BrowserResult<ChromiumConfig> {
        let width = self.config.window_width;
        let height = self.config.window_height;
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width,
            height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: width >= height,
            has_touch: false,
        });

        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if let Some(dir) = profile_dir {
            builder = builder.user_data_dir(dir);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        builder = builder.args(vec![
            format!("--window-size={width},{height}"),
            "--no-first-run".to_string(),
            "--disable-background-timer-throttling".to_string(),
            "--password-store=basic".to_string(),
        ]);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    target_url: String,
}

impl BrowserAutomation {
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Opens a tab on the configured target page.
    pub async fn open_target(&self) -> BrowserResult<BrowserContext> {
        let context = self.new_context().await?;
        context.goto(&self.target_url).await?;
        Ok(context)
    }

    pub async fn new_context(&self) -> BrowserResult<BrowserContext> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        Ok(BrowserContext { page })
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
            }
        }
    }
}

#[derive(Debug)]
pub struct BrowserContext {
    page: Page,
}

impl BrowserContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }
}
