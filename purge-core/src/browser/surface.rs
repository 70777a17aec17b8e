use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use serde_json::Value;

use super::automation::BrowserContext;
use super::error::{BrowserError, BrowserResult};

/// Identifier used to enumerate clickable controls when looking for a
/// confirmation by its label.
const CONTROL_IDENTIFIER: &str = "button, [role=\"button\"]";

/// The target environment the engine drives. Identifiers are opaque to the
/// engine; for a browser page they are CSS selectors.
#[async_trait]
pub trait TargetSurface: Send + Sync {
    type Node: Send + Sync;

    async fn query_one(&self, identifier: &str) -> BrowserResult<Option<Self::Node>>;
    async fn query_all(&self, identifier: &str) -> BrowserResult<Vec<Self::Node>>;
    /// Every confirmation-style control currently rendered.
    async fn controls(&self) -> BrowserResult<Vec<Self::Node>>;
    async fn text(&self, node: &Self::Node) -> BrowserResult<Option<String>>;
    async fn click(&self, node: &Self::Node) -> BrowserResult<()>;
    /// Vertical offset of the node relative to the viewport.
    async fn offset_top(&self, node: &Self::Node) -> BrowserResult<f64>;
    async fn scroll_by(&self, container: &Self::Node, delta_y: f64) -> BrowserResult<()>;
    async fn scroll_to_top(&self, container: &Self::Node) -> BrowserResult<()>;
}

#[derive(Debug, Clone)]
pub struct ChromiumSurface {
    page: Page,
}

impl ChromiumSurface {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn from_context(context: &BrowserContext) -> Self {
        Self::new(context.page().clone())
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn call(&self, node: &Element, function: &str) -> BrowserResult<Option<Value>> {
        let returns = node.call_js_fn(function, false).await?;
        if let Some(exception) = returns.exception_details {
            return Err(BrowserError::Script(exception.text));
        }
        Ok(returns.result.value)
    }
}

#[async_trait]
impl TargetSurface for ChromiumSurface {
    type Node = Element;

    async fn query_one(&self, identifier: &str) -> BrowserResult<Option<Element>> {
        let mut found = self.page.find_elements(identifier).await?;
        if found.is_empty() {
            Ok(None)
        } else {
            Ok(Some(found.swap_remove(0)))
        }
    }

    async fn query_all(&self, identifier: &str) -> BrowserResult<Vec<Element>> {
        Ok(self.page.find_elements(identifier).await?)
    }

    async fn controls(&self) -> BrowserResult<Vec<Element>> {
        self.query_all(CONTROL_IDENTIFIER).await
    }

    async fn text(&self, node: &Element) -> BrowserResult<Option<String>> {
        Ok(node.inner_text().await?)
    }

    async fn click(&self, node: &Element) -> BrowserResult<()> {
        self.call(node, "function() { this.click(); }").await?;
        Ok(())
    }

    async fn offset_top(&self, node: &Element) -> BrowserResult<f64> {
        let value = self
            .call(node, "function() { return this.getBoundingClientRect().top; }")
            .await?;
        value
            .as_ref()
            .and_then(Value::as_f64)
            .ok_or_else(|| BrowserError::Script(format!("unexpected offset payload: {value:?}")))
    }

    async fn scroll_by(&self, container: &Element, delta_y: f64) -> BrowserResult<()> {
        let function = format!("function() {{ void this.scrollTop; this.scrollBy(0, {delta_y}); }}");
        self.call(container, &function).await?;
        Ok(())
    }

    async fn scroll_to_top(&self, container: &Element) -> BrowserResult<()> {
        self.call(container, "function() { this.scrollTop = 0; }")
            .await?;
        Ok(())
    }
}
