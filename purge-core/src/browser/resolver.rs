use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::config::SelectorDef;

use super::error::{BrowserError, BrowserResult};
use super::surface::TargetSurface;

/// Remembers which (definition, fallback) pairs have already been reported,
/// so a degraded resolution path warns once rather than on every query.
/// Clones share the same memory.
#[derive(Debug, Clone, Default)]
pub struct FallbackRegistry {
    warned: Arc<Mutex<HashSet<(String, String)>>>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time the pair is seen.
    fn first_use(&self, name: &str, fallback: &str) -> bool {
        let mut warned = self.warned.lock().unwrap_or_else(PoisonError::into_inner);
        warned.insert((name.to_string(), fallback.to_string()))
    }

    pub fn contains(&self, name: &str, fallback: &str) -> bool {
        let warned = self.warned.lock().unwrap_or_else(PoisonError::into_inner);
        warned.contains(&(name.to_string(), fallback.to_string()))
    }

    pub fn len(&self) -> usize {
        self.warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// How a definition was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Primary,
    Fallback,
}

pub struct TargetResolver<S> {
    surface: S,
    registry: FallbackRegistry,
}

impl<S: TargetSurface> TargetResolver<S> {
    pub fn new(surface: S) -> Self {
        Self::with_registry(surface, FallbackRegistry::new())
    }

    pub fn with_registry(surface: S, registry: FallbackRegistry) -> Self {
        Self { surface, registry }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn registry(&self) -> &FallbackRegistry {
        &self.registry
    }

    pub async fn query_one(&self, def: &SelectorDef) -> BrowserResult<Option<S::Node>> {
        Ok(self.resolve_one(def).await?.map(|(node, _)| node))
    }

    /// Like [`query_one`](Self::query_one), also reporting whether a fallback
    /// was needed.
    pub async fn resolve_one(
        &self,
        def: &SelectorDef,
    ) -> BrowserResult<Option<(S::Node, Resolution)>> {
        if let Some(node) = self.surface.query_one(&def.primary).await? {
            return Ok(Some((node, Resolution::Primary)));
        }
        for fallback in &def.fallbacks {
            if let Some(node) = self.surface.query_one(fallback).await? {
                self.note_fallback(def, fallback);
                return Ok(Some((node, Resolution::Fallback)));
            }
        }
        Ok(None)
    }

    /// The first identifier yielding at least one node wins outright; result
    /// sets from different identifiers are never merged.
    pub async fn query_all(&self, def: &SelectorDef) -> BrowserResult<Vec<S::Node>> {
        let primary = self.surface.query_all(&def.primary).await?;
        if !primary.is_empty() {
            return Ok(primary);
        }
        for fallback in &def.fallbacks {
            let nodes = self.surface.query_all(fallback).await?;
            if !nodes.is_empty() {
                self.note_fallback(def, fallback);
                return Ok(nodes);
            }
        }
        Ok(Vec::new())
    }

    pub async fn require_one(&self, def: &SelectorDef) -> BrowserResult<S::Node> {
        self.query_one(def).await?.ok_or_else(|| {
            BrowserError::Resolution(format!(
                "{} not found (tried {} identifiers)",
                def.name,
                def.fallbacks.len() + 1
            ))
        })
    }

    /// First rendered control whose trimmed visible text equals `label`.
    pub async fn find_control(&self, label: &str) -> BrowserResult<Option<S::Node>> {
        for control in self.surface.controls().await? {
            let text = self.surface.text(&control).await?;
            if text.as_deref().map(str::trim) == Some(label) {
                return Ok(Some(control));
            }
        }
        Ok(None)
    }

    fn note_fallback(&self, def: &SelectorDef, fallback: &str) {
        if self.registry.first_use(&def.name, fallback) {
            warn!(
                target_name = %def.name,
                primary = %def.primary,
                fallback,
                "primary identifier failed, using fallback"
            );
        }
    }
}
