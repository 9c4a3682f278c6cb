//! Process-wide source table.
//!
//! Built once at startup, shared as `Arc<SourceRegistry>` and never mutated
//! afterwards, so concurrent orchestrator reads need no locking. The enabled
//! predicate runs per call: a source with freshly provisioned credentials
//! shows up in the next `enabled()` without a restart.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{DeepSource, EventSource};

#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn EventSource>>,
    deep_sources: Vec<Arc<dyn DeepSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Startup-time only; there is no removal and no per-request mutation.
    pub fn register(&mut self, source: Arc<dyn EventSource>) {
        self.sources.push(source);
    }

    pub fn register_deep(&mut self, source: Arc<dyn DeepSource>) {
        self.deep_sources.push(source);
    }

    /// Synchronous-path sources that are currently enabled, ordered by
    /// ascending priority then name.
    pub fn enabled(&self) -> Vec<Arc<dyn EventSource>> {
        let mut list: Vec<_> = self
            .sources
            .iter()
            .filter(|s| s.is_enabled())
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        list
    }

    /// Background-capable sources that are currently enabled.
    pub fn enabled_deep(&self) -> Vec<Arc<dyn DeepSource>> {
        let mut list: Vec<_> = self
            .deep_sources
            .iter()
            .filter(|s| s.is_enabled())
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        list
    }

    /// Everything registered, enabled or not.
    pub fn list_sources(&self) -> Vec<SourceInfo> {
        let mut infos: Vec<SourceInfo> = self
            .sources
            .iter()
            .map(|s| SourceInfo {
                name: s.name().to_string(),
                description: s.description().to_string(),
                priority: s.priority(),
                enabled: s.is_enabled(),
                background: false,
            })
            .chain(self.deep_sources.iter().map(|s| SourceInfo {
                name: s.name().to_string(),
                description: s.description().to_string(),
                priority: s.priority(),
                enabled: s.is_enabled(),
                background: true,
            }))
            .collect();
        infos.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        infos
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub name: String,
    pub description: String,
    pub priority: u32,
    pub enabled: bool,
    pub background: bool,
}
