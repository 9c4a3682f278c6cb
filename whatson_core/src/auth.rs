//! Credential storage for source adapters.
//!
//! A plain string map; each adapter knows which keys it needs and falls back
//! to its own environment variable when a key is absent. Lookups happen at
//! call time, so credentials added to the environment of a running process
//! enable a source without a restart.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthDetails {
    values: HashMap<String, String>,
}

impl AuthDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
