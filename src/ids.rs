//! Deterministic id generation
//!
//! Ids are v5 UUIDs over a fixed namespace, so converting the same archive
//! twice yields identical ids. The cache is owned by one run.

use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{ConvertError, Result};

/// Seed -> id generator with a per-run cache
#[derive(Debug, Clone)]
pub struct IdGenerator {
    namespace: Uuid,
    cache: HashMap<String, String>,
}

impl IdGenerator {
    pub fn new(namespace: Uuid) -> Self {
        Self {
            namespace,
            cache: HashMap::new(),
        }
    }

    /// Parse the configured namespace
    pub fn from_namespace(namespace: &str) -> Result<Self> {
        let ns = Uuid::parse_str(namespace)
            .map_err(|e| {
                ConvertError::Config(config_crate::ConfigError::Message(format!(
                    "invalid id namespace {}: {}",
                    namespace, e
                )))
            })?;
        Ok(Self::new(ns))
    }

    /// Stable id for `seed`
    pub fn id_for(&mut self, seed: &str) -> String {
        if let Some(id) = self.cache.get(seed) {
            return id.clone();
        }
        let id = Uuid::new_v5(&self.namespace, seed.as_bytes()).to_string();
        self.cache.insert(seed.to_string(), id.clone());
        id
    }

    pub fn transformation_id(&mut self, name: &str) -> String {
        self.id_for(&format!("transform_{}", name))
    }

    pub fn schema_id(&mut self, name: &str) -> String {
        self.id_for(&format!("schema_{}", name))
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
