//! Platform components: each declares the resource descriptors for one
//! responsibility and returns the logical ids downstream components need.
//!
//! Every `declare` takes the template, the environment, and the outputs of
//! the components it consumes. Optional inputs arrive as `Option` and the
//! integration is omitted when absent.

pub mod catalog;
pub mod experiment;
pub mod guardrail;
pub mod identity;
pub mod ingestion;
pub mod knowledge_base;
pub mod network;
pub mod query;
pub mod storage;
pub mod studio;

use crate::core::error::{Error, Result};
use crate::core::template::tags;
use crate::core::types::EnvironmentConfig;
use indexmap::IndexMap;
use serde_json::Value;

/// Deterministic physical names and tags for one environment.
pub struct Naming<'a> {
    config: &'a EnvironmentConfig,
}

impl<'a> Naming<'a> {
    pub fn new(config: &'a EnvironmentConfig) -> Self {
        Self { config }
    }

    /// `<prefix>-<purpose>-<account>-<region>`, validated as a bucket name.
    pub fn bucket(&self, purpose: &str) -> Result<String> {
        let name = format!(
            "{}-{}-{}-{}",
            self.config.project_prefix, purpose, self.config.account_id, self.config.region
        );
        validate_bucket_name(&name)?;
        Ok(name)
    }

    /// `<prefix>-<purpose>`
    pub fn resource(&self, purpose: &str) -> String {
        format!("{}-{}", self.config.project_prefix, purpose)
    }

    /// `<prefix>-<purpose>` for resource types whose names are capped at
    /// `max_len` characters. Longer names are declaration errors.
    pub fn bounded(&self, purpose: &str, max_len: usize) -> Result<String> {
        let name = self.resource(purpose);
        if name.len() > max_len {
            return Err(Error::declaration(format!(
                "name '{}' is {} characters, the limit is {}",
                name,
                name.len(),
                max_len
            )));
        }
        Ok(name)
    }

    /// Catalog-safe identifier (`-` is not allowed in database names).
    pub fn database(&self, purpose: &str) -> String {
        format!("{}_{}", self.config.project_prefix, purpose).replace('-', "_")
    }

    /// Configured tags plus `Project` and `Environment`.
    pub fn tags(&self) -> Value {
        tags(&self.tag_map())
    }

    /// Tags as a flat map, for resource types that take one.
    pub fn tag_map(&self) -> IndexMap<String, String> {
        let mut all = IndexMap::new();
        all.insert("Project".to_string(), self.config.project_prefix.clone());
        all.insert("Environment".to_string(), self.config.environment.clone());
        for (k, v) in &self.config.tags {
            all.insert(k.clone(), v.clone());
        }
        all
    }
}

fn validate_bucket_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_ends = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if (3..=63).contains(&name.len()) && valid_chars && valid_ends && !name.contains("..") {
        Ok(())
    } else {
        Err(Error::declaration(format!(
            "bucket name '{}' must be 3-63 lowercase letters, digits, '-' or '.'",
            name
        )))
    }
}
