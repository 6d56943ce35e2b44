//! Stack lock management: load, save (atomic), build from a template.

use super::error::{Error, Result};
use super::template::Template;
use super::types::{EnvironmentConfig, ResourceLock, StackLock};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Derive the lock file path for an environment within the state directory.
pub fn lock_file_path(state_dir: &Path, environment: &str) -> PathBuf {
    state_dir.join(environment).join("stack.lock.yaml")
}

/// Load an environment's lock. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, environment: &str) -> Result<Option<StackLock>> {
    let path = lock_file_path(state_dir, environment);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    let lock: StackLock = serde_yaml_ng::from_str(&content)?;
    Ok(Some(lock))
}

/// Save a lock atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StackLock) -> Result<()> {
    let path = lock_file_path(state_dir, &lock.environment);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock)?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml).map_err(|e| Error::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| Error::io(&path, e))?;

    tracing::debug!(path = %path.display(), "saved stack lock");
    Ok(())
}

/// Delete an environment's lock after the stack is destroyed.
pub fn remove_lock(state_dir: &Path, environment: &str) -> Result<bool> {
    let path = lock_file_path(state_dir, environment);
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
    Ok(true)
}

/// Build a lock describing `template` as deployed for `config`.
pub fn lock_for_template(config: &EnvironmentConfig, template: &Template) -> Result<StackLock> {
    use crate::tripwire::eventlog::now_iso8601;
    let mut resources = IndexMap::new();
    for (id, descriptor) in &template.resources {
        resources.insert(
            id.clone(),
            ResourceLock {
                resource_type: descriptor.resource_type.clone(),
                hash: hasher::hash_descriptor(descriptor)?,
            },
        );
    }
    Ok(StackLock {
        schema: "1.0".to_string(),
        environment: config.environment.clone(),
        stack_name: config.stack_name(),
        generated_at: now_iso8601(),
        generator: format!("lakeforge {}", env!("CARGO_PKG_VERSION")),
        template_hash: hasher::hash_template(template)?,
        resources,
        outputs: IndexMap::new(),
    })
}

/// List environments that have a lock in the state directory, sorted.
pub fn list_environments(state_dir: &Path) -> Result<Vec<String>> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(state_dir).map_err(|e| Error::io(state_dir, e))?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| lock_file_path(state_dir, name).exists())
        .collect();
    names.sort();
    Ok(names)
}
