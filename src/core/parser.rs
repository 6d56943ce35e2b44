//! Environment configuration loading and validation.
//!
//! Loads `<config_dir>/<environment>.json` and validates structural
//! constraints:
//! - account id is twelve digits
//! - region looks like a provider region
//! - domain name and project prefix are usable in resource names
//!
//! Knowledge base or guardrails without generative AI are warnings, not
//! errors: those components are skipped downstream.

use super::error::{Error, Result};
use super::types::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ACCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{12}$").unwrap());
static REGION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d$").unwrap());
static DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").unwrap());
static PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,19}$").unwrap());

/// Validation problem.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Path of an environment's configuration file.
pub fn environment_path(config_dir: &Path, environment: &str) -> PathBuf {
    config_dir.join(format!("{}.json", environment))
}

/// Load an environment's configuration from disk.
pub fn load_environment(config_dir: &Path, environment: &str) -> Result<EnvironmentConfig> {
    let path = environment_path(config_dir, environment);
    let not_found = |reason: String| Error::EnvironmentNotFound {
        environment: environment.to_string(),
        path: path.clone(),
        reason,
    };

    if !is_plain_name(environment) {
        return Err(not_found("environment names are letters, digits, '-' and '_'".into()));
    }
    if !path.is_file() {
        return Err(not_found("file does not exist".into()));
    }
    let content = std::fs::read_to_string(&path).map_err(|e| not_found(e.to_string()))?;
    let config = parse_environment(environment, &content)
        .map_err(|e| not_found(format!("invalid JSON: {}", e)))?;

    tracing::debug!(environment, path = %path.display(), "loaded environment configuration");
    Ok(config)
}

/// Parse an environment record from a JSON string.
pub fn parse_environment(
    environment: &str,
    json: &str,
) -> std::result::Result<EnvironmentConfig, serde_json::Error> {
    let mut config: EnvironmentConfig = serde_json::from_str(json)?;
    config.environment = environment.to_string();
    Ok(config)
}

/// Load and validate in one step; validation problems become one error.
pub fn load_and_validate(config_dir: &Path, environment: &str) -> Result<EnvironmentConfig> {
    let config = load_environment(config_dir, environment)?;
    let errors = validate_config(&config);
    if errors.is_empty() {
        for w in warnings(&config) {
            tracing::warn!(environment, "{}", w);
        }
        return Ok(config);
    }
    Err(Error::Validation {
        environment: environment.to_string(),
        problems: errors.into_iter().map(|e| e.message).collect(),
    })
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &EnvironmentConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if !ACCOUNT_RE.is_match(&config.account_id) {
        push(format!(
            "accountId must be 12 digits, got \"{}\"",
            config.account_id
        ));
    }
    if !REGION_RE.is_match(&config.region) {
        push(format!(
            "region \"{}\" is not a valid region name",
            config.region
        ));
    }
    if config.domain_name.is_empty() {
        push("domainName must not be empty".to_string());
    } else if !DOMAIN_RE.is_match(&config.domain_name) {
        push(format!(
            "domainName \"{}\" must be at most 64 letters, digits, '-' or '_'",
            config.domain_name
        ));
    }
    if !PREFIX_RE.is_match(&config.project_prefix) || config.project_prefix.ends_with('-') {
        push(format!(
            "projectPrefix \"{}\" must be 1-20 lowercase letters, digits or '-', starting with a letter",
            config.project_prefix
        ));
    }
    for key in config.tags.keys() {
        if key.is_empty() || key.len() > 128 {
            push(format!("tag key \"{}\" must be 1-128 characters", key));
        }
    }

    errors
}

/// Non-fatal findings: features that are requested but will be skipped.
pub fn warnings(config: &EnvironmentConfig) -> Vec<String> {
    [Component::KnowledgeBase, Component::Guardrail]
        .into_iter()
        .filter_map(|c| {
            let requested = match c {
                Component::KnowledgeBase => config.features.knowledge_base,
                _ => config.features.guardrails,
            };
            if requested {
                config.features.skip_reason(c).map(|r| format!("{} skipped: {}", c, r))
            } else {
                None
            }
        })
        .collect()
}

fn is_plain_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
