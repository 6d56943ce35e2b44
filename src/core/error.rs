//! Error type shared by loading, composition, state, and orchestration.

use std::path::PathBuf;

/// Result alias for lakeforge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable configuration for the requested environment. Covers both a
    /// missing file and one that cannot be parsed.
    #[error("environment '{environment}' not found at {}: {reason}", .path.display())]
    EnvironmentNotFound {
        environment: String,
        path: PathBuf,
        reason: String,
    },

    /// The configuration parsed but violates structural constraints.
    #[error("{} validation error(s) in environment '{environment}'", .problems.len())]
    Validation {
        environment: String,
        problems: Vec<String>,
    },

    /// A resource could not be declared (bad parameters, duplicate id,
    /// dangling reference, dependency cycle).
    #[error("declaration error: {0}")]
    Declaration(String),

    /// A deployment asset a constructed component reads is not in the
    /// local assets directory.
    #[error("asset '{key}' not found at {}", .path.display())]
    MissingAsset { key: String, path: PathBuf },

    /// The external orchestrator is missing or reported failure.
    #[error("orchestrator `{command}` failed: {message}")]
    Orchestrator { command: String, message: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn declaration(message: impl Into<String>) -> Self {
        Self::Declaration(message.into())
    }

    /// True for errors raised before any component is constructed.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::EnvironmentNotFound { .. } | Self::Validation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_environment_and_path() {
        let e = Error::EnvironmentNotFound {
            environment: "prod".to_string(),
            path: PathBuf::from("config/prod.json"),
            reason: "file does not exist".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("'prod'"));
        assert!(msg.contains("config/prod.json"));
        assert!(e.is_config_error());
    }

    #[test]
    fn test_validation_message_counts_problems() {
        let e = Error::Validation {
            environment: "dev".to_string(),
            problems: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(e.to_string(), "2 validation error(s) in environment 'dev'");
    }

    #[test]
    fn test_missing_asset_message() {
        let e = Error::MissingAsset {
            key: "lambdas/data-ingestion.zip".to_string(),
            path: PathBuf::from("assets/lambdas/data-ingestion.zip"),
        };
        assert_eq!(
            e.to_string(),
            "asset 'lambdas/data-ingestion.zip' not found at assets/lambdas/data-ingestion.zip"
        );
        assert!(!e.is_config_error());
    }

    #[test]
    fn test_declaration_is_not_config_error() {
        assert!(!Error::declaration("duplicate").is_config_error());
    }
}
