//! Orchestrator transport: invoke the external deployment tool.
//!
//! Deployment, asset upload, teardown and output retrieval are delegated to
//! a CloudFormation-compatible command line (`aws` by default). Argument
//! lists are built separately from execution so they can be shown in a
//! dry run.

pub mod local;

use crate::core::error::{Error, Result};
use crate::core::types::EnvironmentConfig;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

/// Output from one orchestrator invocation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The external orchestrator binary.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pub binary: String,
}

impl Orchestrator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `<bin> --version`, used by `install` to confirm the tool is present.
    pub fn version(&self) -> Result<String> {
        let out = self.run_checked(&["--version".to_string()])?;
        let text = if out.stdout.trim().is_empty() {
            out.stderr
        } else {
            out.stdout
        };
        Ok(text.trim().to_string())
    }

    pub fn deploy_args(
        &self,
        config: &EnvironmentConfig,
        template_file: &Path,
        artifact_bucket: Option<&str>,
    ) -> Vec<String> {
        let mut args = vec![
            "cloudformation".to_string(),
            "deploy".to_string(),
            "--stack-name".to_string(),
            config.stack_name(),
            "--template-file".to_string(),
            template_file.display().to_string(),
            "--capabilities".to_string(),
            "CAPABILITY_NAMED_IAM".to_string(),
            "--no-fail-on-empty-changeset".to_string(),
            "--region".to_string(),
            config.region.clone(),
        ];
        if let Some(bucket) = artifact_bucket {
            args.push("--s3-bucket".to_string());
            args.push(bucket.to_string());
        }
        if !config.tags.is_empty() {
            args.push("--tags".to_string());
            args.extend(config.tags.iter().map(|(k, v)| format!("{}={}", k, v)));
        }
        args
    }

    /// Upload exactly `keys` from `assets_dir` to the code bucket.
    pub fn sync_args(
        &self,
        config: &EnvironmentConfig,
        assets_dir: &Path,
        bucket: &str,
        keys: &[String],
    ) -> Vec<String> {
        let mut args = vec![
            "s3".to_string(),
            "sync".to_string(),
            assets_dir.display().to_string(),
            format!("s3://{}/", bucket),
            "--exclude".to_string(),
            "*".to_string(),
        ];
        for key in keys {
            args.push("--include".to_string());
            args.push(key.clone());
        }
        args.extend(["--region".to_string(), config.region.clone()]);
        args
    }

    pub fn delete_args(&self, config: &EnvironmentConfig) -> Vec<String> {
        stack_command("delete-stack", config)
    }

    pub fn wait_delete_args(&self, config: &EnvironmentConfig) -> Vec<String> {
        let mut args = vec!["cloudformation".to_string(), "wait".to_string()];
        args.extend(stack_command("stack-delete-complete", config).into_iter().skip(1));
        args
    }

    pub fn describe_args(&self, config: &EnvironmentConfig) -> Vec<String> {
        let mut args = stack_command("describe-stacks", config);
        args.extend(["--output".to_string(), "json".to_string()]);
        args
    }

    /// Run and require success.
    pub fn run_checked(&self, args: &[String]) -> Result<ExecOutput> {
        let out = self.run(args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(Error::Orchestrator {
                command: self.display(args),
                message: format!("exit code {}: {}", out.exit_code, out.stderr.trim()),
            })
        }
    }

    /// Fetch the deployed stack's outputs.
    pub fn stack_outputs(&self, config: &EnvironmentConfig) -> Result<IndexMap<String, String>> {
        let args = self.describe_args(config);
        let out = self.run_checked(&args)?;
        parse_stack_outputs(&out.stdout).map_err(|e| Error::Orchestrator {
            command: self.display(&args),
            message: format!("unreadable stack description: {}", e),
        })
    }

    /// Whether the stack has been created. Only the "does not exist"
    /// failure means no; any other failure is an error.
    pub fn stack_exists(&self, config: &EnvironmentConfig) -> Result<bool> {
        let args = self.describe_args(config);
        let out = self.run(&args)?;
        if out.success() {
            return Ok(true);
        }
        if out.stderr.contains("does not exist") {
            return Ok(false);
        }
        Err(Error::Orchestrator {
            command: self.display(&args),
            message: format!("exit code {}: {}", out.exit_code, out.stderr.trim()),
        })
    }

    /// Shell-like rendering for logs and dry runs.
    pub fn display(&self, args: &[String]) -> String {
        std::iter::once(self.binary.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run(&self, args: &[String]) -> Result<ExecOutput> {
        tracing::info!(command = %self.display(args), "invoking orchestrator");
        local::exec_local(&self.binary, args)
    }
}

fn stack_command(subcommand: &str, config: &EnvironmentConfig) -> Vec<String> {
    vec![
        "cloudformation".to_string(),
        subcommand.to_string(),
        "--stack-name".to_string(),
        config.stack_name(),
        "--region".to_string(),
        config.region.clone(),
    ]
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackDescription {
    #[serde(default)]
    stacks: Vec<DescribedStack>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribedStack {
    #[serde(default)]
    outputs: Vec<StackOutput>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackOutput {
    output_key: String,
    output_value: String,
}

/// Output key/value pairs from a `describe-stacks` JSON document.
pub fn parse_stack_outputs(json: &str) -> std::result::Result<IndexMap<String, String>, serde_json::Error> {
    let description: StackDescription = serde_json::from_str(json)?;
    Ok(description
        .stacks
        .into_iter()
        .next()
        .map(|s| {
            s.outputs
                .into_iter()
                .map(|o| (o.output_key, o.output_value))
                .collect()
        })
        .unwrap_or_default())
}
