//! CLI subcommands: init, install, validate, build, plan, deploy, destroy,
//! outputs, status, schema.

use crate::core::composer::{self, Composition};
use crate::core::error::{Error, Result};
use crate::core::{parser, planner, state, types};
use crate::transport::Orchestrator;
use crate::tripwire::eventlog;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Directories and orchestrator shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding `<environment>.json` files
    #[arg(long, global = true, default_value = "config")]
    pub config_dir: PathBuf,

    /// State directory (stack locks, event logs)
    #[arg(long, global = true, default_value = "state")]
    pub state_dir: PathBuf,

    /// Build output directory
    #[arg(long, global = true, default_value = "out")]
    pub out_dir: PathBuf,

    /// Deployment assets, laid out by their code-bucket keys
    #[arg(long, global = true, default_value = "assets")]
    pub assets_dir: PathBuf,

    /// Orchestrator binary
    #[arg(long, global = true, env = "LAKEFORGE_ORCHESTRATOR", default_value = "aws")]
    pub orchestrator: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a configuration directory with a dev environment
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Check the orchestrator CLI is installed
    Install,

    /// Load and validate an environment configuration
    Validate {
        /// Environment name
        #[arg(short, long = "env")]
        environment: String,
    },

    /// Compose the template and write build artifacts
    #[command(alias = "synth")]
    Build {
        /// Environment name
        #[arg(short, long = "env")]
        environment: String,
    },

    /// Show what a deploy would change (diff against the stack lock)
    Plan {
        /// Environment name
        #[arg(short, long = "env")]
        environment: String,
    },

    /// Build, then deploy the stack through the orchestrator
    Deploy {
        /// Environment name
        #[arg(short, long = "env")]
        environment: String,

        /// Show the orchestrator command without running it
        #[arg(long)]
        dry_run: bool,

        /// Deploy even when the plan shows no changes
        #[arg(long)]
        force: bool,

        /// Bucket the orchestrator uploads large templates to
        #[arg(long)]
        artifact_bucket: Option<String>,
    },

    /// Delete the stack and forget its lock
    Destroy {
        /// Environment name
        #[arg(short, long = "env")]
        environment: String,

        /// Show the orchestrator commands without running them
        #[arg(long)]
        dry_run: bool,
    },

    /// Print stack outputs captured at the last deploy
    Outputs {
        /// Environment name
        #[arg(short, long = "env")]
        environment: String,

        /// Print as a JSON object
        #[arg(long)]
        json: bool,
    },

    /// Summarize stack locks in the state directory
    Status,

    /// Print the JSON Schema of the environment configuration
    Schema,
}

/// Dispatch a CLI command.
pub fn dispatch(globals: &GlobalArgs, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Install => cmd_install(&Orchestrator::new(&globals.orchestrator)),
        Commands::Validate { environment } => cmd_validate(globals, &environment),
        Commands::Build { environment } => cmd_build(globals, &environment).map(|_| ()),
        Commands::Plan { environment } => cmd_plan(globals, &environment),
        Commands::Deploy {
            environment,
            dry_run,
            force,
            artifact_bucket,
        } => cmd_deploy(
            globals,
            &environment,
            dry_run,
            force,
            artifact_bucket.as_deref(),
        ),
        Commands::Destroy {
            environment,
            dry_run,
        } => cmd_destroy(globals, &environment, dry_run),
        Commands::Outputs { environment, json } => cmd_outputs(globals, &environment, json),
        Commands::Status => cmd_status(&globals.state_dir),
        Commands::Schema => cmd_schema(),
    }
}

const DEV_TEMPLATE: &str = r#"{
  "accountId": "123456789012",
  "region": "us-east-1",
  "domainName": "ml-platform-dev",
  "networkAccess": "public",
  "projectPrefix": "ml-platform",
  "features": {
    "catalog": true,
    "queryEngine": true,
    "generativeAi": false,
    "knowledgeBase": false,
    "guardrails": false,
    "dataIngestion": false,
    "experimentPipeline": false
  },
  "tags": {}
}
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_dir = path.join("config");
    let config_path = parser::environment_path(&config_dir, "dev");
    if config_path.exists() {
        return Err(Error::io(
            &config_path,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "already exists"),
        ));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&config_dir).map_err(|e| Error::io(&config_dir, e))?;
    std::fs::create_dir_all(&state_dir).map_err(|e| Error::io(&state_dir, e))?;
    std::fs::write(&config_path, DEV_TEMPLATE).map_err(|e| Error::io(&config_path, e))?;

    println!("Initialized lakeforge project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_install(orchestrator: &Orchestrator) -> Result<()> {
    let version = orchestrator.version()?;
    println!("Found {}: {}", orchestrator.binary, version);
    Ok(())
}

/// Load and validate, echoing every problem before failing.
fn load(globals: &GlobalArgs, environment: &str) -> Result<types::EnvironmentConfig> {
    match parser::load_and_validate(&globals.config_dir, environment) {
        Err(Error::Validation {
            environment,
            problems,
        }) => {
            for p in &problems {
                eprintln!("  ERROR: {}", p);
            }
            Err(Error::Validation {
                environment,
                problems,
            })
        }
        other => other,
    }
}

fn cmd_validate(globals: &GlobalArgs, environment: &str) -> Result<()> {
    let config = load(globals, environment)?;
    let active = types::Component::ALL
        .into_iter()
        .filter(|c| config.features.is_active(*c))
        .count();
    println!(
        "OK: {} (stack {}, {} network, {} of {} components active)",
        environment,
        config.stack_name(),
        config.network_mode(),
        active,
        types::Component::ALL.len()
    );
    for w in parser::warnings(&config) {
        println!("  WARNING: {}", w);
    }
    Ok(())
}

/// Compose, write `template.json` and `manifest.json`, record the run.
fn cmd_build(globals: &GlobalArgs, environment: &str) -> Result<(Composition, PathBuf)> {
    let config = load(globals, environment)?;
    let run_id = eventlog::generate_run_id();
    record_run_started(globals, environment, &run_id, "build")?;

    let composition = composer::compose(&config)?;
    for record in &composition.records {
        let event = match &record.status {
            types::ComponentStatus::Constructed { resources } => {
                types::ProvenanceEvent::ComponentDeclared {
                    environment: environment.to_string(),
                    component: record.component,
                    resources: *resources,
                }
            }
            types::ComponentStatus::Skipped { reason } => types::ProvenanceEvent::ComponentSkipped {
                environment: environment.to_string(),
                component: record.component,
                reason: reason.clone(),
            },
        };
        eventlog::append_event(&globals.state_dir, environment, event)?;
    }

    let template_path = write_artifacts(&globals.out_dir, &composition)?;
    println!(
        "Built {} ({} resources, {} outputs)",
        composition.config.stack_name(),
        composition.template.resources.len(),
        composition.template.outputs.len()
    );
    for record in &composition.records {
        match &record.status {
            types::ComponentStatus::Constructed { resources } => {
                println!("  + {} ({} resources)", record.component, resources)
            }
            types::ComponentStatus::Skipped { reason } => {
                println!("  - {} (skipped: {})", record.component, reason)
            }
        }
    }
    println!("  Template: {}", template_path.display());
    Ok((composition, template_path))
}

fn write_artifacts(out_dir: &Path, composition: &Composition) -> Result<PathBuf> {
    let dir = out_dir.join(&composition.config.environment);
    std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

    let template_path = dir.join("template.json");
    std::fs::write(&template_path, composition.template.to_json_pretty()?)
        .map_err(|e| Error::io(&template_path, e))?;

    let manifest_path = dir.join("manifest.json");
    let manifest = serde_json::to_string_pretty(&composition.manifest()?)?;
    std::fs::write(&manifest_path, manifest).map_err(|e| Error::io(&manifest_path, e))?;

    tracing::debug!(dir = %dir.display(), "wrote build artifacts");
    Ok(template_path)
}

fn cmd_plan(globals: &GlobalArgs, environment: &str) -> Result<()> {
    let config = load(globals, environment)?;
    let composition = composer::compose(&config)?;
    let lock = state::load_lock(&globals.state_dir, environment)?;
    let plan = planner::plan(&config.stack_name(), &composition.template, lock.as_ref())?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} resources)", plan.stack_name, plan.changes.len());
    println!();
    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, planner::describe(change));
    }
    if plan.template_changed && plan.to_create + plan.to_update + plan.to_destroy == 0 {
        println!("  ~ stack outputs or description");
    }
    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn cmd_deploy(
    globals: &GlobalArgs,
    environment: &str,
    dry_run: bool,
    force: bool,
    artifact_bucket: Option<&str>,
) -> Result<()> {
    let (composition, template_path) = cmd_build(globals, environment)?;
    let config = &composition.config;
    let lock = state::load_lock(&globals.state_dir, environment)?;
    let plan = planner::plan(&config.stack_name(), &composition.template, lock.as_ref())?;
    println!();
    print_plan(&plan);

    let orchestrator = Orchestrator::new(&globals.orchestrator);
    let bootstrap = if lock.is_none() && !composition.assets.is_empty() {
        Some(write_bootstrap(&composition, &template_path)?)
    } else {
        None
    };
    let sync = orchestrator.sync_args(
        config,
        &globals.assets_dir,
        &composition.code_bucket,
        &composition.assets,
    );
    let deploy = orchestrator.deploy_args(config, &template_path, artifact_bucket);

    if dry_run {
        println!();
        println!("Dry run, would run:");
        if let Some(path) = &bootstrap {
            let args = orchestrator.deploy_args(config, path, artifact_bucket);
            println!("  {}  (only if the stack does not exist)", orchestrator.display(&args));
        }
        if !composition.assets.is_empty() {
            println!("  {}", orchestrator.display(&sync));
        }
        println!("  {}", orchestrator.display(&deploy));
        return Ok(());
    }
    if !plan.has_changes() && !force {
        println!();
        println!("No changes. Stack {} is up to date.", plan.stack_name);
        return Ok(());
    }
    check_assets(&globals.assets_dir, &composition.assets)?;

    let run_id = eventlog::generate_run_id();
    record_run_started(globals, environment, &run_id, "deploy")?;
    let started = Instant::now();

    let applied = apply_stack(
        &orchestrator,
        &composition,
        bootstrap.as_deref(),
        &sync,
        &deploy,
        artifact_bucket,
    );
    if let Err(e) = applied {
        record_failure(globals, environment, &run_id, &e);
        return Err(e);
    }

    // The stack is applied either way; a lock without outputs still lets
    // the next plan diff against it.
    let outputs = orchestrator.stack_outputs(config).unwrap_or_else(|e| {
        tracing::warn!(environment, error = %e, "stack deployed but its outputs could not be read");
        eprintln!("  WARNING: stack outputs unavailable: {}", e);
        indexmap::IndexMap::new()
    });

    let mut lock = state::lock_for_template(config, &composition.template)?;
    lock.outputs = outputs;
    state::save_lock(&globals.state_dir, &lock)?;

    let total_seconds = started.elapsed().as_secs_f64();
    eventlog::append_event(
        &globals.state_dir,
        environment,
        types::ProvenanceEvent::DeployCompleted {
            environment: environment.to_string(),
            run_id,
            template_hash: lock.template_hash.clone(),
            total_seconds,
        },
    )?;

    println!();
    println!(
        "Deploy complete: {} ({} outputs, {:.1}s)",
        lock.stack_name,
        lock.outputs.len(),
        total_seconds
    );
    print_outputs(&lock.outputs);
    Ok(())
}

/// Write the asset-free bootstrap template next to `template.json`.
fn write_bootstrap(composition: &Composition, template_path: &Path) -> Result<PathBuf> {
    let bootstrap = composer::compose_bootstrap(&composition.config)?;
    let path = template_path.with_file_name("bootstrap.template.json");
    std::fs::write(&path, bootstrap.template.to_json_pretty()?)
        .map_err(|e| Error::io(&path, e))?;
    Ok(path)
}

/// Bootstrap if needed, upload assets, then deploy the full template.
fn apply_stack(
    orchestrator: &Orchestrator,
    composition: &Composition,
    bootstrap: Option<&Path>,
    sync: &[String],
    deploy: &[String],
    artifact_bucket: Option<&str>,
) -> Result<()> {
    if let Some(path) = bootstrap {
        bootstrap_stack(orchestrator, &composition.config, path, artifact_bucket)?;
    }
    if !composition.assets.is_empty() {
        println!(
            "Uploading {} asset(s) to s3://{}/",
            composition.assets.len(),
            composition.code_bucket
        );
        orchestrator.run_checked(sync)?;
    }
    orchestrator.run_checked(deploy)?;
    Ok(())
}

/// Deploy the bootstrap template unless the stack already exists. An
/// existing stack already has its code bucket, and the bootstrap template
/// would remove its asset readers.
fn bootstrap_stack(
    orchestrator: &Orchestrator,
    config: &types::EnvironmentConfig,
    path: &Path,
    artifact_bucket: Option<&str>,
) -> Result<()> {
    if orchestrator.stack_exists(config)? {
        tracing::info!(stack = %config.stack_name(), "stack exists, skipping bootstrap");
        return Ok(());
    }
    println!("Bootstrapping {} so the code bucket exists", config.stack_name());
    orchestrator
        .run_checked(&orchestrator.deploy_args(config, path, artifact_bucket))
        .map(|_| ())
}

/// Every asset the stack reads must be present before anything is applied.
fn check_assets(assets_dir: &Path, keys: &[String]) -> Result<()> {
    for key in keys {
        let path = assets_dir.join(key);
        if !path.is_file() {
            return Err(Error::MissingAsset {
                key: key.clone(),
                path,
            });
        }
    }
    Ok(())
}

fn cmd_destroy(globals: &GlobalArgs, environment: &str, dry_run: bool) -> Result<()> {
    let config = load(globals, environment)?;
    let orchestrator = Orchestrator::new(&globals.orchestrator);
    let delete = orchestrator.delete_args(&config);
    let wait = orchestrator.wait_delete_args(&config);

    if dry_run {
        println!("Dry run, would run:");
        println!("  {}", orchestrator.display(&delete));
        println!("  {}", orchestrator.display(&wait));
        return Ok(());
    }

    let run_id = eventlog::generate_run_id();
    record_run_started(globals, environment, &run_id, "destroy")?;
    if let Err(e) = orchestrator
        .run_checked(&delete)
        .and_then(|_| orchestrator.run_checked(&wait))
    {
        record_failure(globals, environment, &run_id, &e);
        return Err(e);
    }

    let removed = state::remove_lock(&globals.state_dir, environment)?;
    eventlog::append_event(
        &globals.state_dir,
        environment,
        types::ProvenanceEvent::DestroyCompleted {
            environment: environment.to_string(),
            run_id,
        },
    )?;
    println!("Destroyed {}", config.stack_name());
    if removed {
        println!("  Removed: {}", state::lock_file_path(&globals.state_dir, environment).display());
    }
    Ok(())
}

fn cmd_outputs(globals: &GlobalArgs, environment: &str, json: bool) -> Result<()> {
    let Some(lock) = state::load_lock(&globals.state_dir, environment)? else {
        println!(
            "No outputs for '{}'. Run `lakeforge deploy --env {}` first.",
            environment, environment
        );
        return Ok(());
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&lock.outputs)?);
    } else {
        print_outputs(&lock.outputs);
    }
    Ok(())
}

fn print_outputs(outputs: &indexmap::IndexMap<String, String>) {
    let width = outputs.keys().map(String::len).max().unwrap_or(0);
    for (k, v) in outputs {
        println!("  {:width$}  {}", k, v, width = width);
    }
}

fn cmd_status(state_dir: &Path) -> Result<()> {
    let environments = state::list_environments(state_dir)?;
    if environments.is_empty() {
        println!("No state found. Run `lakeforge deploy` first.");
        return Ok(());
    }
    for environment in environments {
        let Some(lock) = state::load_lock(state_dir, &environment)? else {
            continue;
        };
        println!("Environment: {} (stack {})", lock.environment, lock.stack_name);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        println!("  Template:  {}", lock.template_hash);
        println!("  Resources: {}", lock.resources.len());
        println!("  Outputs:   {}", lock.outputs.len());
        let last_run = eventlog::read_events(state_dir, &environment)?
            .into_iter()
            .rev()
            .find_map(|e| match e.event {
                types::ProvenanceEvent::DeployCompleted { run_id, .. } => {
                    Some(format!("{} deployed ({})", e.ts, run_id))
                }
                types::ProvenanceEvent::RunFailed { run_id, error, .. } => {
                    Some(format!("{} failed ({}): {}", e.ts, run_id, error))
                }
                _ => None,
            });
        if let Some(last_run) = last_run {
            println!("  Last run:  {}", last_run);
        }
        println!();
    }
    Ok(())
}

fn cmd_schema() -> Result<()> {
    let schema = schemars::schema_for!(types::EnvironmentConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn record_run_started(
    globals: &GlobalArgs,
    environment: &str,
    run_id: &str,
    command: &str,
) -> Result<()> {
    eventlog::append_event(
        &globals.state_dir,
        environment,
        types::ProvenanceEvent::RunStarted {
            environment: environment.to_string(),
            run_id: run_id.to_string(),
            command: command.to_string(),
            lakeforge_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )
}

/// Best effort: the original error is what the caller reports.
fn record_failure(globals: &GlobalArgs, environment: &str, run_id: &str, error: &Error) {
    let event = types::ProvenanceEvent::RunFailed {
        environment: environment.to_string(),
        run_id: run_id.to_string(),
        error: error.to_string(),
    };
    if let Err(e) = eventlog::append_event(&globals.state_dir, environment, event) {
        tracing::warn!(error = %e, "could not record failed run");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "accountId": "123456789012",
        "region": "us-east-1",
        "domainName": "ml-platform-dev",
        "projectPrefix": "mlp",
        "features": {
            "catalog": true, "queryEngine": true, "generativeAi": true,
            "knowledgeBase": true, "guardrails": true, "dataIngestion": true,
            "experimentPipeline": true
        },
        "tags": { "team": "data" }
    }"#;

    const NO_ASSETS: &str = r#"{
        "accountId": "123456789012",
        "region": "us-east-1",
        "domainName": "ml-platform-dev",
        "projectPrefix": "mlp",
        "features": { "catalog": false, "queryEngine": true }
    }"#;

    /// Config plus every asset the composed stack reads.
    fn project(config: &str, orchestrator: &str) -> (tempfile::TempDir, GlobalArgs) {
        let dir = tempfile::tempdir().unwrap();
        let globals = GlobalArgs {
            config_dir: dir.path().join("config"),
            state_dir: dir.path().join("state"),
            out_dir: dir.path().join("out"),
            assets_dir: dir.path().join("assets"),
            orchestrator: orchestrator.to_string(),
        };
        std::fs::create_dir_all(&globals.config_dir).unwrap();
        std::fs::write(globals.config_dir.join("dev.json"), config).unwrap();
        if let Ok(config) = parser::load_and_validate(&globals.config_dir, "dev") {
            for key in composer::compose(&config).unwrap().assets {
                let path = globals.assets_dir.join(key);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, "asset").unwrap();
            }
        }
        (dir, globals)
    }

    /// A stand-in `aws` that logs each call to `calls.log` and keeps a
    /// `created` marker for the stack.
    #[cfg(unix)]
    fn fake_orchestrator(dir: &Path, exit_code: i32, describe_exit: i32) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-aws");
        let script = r#"#!/bin/sh
echo "$*" >> @DIR/calls.log
case "$2" in
  describe-stacks)
    if [ ! -f @DIR/created ]; then
      echo "Stack with id mlp-dev does not exist" >&2
      exit 254
    fi
    echo '{"Stacks":[{"Outputs":[{"OutputKey":"VpcId","OutputValue":"vpc-1"}]}]}'
    exit @DESCRIBE
    ;;
  deploy)
    if [ @CODE = 0 ]; then touch @DIR/created; fi
    ;;
  delete-stack)
    rm -f @DIR/created
    ;;
esac
exit @CODE
"#
        .replace("@DIR", &dir.display().to_string())
        .replace("@CODE", &exit_code.to_string())
        .replace("@DESCRIBE", &describe_exit.to_string());
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    fn calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_init() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let config = dir.path().join("config");
        assert!(config.join("dev.json").exists());
        assert!(dir.path().join("state").is_dir());
        parser::load_and_validate(&config, "dev").unwrap();
    }

    #[test]
    fn test_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_validate() {
        let (_dir, g) = project(FULL, "aws");
        cmd_validate(&g, "dev").unwrap();
    }

    #[test]
    fn test_validate_invalid() {
        let (_dir, g) = project(
            r#"{"accountId":"12","region":"us-east-1","domainName":"d","projectPrefix":"mlp"}"#,
            "aws",
        );
        let err = cmd_validate(&g, "dev").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_validate_unknown_environment() {
        let (_dir, g) = project(FULL, "aws");
        let err = cmd_validate(&g, "prod").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_build_writes_artifacts_and_events() {
        let (_dir, g) = project(FULL, "aws");
        let (composition, template_path) = cmd_build(&g, "dev").unwrap();
        assert_eq!(template_path, g.out_dir.join("dev").join("template.json"));
        let manifest: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(g.out_dir.join("dev").join("manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["templateHash"], composition.template_hash().unwrap());
        assert_eq!(
            crate::tripwire::hasher::hash_file(&template_path).unwrap(),
            composition.template_hash().unwrap()
        );

        let events = eventlog::read_events(&g.state_dir, "dev").unwrap();
        assert_eq!(events.len(), 1 + types::Component::ALL.len());
        assert!(matches!(
            events[0].event,
            types::ProvenanceEvent::RunStarted { ref command, .. } if command == "build"
        ));
    }

    #[test]
    fn test_build_is_byte_identical() {
        let (_dir, g) = project(FULL, "aws");
        let (_, path) = cmd_build(&g, "dev").unwrap();
        let first = std::fs::read(&path).unwrap();
        cmd_build(&g, "dev").unwrap();
        assert_eq!(first, std::fs::read(&path).unwrap());
    }

    #[test]
    fn test_plan_without_lock() {
        let (_dir, g) = project(FULL, "aws");
        cmd_plan(&g, "dev").unwrap();
    }

    #[test]
    fn test_deploy_dry_run_leaves_no_lock() {
        let (_dir, g) = project(FULL, "lakeforge-no-such-binary");
        cmd_deploy(&g, "dev", true, false, None).unwrap();
        assert!(state::load_lock(&g.state_dir, "dev").unwrap().is_none());
        assert!(g.out_dir.join("dev").join("bootstrap.template.json").exists());
    }

    #[test]
    fn test_deploy_missing_orchestrator() {
        let (_dir, g) = project(FULL, "lakeforge-no-such-binary");
        let err = cmd_deploy(&g, "dev", false, false, None).unwrap_err();
        assert!(matches!(err, Error::Orchestrator { .. }));
        let events = eventlog::read_events(&g.state_dir, "dev").unwrap();
        assert!(matches!(
            events.last().unwrap().event,
            types::ProvenanceEvent::RunFailed { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_saves_lock_and_outputs() {
        let (dir, mut g) = project(FULL, "aws");
        g.orchestrator = fake_orchestrator(dir.path(), 0, 0);
        cmd_deploy(&g, "dev", false, false, None).unwrap();

        let lock = state::load_lock(&g.state_dir, "dev").unwrap().unwrap();
        assert_eq!(lock.stack_name, "mlp-dev");
        assert_eq!(lock.outputs["VpcId"], "vpc-1");
        assert!(lock.resources.contains_key("KnowledgeBase"));
        cmd_outputs(&g, "dev", false).unwrap();
        cmd_status(&g.state_dir).unwrap();

        // second deploy has nothing to change
        let config = parser::load_and_validate(&g.config_dir, "dev").unwrap();
        let composition = composer::compose(&config).unwrap();
        let plan = planner::plan("mlp-dev", &composition.template, Some(&lock)).unwrap();
        assert!(!plan.has_changes());
    }

    #[cfg(unix)]
    #[test]
    fn test_first_deploy_bootstraps_then_uploads() {
        let (dir, mut g) = project(FULL, "aws");
        g.orchestrator = fake_orchestrator(dir.path(), 0, 0);
        cmd_deploy(&g, "dev", false, false, None).unwrap();

        let calls = calls(dir.path());
        assert_eq!(calls.len(), 5, "{:?}", calls);
        assert!(calls[0].starts_with("cloudformation describe-stacks"));
        assert!(calls[1].starts_with("cloudformation deploy"));
        assert!(calls[1].contains("bootstrap.template.json"));
        assert!(calls[2].starts_with("s3 sync"));
        assert!(calls[2].contains("s3://mlp-code-"));
        assert!(calls[2].contains("--include scripts/glue-etl/sample-etl.py"));
        assert!(calls[2].contains("training/sourcedir.tar.gz"));
        assert!(calls[3].starts_with("cloudformation deploy"));
        assert!(calls[3].contains("/template.json"));
        assert!(calls[4].starts_with("cloudformation describe-stacks"));

        let bootstrap: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(g.out_dir.join("dev").join("bootstrap.template.json"))
                .unwrap(),
        )
        .unwrap();
        let resources = bootstrap["Resources"].as_object().unwrap();
        assert!(resources.contains_key("CodeBucket"));
        assert!(!resources.contains_key("IngestionFunction"));
        assert!(!resources.contains_key("ExperimentPipeline"));
    }

    #[cfg(unix)]
    #[test]
    fn test_redeploy_uploads_without_bootstrap() {
        let (dir, mut g) = project(FULL, "aws");
        g.orchestrator = fake_orchestrator(dir.path(), 0, 0);
        cmd_deploy(&g, "dev", false, false, None).unwrap();
        std::fs::remove_file(dir.path().join("calls.log")).unwrap();

        cmd_deploy(&g, "dev", false, true, None).unwrap();
        let calls = calls(dir.path());
        assert_eq!(calls.len(), 3, "{:?}", calls);
        assert!(calls[0].starts_with("s3 sync"));
        assert!(calls[1].contains("/template.json"));
        assert!(calls[2].starts_with("cloudformation describe-stacks"));
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_stack_without_lock_skips_bootstrap() {
        let (dir, mut g) = project(FULL, "aws");
        g.orchestrator = fake_orchestrator(dir.path(), 0, 0);
        std::fs::write(dir.path().join("created"), "").unwrap();
        cmd_deploy(&g, "dev", false, false, None).unwrap();

        let calls = calls(dir.path());
        assert!(calls.iter().all(|c| !c.contains("bootstrap.template.json")));
        assert!(calls[1].starts_with("s3 sync"));
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_without_assets_skips_upload() {
        let (dir, mut g) = project(NO_ASSETS, "aws");
        g.orchestrator = fake_orchestrator(dir.path(), 0, 0);
        cmd_deploy(&g, "dev", false, false, None).unwrap();

        let calls = calls(dir.path());
        assert_eq!(calls.len(), 2, "{:?}", calls);
        assert!(calls[0].contains("/template.json"));
        assert!(!g.out_dir.join("dev").join("bootstrap.template.json").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_asset_runs_nothing() {
        let (dir, mut g) = project(FULL, "aws");
        g.orchestrator = fake_orchestrator(dir.path(), 0, 0);
        std::fs::remove_file(
            g.assets_dir
                .join("sagemaker-scripts/experiment-pipeline/training/sourcedir.tar.gz"),
        )
        .unwrap();

        let err = cmd_deploy(&g, "dev", false, false, None).unwrap_err();
        assert!(matches!(err, Error::MissingAsset { .. }));
        assert!(calls(dir.path()).is_empty());
        assert!(state::load_lock(&g.state_dir, "dev").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_outputs_still_save_lock() {
        let (dir, mut g) = project(FULL, "aws");
        g.orchestrator = fake_orchestrator(dir.path(), 0, 1);
        cmd_deploy(&g, "dev", false, false, None).unwrap();

        let lock = state::load_lock(&g.state_dir, "dev").unwrap().unwrap();
        assert!(lock.outputs.is_empty());
        assert!(lock.resources.contains_key("ExperimentPipeline"));
        let events = eventlog::read_events(&g.state_dir, "dev").unwrap();
        assert!(matches!(
            events.last().unwrap().event,
            types::ProvenanceEvent::DeployCompleted { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_failure_keeps_previous_state() {
        let (dir, mut g) = project(FULL, "aws");
        g.orchestrator = fake_orchestrator(dir.path(), 1, 0);
        assert!(cmd_deploy(&g, "dev", false, false, None).is_err());
        assert!(state::load_lock(&g.state_dir, "dev").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_destroy_removes_lock() {
        let (dir, mut g) = project(FULL, "aws");
        g.orchestrator = fake_orchestrator(dir.path(), 0, 0);
        cmd_deploy(&g, "dev", false, false, None).unwrap();
        cmd_destroy(&g, "dev", false).unwrap();
        assert!(state::load_lock(&g.state_dir, "dev").unwrap().is_none());
        let events = eventlog::read_events(&g.state_dir, "dev").unwrap();
        assert!(matches!(
            events.last().unwrap().event,
            types::ProvenanceEvent::DestroyCompleted { .. }
        ));
    }

    #[test]
    fn test_destroy_dry_run() {
        let (_dir, g) = project(FULL, "lakeforge-no-such-binary");
        cmd_destroy(&g, "dev", true).unwrap();
    }

    #[test]
    fn test_outputs_without_lock() {
        let (_dir, g) = project(FULL, "aws");
        cmd_outputs(&g, "dev", true).unwrap();
    }

    #[test]
    fn test_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        cmd_status(&dir.path().join("state")).unwrap();
    }

    #[test]
    fn test_schema() {
        cmd_schema().unwrap();
    }

    #[test]
    fn test_install_missing_binary() {
        assert!(cmd_install(&Orchestrator::new("lakeforge-no-such-binary")).is_err());
    }
}
