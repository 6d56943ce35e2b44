//! Composition driver: construct every active component in dependency
//! order, thread outputs between them, and finish the template.
//!
//! Optional component outputs travel as `Option`; consumers omit the
//! integration when they are absent. After all components are declared the
//! template must have no dangling references and an acyclic resource graph.

use super::error::{Error, Result};
use super::parser;
use super::resolver::{build_component_order, build_resource_order};
use super::template::{get_att, reference, sub, Template};
use super::types::{Component, ComponentRecord, ComponentStatus, EnvironmentConfig};
use crate::components::catalog::{self, CatalogOutputs};
use crate::components::experiment::{self, ExperimentPipelineOutputs};
use crate::components::guardrail::{self, GuardrailOutputs};
use crate::components::identity::{self, IdentityInputs, IdentityOutputs};
use crate::components::ingestion::{self, IngestionOutputs};
use crate::components::knowledge_base::{self, KnowledgeBaseOutputs};
use crate::components::network::{self, NetworkOutputs};
use crate::components::query::{self, QueryOutputs};
use crate::components::storage::{self, StorageOutputs};
use crate::components::studio::{self, StudioInputs, StudioOutputs};
use crate::components::Naming;
use crate::tripwire::hasher;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// A composed environment: the template plus what happened to each component.
#[derive(Debug, Clone)]
pub struct Composition {
    pub config: EnvironmentConfig,
    pub template: Template,
    pub records: Vec<ComponentRecord>,
    pub resource_order: Vec<String>,
    /// Physical name of the code bucket assets are uploaded to.
    pub code_bucket: String,
    /// Code-bucket keys that constructed components read at deploy time.
    pub assets: Vec<String>,
}

impl Composition {
    pub fn constructed(&self) -> Vec<Component> {
        self.records
            .iter()
            .filter(|r| r.is_constructed())
            .map(|r| r.component)
            .collect()
    }

    pub fn template_hash(&self) -> Result<String> {
        hasher::hash_template(&self.template)
    }

    pub fn manifest(&self) -> Result<Manifest> {
        Ok(Manifest {
            environment: self.config.environment.clone(),
            stack_name: self.config.stack_name(),
            template_hash: self.template_hash()?,
            generator: format!("lakeforge {}", env!("CARGO_PKG_VERSION")),
            components: self.records.clone(),
            resource_order: self.resource_order.clone(),
            code_bucket: self.code_bucket.clone(),
            assets: self.assets.clone(),
        })
    }
}

/// Build summary written next to the template.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub environment: String,
    pub stack_name: String,
    pub template_hash: String,
    pub generator: String,
    pub components: Vec<ComponentRecord>,
    pub resource_order: Vec<String>,
    pub code_bucket: String,
    pub assets: Vec<String>,
}

/// Load, validate and compose one environment. Nothing is constructed if
/// the environment cannot be loaded.
pub fn compose_environment(config_dir: &Path, environment: &str) -> Result<Composition> {
    let config = parser::load_and_validate(config_dir, environment)?;
    compose(&config)
}

/// The same stack with every asset reader held back. A first deploy
/// applies this so the code bucket exists before assets are uploaded.
pub fn compose_bootstrap(config: &EnvironmentConfig) -> Result<Composition> {
    let mut bootstrap = config.clone();
    bootstrap.features = config.features.without_asset_consumers();
    compose(&bootstrap)
}

#[derive(Default)]
struct Declared {
    network: Option<NetworkOutputs>,
    storage: Option<StorageOutputs>,
    catalog: Option<CatalogOutputs>,
    query: Option<QueryOutputs>,
    knowledge_base: Option<KnowledgeBaseOutputs>,
    guardrail: Option<GuardrailOutputs>,
    ingestion: Option<IngestionOutputs>,
    experiment: Option<ExperimentPipelineOutputs>,
    identity: Option<IdentityOutputs>,
    studio: Option<StudioOutputs>,
}

fn required<'a, T>(outputs: &'a Option<T>, needed: Component, by: Component) -> Result<&'a T> {
    outputs.as_ref().ok_or_else(|| {
        Error::declaration(format!("{} must be constructed before {}", needed, by))
    })
}

pub fn compose(config: &EnvironmentConfig) -> Result<Composition> {
    let order = build_component_order(&config.features)?;
    let mut template = Template::new(format!(
        "{} data and ML platform ({})",
        config.project_prefix, config.environment
    ));
    let mut declared = Declared::default();
    let mut counts: HashMap<Component, usize> = HashMap::new();

    for component in order {
        let before = template.resources.len();
        declare_component(&mut template, config, &mut declared, component)?;
        let resources = template.resources.len() - before;
        tracing::info!(environment = %config.environment, %component, resources, "component constructed");
        counts.insert(component, resources);
    }

    wire_role_dependencies(&mut template, &declared)?;
    declare_outputs(&mut template, &declared)?;
    template.check_references()?;
    let resource_order = build_resource_order(&template)?;
    let code_bucket = Naming::new(config).bucket("code")?;
    let assets = asset_keys(&declared);

    let records = Component::ALL
        .into_iter()
        .map(|component| {
            let status = match counts.get(&component) {
                Some(&resources) => ComponentStatus::Constructed { resources },
                None => {
                    let reason = config
                        .features
                        .skip_reason(component)
                        .unwrap_or_else(|| "not active".to_string());
                    tracing::warn!(environment = %config.environment, %component, %reason, "component skipped");
                    ComponentStatus::Skipped { reason }
                }
            };
            ComponentRecord { component, status }
        })
        .collect();

    Ok(Composition {
        config: config.clone(),
        template,
        records,
        resource_order,
        code_bucket,
        assets,
    })
}

fn asset_keys(d: &Declared) -> Vec<String> {
    let mut keys = Vec::new();
    if d.catalog.is_some() {
        keys.push(catalog::ETL_SCRIPT_KEY.to_string());
    }
    if d.ingestion.is_some() {
        keys.push(ingestion::CODE_KEY.to_string());
    }
    if let Some(pipeline) = &d.experiment {
        keys.extend(pipeline.asset_keys());
    }
    keys
}

fn declare_component(
    template: &mut Template,
    config: &EnvironmentConfig,
    d: &mut Declared,
    component: Component,
) -> Result<()> {
    match component {
        Component::Network => d.network = Some(network::declare(template, config)?),
        Component::Storage => d.storage = Some(storage::declare(template, config)?),
        Component::Catalog => {
            let storage = required(&d.storage, Component::Storage, component)?;
            d.catalog = Some(catalog::declare(template, config, storage)?);
        }
        Component::Query => {
            let storage = required(&d.storage, Component::Storage, component)?;
            d.query = Some(query::declare(template, config, storage, d.catalog.as_ref())?);
        }
        Component::KnowledgeBase => {
            let storage = required(&d.storage, Component::Storage, component)?;
            d.knowledge_base = Some(knowledge_base::declare(template, config, storage)?);
        }
        Component::Guardrail => d.guardrail = Some(guardrail::declare(template, config)?),
        Component::Ingestion => {
            let storage = required(&d.storage, Component::Storage, component)?;
            d.ingestion = Some(ingestion::declare(template, config, storage)?);
        }
        Component::ExperimentPipeline => {
            let storage = required(&d.storage, Component::Storage, component)?;
            d.experiment = Some(experiment::declare(template, config, storage)?);
        }
        Component::Identity => {
            let inputs = IdentityInputs {
                storage: required(&d.storage, Component::Storage, component)?,
                catalog: d.catalog.as_ref(),
                query: d.query.as_ref(),
                knowledge_base: d.knowledge_base.as_ref(),
                guardrail: d.guardrail.as_ref(),
                ingestion: d.ingestion.as_ref(),
                experiment: d.experiment.as_ref(),
            };
            d.identity = Some(identity::declare(template, config, &inputs)?);
        }
        Component::Studio => {
            let inputs = StudioInputs {
                network: required(&d.network, Component::Network, component)?,
                storage: required(&d.storage, Component::Storage, component)?,
                identity: required(&d.identity, Component::Identity, component)?,
                catalog: d.catalog.as_ref(),
                query: d.query.as_ref(),
                knowledge_base: d.knowledge_base.as_ref(),
                guardrail: d.guardrail.as_ref(),
            };
            d.studio = Some(studio::declare(template, config, &inputs)?);
        }
    }
    Ok(())
}

/// Resources naming a role by ARN wait for that role to exist.
fn wire_role_dependencies(template: &mut Template, d: &Declared) -> Result<()> {
    let Some(roles) = &d.identity else {
        return Ok(());
    };
    if let (Some(catalog), Some(role)) = (&d.catalog, &roles.glue_role) {
        for consumer in catalog.role_consumers() {
            template.add_dependency(consumer, role)?;
        }
    }
    if let (Some(kb), Some(role)) = (&d.knowledge_base, &roles.knowledge_base_role) {
        for consumer in kb.role_consumers() {
            template.add_dependency(consumer, role)?;
        }
    }
    if let (Some(ingestion), Some(role)) = (&d.ingestion, &roles.ingestion_role) {
        template.add_dependency(&ingestion.function, role)?;
    }
    if let Some(pipeline) = &d.experiment {
        template.add_dependency(&pipeline.pipeline, &roles.sagemaker_execution_role)?;
    }
    Ok(())
}

fn declare_outputs(template: &mut Template, d: &Declared) -> Result<()> {
    let storage = required(&d.storage, Component::Storage, Component::Studio)?;
    let network = required(&d.network, Component::Network, Component::Studio)?;
    let roles = required(&d.identity, Component::Identity, Component::Studio)?;
    let studio = required(&d.studio, Component::Studio, Component::Studio)?;

    let always = [
        ("RawBucketName", "Raw data bucket", reference(&storage.raw)),
        ("CuratedBucketName", "Curated data bucket", reference(&storage.curated)),
        ("ProjectBucketName", "Project workspace bucket", reference(&storage.project)),
        ("LogsBucketName", "Access log bucket", reference(&storage.logs)),
        ("CodeBucketName", "Code and asset bucket", reference(&storage.code)),
        ("KmsKeyArn", "Shared data encryption key", get_att(&storage.key, "Arn")),
        ("VpcId", "Platform network", reference(&network.vpc)),
        ("DomainId", "Studio governance domain", get_att(&studio.domain, "Id")),
        (
            "SageMakerDomainId",
            "ML studio domain",
            get_att(&studio.sagemaker_domain, "DomainId"),
        ),
        (
            "DomainExecutionRoleArn",
            "Studio domain execution role",
            get_att(&roles.domain_execution_role, "Arn"),
        ),
        (
            "SageMakerExecutionRoleArn",
            "ML studio execution role",
            get_att(&roles.sagemaker_execution_role, "Arn"),
        ),
    ];
    for (name, description, value) in always {
        template.add_output(name, description, value)?;
    }

    if let Some(catalog) = &d.catalog {
        template.add_output("GlueDatabaseName", "Catalog database", reference(&catalog.database))?;
    }
    if let Some(role) = &roles.glue_role {
        template.add_output("GlueRoleArn", "Catalog service role", get_att(role, "Arn"))?;
    }
    if let Some(query) = &d.query {
        template.add_output("AthenaWorkgroupName", "Query workgroup", reference(&query.workgroup))?;
    }
    if let Some(kb) = &d.knowledge_base {
        template.add_output(
            "KnowledgeBaseId",
            "Retrieval knowledge base",
            get_att(&kb.knowledge_base, "KnowledgeBaseId"),
        )?;
    }
    if let Some(role) = &roles.knowledge_base_role {
        template.add_output("KnowledgeBaseRoleArn", "Knowledge base service role", get_att(role, "Arn"))?;
    }
    if let Some(guardrail) = &d.guardrail {
        template.add_output(
            "GuardrailId",
            "Content safety guardrail",
            get_att(&guardrail.guardrail, "GuardrailId"),
        )?;
    }
    if let Some(ingestion) = &d.ingestion {
        template.add_output(
            "IngestionFunctionName",
            "Data ingestion function",
            reference(&ingestion.function),
        )?;
    }
    if let Some(pipeline) = &d.experiment {
        template.add_output(
            "ExperimentPipelineName",
            "ML experiment pipeline",
            reference(&pipeline.pipeline),
        )?;
        template.add_output(
            "ModelArtifactsUri",
            "Experiment model artifacts",
            sub(&format!(
                "s3://${{{}}}/{}models/",
                storage.project,
                experiment::ARTIFACT_PREFIX
            )),
        )?;
    }
    Ok(())
}
