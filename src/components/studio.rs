//! Unified studio: the governance domain, its default project, blueprint
//! configurations for each enabled capability, a catalog data source, and
//! the ML studio domain inside the workload subnets.

use super::catalog::CatalogOutputs;
use super::guardrail::GuardrailOutputs;
use super::identity::IdentityOutputs;
use super::knowledge_base::KnowledgeBaseOutputs;
use super::network::NetworkOutputs;
use super::query::QueryOutputs;
use super::storage::StorageOutputs;
use super::Naming;
use crate::core::error::{Error, Result};
use crate::core::template::{get_att, reference, sub, ResourceDescriptor, Template};
use crate::core::types::{EnvironmentConfig, NetworkAccess};
use serde_json::{json, Map, Value};

pub const TOOLING_BLUEPRINT: &str = "Tooling";
pub const DATA_LAKE_BLUEPRINT: &str = "DefaultDataLake";
pub const GENERATIVE_AI_BLUEPRINT: &str = "AmazonBedrockGenerativeAI";

pub struct StudioInputs<'a> {
    pub network: &'a NetworkOutputs,
    pub storage: &'a StorageOutputs,
    pub identity: &'a IdentityOutputs,
    pub catalog: Option<&'a CatalogOutputs>,
    pub query: Option<&'a QueryOutputs>,
    pub knowledge_base: Option<&'a KnowledgeBaseOutputs>,
    pub guardrail: Option<&'a GuardrailOutputs>,
}

#[derive(Debug, Clone)]
pub struct StudioOutputs {
    pub domain: String,
    pub project: String,
    /// `(logical id, blueprint identifier)` in declaration order
    pub blueprints: Vec<(String, &'static str)>,
    pub data_source: Option<String>,
    pub sagemaker_domain: String,
}

impl StudioOutputs {
    pub fn has_blueprint(&self, blueprint: &str) -> bool {
        self.blueprints.iter().any(|(_, b)| *b == blueprint)
    }
}

pub fn declare(
    template: &mut Template,
    config: &EnvironmentConfig,
    inputs: &StudioInputs,
) -> Result<StudioOutputs> {
    let naming = Naming::new(config);
    let execution_role = get_att(&inputs.identity.domain_execution_role, "Arn");

    let domain = template.add(
        "StudioDomain",
        ResourceDescriptor::new(
            "AWS::DataZone::Domain",
            json!({
                "Name": config.domain_name,
                "Description": format!("{} data and ML platform ({})", config.project_prefix, config.environment),
                "DomainExecutionRole": execution_role,
                "KmsKeyIdentifier": get_att(&inputs.storage.key, "Arn"),
                "Tags": naming.tags(),
            }),
        ),
    )?;
    let domain_id = get_att(&domain, "Id");

    let project = template.add(
        "StudioProject",
        ResourceDescriptor::new(
            "AWS::DataZone::Project",
            json!({
                "DomainIdentifier": domain_id,
                "Name": naming.resource("workspace"),
                "Description": "Default project for platform users",
            }),
        ),
    )?;

    let mut blueprints = Vec::new();
    let tooling = blueprint_parameters(&[
        ("S3Location", sub(&format!("s3://${{{}}}", inputs.storage.project))),
        ("VpcId", reference(&inputs.network.vpc)),
        ("Subnets", comma_joined(&inputs.network.workload_subnets)),
        ("SecurityGroupId", get_att(&inputs.network.security_group, "GroupId")),
    ]);
    blueprints.push((
        blueprint(template, &domain, &execution_role, "ToolingBlueprint", TOOLING_BLUEPRINT, tooling)?,
        TOOLING_BLUEPRINT,
    ));

    if inputs.catalog.is_some() || inputs.query.is_some() {
        let mut params = vec![(
            "S3Location",
            sub(&format!("s3://${{{}}}", inputs.storage.curated)),
        )];
        if let Some(catalog) = inputs.catalog {
            params.push(("GlueDatabase", reference(&catalog.database)));
        }
        if let Some(query) = inputs.query {
            params.push(("AthenaWorkgroup", reference(&query.workgroup)));
        }
        let id = blueprint(
            template,
            &domain,
            &execution_role,
            "DataLakeBlueprint",
            DATA_LAKE_BLUEPRINT,
            blueprint_parameters(&params),
        )?;
        blueprints.push((id, DATA_LAKE_BLUEPRINT));
    }

    if config.features.generative_ai
        || inputs.knowledge_base.is_some()
        || inputs.guardrail.is_some()
    {
        let mut params = Vec::new();
        if let Some(kb) = inputs.knowledge_base {
            params.push(("KnowledgeBaseId", get_att(&kb.knowledge_base, "KnowledgeBaseId")));
        }
        if let Some(guardrail) = inputs.guardrail {
            params.push(("GuardrailId", get_att(&guardrail.guardrail, "GuardrailId")));
        }
        let id = blueprint(
            template,
            &domain,
            &execution_role,
            "GenerativeAiBlueprint",
            GENERATIVE_AI_BLUEPRINT,
            blueprint_parameters(&params),
        )?;
        blueprints.push((id, GENERATIVE_AI_BLUEPRINT));
    }

    let data_source = match inputs.catalog {
        Some(catalog) => {
            let glue_role = inputs.identity.glue_role.as_deref().ok_or_else(|| {
                Error::declaration("catalog data source requires the catalog service role")
            })?;
            Some(template.add(
                "CatalogDataSource",
                ResourceDescriptor::new(
                    "AWS::DataZone::DataSource",
                    json!({
                        "DomainIdentifier": domain_id,
                        "ProjectIdentifier": get_att(&project, "Id"),
                        "Name": naming.resource("catalog-source"),
                        "Type": "GLUE",
                        "EnableSetting": "ENABLED",
                        "PublishOnImport": false,
                        "Configuration": {
                            "Glue": {
                                "DataAccessRole": get_att(glue_role, "Arn"),
                                "RelationalFilterConfigurations": [{
                                    "DatabaseName": reference(&catalog.database),
                                }],
                            },
                        },
                    }),
                ),
            )?)
        }
        None => None,
    };

    let network_access = match inputs.network.mode {
        NetworkAccess::Isolated => "VpcOnly",
        NetworkAccess::Public => "PublicInternetOnly",
    };
    let subnets: Vec<Value> = inputs
        .network
        .workload_subnets
        .iter()
        .map(|s| reference(s))
        .collect();
    let sagemaker_domain = template.add(
        "SageMakerDomain",
        ResourceDescriptor::new(
            "AWS::SageMaker::Domain",
            json!({
                "DomainName": naming.resource("studio"),
                "AuthMode": "IAM",
                "AppNetworkAccessType": network_access,
                "VpcId": reference(&inputs.network.vpc),
                "SubnetIds": subnets,
                "KmsKeyId": reference(&inputs.storage.key),
                "DefaultUserSettings": {
                    "ExecutionRole": get_att(&inputs.identity.sagemaker_execution_role, "Arn"),
                    "SecurityGroups": [get_att(&inputs.network.security_group, "GroupId")],
                },
                "Tags": naming.tags(),
            }),
        ),
    )?;

    tracing::info!(
        domain = %config.domain_name,
        blueprints = blueprints.len(),
        catalog_source = data_source.is_some(),
        "studio declared"
    );
    Ok(StudioOutputs {
        domain,
        project,
        blueprints,
        data_source,
        sagemaker_domain,
    })
}

fn blueprint(
    template: &mut Template,
    domain: &str,
    role: &Value,
    logical_id: &str,
    identifier: &str,
    parameters: Value,
) -> Result<String> {
    template.add(
        logical_id,
        ResourceDescriptor::new(
            "AWS::DataZone::EnvironmentBlueprintConfiguration",
            json!({
                "DomainIdentifier": get_att(domain, "Id"),
                "EnvironmentBlueprintIdentifier": identifier,
                "EnabledRegions": [reference("AWS::Region")],
                "ManageAccessRoleArn": role,
                "ProvisioningRoleArn": role,
                "RegionalParameters": [{
                    "Region": reference("AWS::Region"),
                    "Parameters": parameters,
                }],
            }),
        ),
    )
}

fn blueprint_parameters(pairs: &[(&str, Value)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Value::Object(map)
}

fn comma_joined(ids: &[String]) -> Value {
    let refs: Vec<Value> = ids.iter().map(|id| reference(id)).collect();
    json!({ "Fn::Join": [",", refs] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::identity::{self, IdentityInputs};
    use crate::components::{catalog, fixtures, guardrail, network, storage};

    fn minimal(config: &EnvironmentConfig) -> (Template, StudioOutputs) {
        let mut t = Template::new("t");
        let n = network::declare(&mut t, config).unwrap();
        let s = storage::declare(&mut t, config).unwrap();
        let id = identity::declare(
            &mut t,
            config,
            &IdentityInputs {
                storage: &s,
                catalog: None,
                query: None,
                knowledge_base: None,
                guardrail: None,
                ingestion: None,
                experiment: None,
            },
        )
        .unwrap();
        let out = declare(
            &mut t,
            config,
            &StudioInputs {
                network: &n,
                storage: &s,
                identity: &id,
                catalog: None,
                query: None,
                knowledge_base: None,
                guardrail: None,
            },
        )
        .unwrap();
        (t, out)
    }

    #[test]
    fn test_minimal_studio_has_tooling_only() {
        let config = fixtures::config();
        let (t, out) = minimal(&config);
        assert_eq!(out.blueprints.len(), 1);
        assert!(out.has_blueprint(TOOLING_BLUEPRINT));
        assert!(out.data_source.is_none());
        assert_eq!(
            t.resources[&out.domain].properties["Name"],
            "ml-platform-dev"
        );
        t.check_references().unwrap();
    }

    #[test]
    fn test_sagemaker_domain_network_mode() {
        let config = fixtures::config();
        let (t, out) = minimal(&config);
        let props = &t.resources[&out.sagemaker_domain].properties;
        assert_eq!(props["AppNetworkAccessType"], "PublicInternetOnly");
        assert_eq!(props["SubnetIds"], json!([reference("PrivateSubnet1"), reference("PrivateSubnet2")]));

        let mut isolated = fixtures::config();
        isolated.network_access = NetworkAccess::Isolated;
        let (t, out) = minimal(&isolated);
        let props = &t.resources[&out.sagemaker_domain].properties;
        assert_eq!(props["AppNetworkAccessType"], "VpcOnly");
        assert_eq!(props["SubnetIds"][0], reference("IsolatedSubnet1"));
    }

    #[test]
    fn test_catalog_and_guardrail_integrations() {
        let mut config = fixtures::config();
        config.features.catalog = true;
        config.features.generative_ai = true;
        config.features.guardrails = true;
        let mut t = Template::new("t");
        let n = network::declare(&mut t, &config).unwrap();
        let s = storage::declare(&mut t, &config).unwrap();
        let c = catalog::declare(&mut t, &config, &s).unwrap();
        let g = guardrail::declare(&mut t, &config).unwrap();
        let id = identity::declare(
            &mut t,
            &config,
            &IdentityInputs {
                storage: &s,
                catalog: Some(&c),
                query: None,
                knowledge_base: None,
                guardrail: Some(&g),
                ingestion: None,
                experiment: None,
            },
        )
        .unwrap();
        let out = declare(
            &mut t,
            &config,
            &StudioInputs {
                network: &n,
                storage: &s,
                identity: &id,
                catalog: Some(&c),
                query: None,
                knowledge_base: None,
                guardrail: Some(&g),
            },
        )
        .unwrap();
        assert!(out.has_blueprint(DATA_LAKE_BLUEPRINT));
        assert!(out.has_blueprint(GENERATIVE_AI_BLUEPRINT));
        assert_eq!(out.data_source.as_deref(), Some("CatalogDataSource"));
        let genai = &t.resources["GenerativeAiBlueprint"].properties["RegionalParameters"][0]
            ["Parameters"];
        assert_eq!(genai["GuardrailId"], get_att("Guardrail", "GuardrailId"));
        assert!(genai.get("KnowledgeBaseId").is_none());
        let lake = &t.resources["DataLakeBlueprint"].properties["RegionalParameters"][0]
            ["Parameters"];
        assert!(lake.get("AthenaWorkgroup").is_none());
        t.check_references().unwrap();
    }
}
