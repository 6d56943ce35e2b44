//! Roles and policies granting each constructed component's service
//! principal access to the resources it uses.
//!
//! Role names are deterministic so components declared earlier can name
//! their role ARN before this component runs; the composition driver adds
//! the `DependsOn` edges once the roles exist. Statements for components
//! that were not constructed are simply left out.

use super::experiment::{self, ExperimentPipelineOutputs};
use super::guardrail::GuardrailOutputs;
use super::ingestion::IngestionOutputs;
use super::knowledge_base::KnowledgeBaseOutputs;
use super::query::QueryOutputs;
use super::storage::{bucket_and_objects, StorageOutputs};
use super::{catalog::CatalogOutputs, Naming};
use crate::core::error::Result;
use crate::core::template::{get_att, sub, ResourceDescriptor, Template};
use crate::core::types::EnvironmentConfig;
use serde_json::{json, Value};

/// Service roles the platform declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    DomainExecution,
    SageMakerExecution,
    Glue,
    KnowledgeBase,
    Ingestion,
}

impl ServiceRole {
    pub fn logical_id(&self) -> &'static str {
        match self {
            Self::DomainExecution => "DomainExecutionRole",
            Self::SageMakerExecution => "SageMakerExecutionRole",
            Self::Glue => "GlueServiceRole",
            Self::KnowledgeBase => "KnowledgeBaseRole",
            Self::Ingestion => "IngestionRole",
        }
    }

    fn purpose(&self) -> &'static str {
        match self {
            Self::DomainExecution => "domain-execution",
            Self::SageMakerExecution => "sagemaker-execution",
            Self::Glue => "glue-service",
            Self::KnowledgeBase => "kb-service",
            Self::Ingestion => "ingestion",
        }
    }

    fn principal(&self) -> &'static str {
        match self {
            Self::DomainExecution => "datazone.amazonaws.com",
            Self::SageMakerExecution => "sagemaker.amazonaws.com",
            Self::Glue => "glue.amazonaws.com",
            Self::KnowledgeBase => "bedrock.amazonaws.com",
            Self::Ingestion => "lambda.amazonaws.com",
        }
    }

    fn managed_policies(&self) -> &'static [&'static str] {
        match self {
            Self::DomainExecution => &["service-role/AmazonDataZoneDomainExecutionRolePolicy"],
            Self::SageMakerExecution => &["AmazonSageMakerFullAccess"],
            Self::Glue => &["service-role/AWSGlueServiceRole"],
            Self::KnowledgeBase => &[],
            Self::Ingestion => &["service-role/AWSLambdaBasicExecutionRole"],
        }
    }
}

/// Physical role name.
pub fn role_name(naming: &Naming, role: ServiceRole) -> String {
    naming.resource(role.purpose())
}

/// Role ARN built from the account and role name, usable before the role
/// is declared.
pub fn role_arn(naming: &Naming, role: ServiceRole) -> Value {
    sub(&format!(
        "arn:${{AWS::Partition}}:iam::${{AWS::AccountId}}:role/{}",
        role_name(naming, role)
    ))
}

/// Everything identity grants access to. Absent components get no grants.
pub struct IdentityInputs<'a> {
    pub storage: &'a StorageOutputs,
    pub catalog: Option<&'a CatalogOutputs>,
    pub query: Option<&'a QueryOutputs>,
    pub knowledge_base: Option<&'a KnowledgeBaseOutputs>,
    pub guardrail: Option<&'a GuardrailOutputs>,
    pub ingestion: Option<&'a IngestionOutputs>,
    pub experiment: Option<&'a ExperimentPipelineOutputs>,
}

#[derive(Debug, Clone)]
pub struct IdentityOutputs {
    pub domain_execution_role: String,
    pub sagemaker_execution_role: String,
    pub glue_role: Option<String>,
    pub knowledge_base_role: Option<String>,
    pub ingestion_role: Option<String>,
}

impl IdentityOutputs {
    pub fn roles(&self) -> Vec<&str> {
        let mut roles = vec![
            self.domain_execution_role.as_str(),
            self.sagemaker_execution_role.as_str(),
        ];
        roles.extend(self.glue_role.as_deref());
        roles.extend(self.knowledge_base_role.as_deref());
        roles.extend(self.ingestion_role.as_deref());
        roles
    }
}

pub fn declare(
    template: &mut Template,
    config: &EnvironmentConfig,
    inputs: &IdentityInputs,
) -> Result<IdentityOutputs> {
    let naming = Naming::new(config);
    let storage = inputs.storage;

    let domain_execution_role = declare_role(
        template,
        &naming,
        ServiceRole::DomainExecution,
        vec![kms_use(&storage.key)],
    )?;

    let sagemaker_execution_role = declare_role(
        template,
        &naming,
        ServiceRole::SageMakerExecution,
        sagemaker_statements(config, inputs),
    )?;

    let glue_role = inputs
        .catalog
        .map(|catalog| {
            let statements = vec![
                s3_read(&[storage.raw.as_str(), storage.code.as_str()]),
                s3_read_write(&[storage.curated.as_str()]),
                kms_use(&storage.key),
                glue_catalog(&catalog.database, true),
            ];
            declare_role(template, &naming, ServiceRole::Glue, statements)
        })
        .transpose()?;

    let knowledge_base_role = inputs
        .knowledge_base
        .map(|kb| {
            let statements = vec![
                s3_read(&[storage.project.as_str()]),
                kms_use(&storage.key),
                statement(
                    "InvokeEmbeddingModel",
                    &["bedrock:InvokeModel"],
                    json!([sub(&format!(
                        "arn:${{AWS::Partition}}:bedrock:${{AWS::Region}}::foundation-model/{}",
                        kb.embedding_model
                    ))]),
                ),
                statement(
                    "VectorCollectionAccess",
                    &["aoss:APIAccessAll"],
                    json!([get_att(&kb.collection, "Arn")]),
                ),
            ];
            declare_role(template, &naming, ServiceRole::KnowledgeBase, statements)
        })
        .transpose()?;

    let ingestion_role = inputs
        .ingestion
        .map(|_| {
            let statements = vec![
                statement(
                    "WriteRawData",
                    &["s3:PutObject", "s3:ListBucket"],
                    bucket_and_objects(&storage.raw),
                ),
                kms_use(&storage.key),
            ];
            declare_role(template, &naming, ServiceRole::Ingestion, statements)
        })
        .transpose()?;

    let outputs = IdentityOutputs {
        domain_execution_role,
        sagemaker_execution_role,
        glue_role,
        knowledge_base_role,
        ingestion_role,
    };
    tracing::info!(roles = outputs.roles().len(), "identity declared");
    Ok(outputs)
}

/// Statements for the studio users' execution role.
fn sagemaker_statements(config: &EnvironmentConfig, inputs: &IdentityInputs) -> Vec<Value> {
    let storage = inputs.storage;
    let mut statements = vec![
        s3_read_write(&storage.data_buckets()),
        kms_use(&storage.key),
    ];
    if let Some(catalog) = inputs.catalog {
        statements.push(glue_catalog(&catalog.database, false));
        statements.push(statement(
            "RunCatalogJobs",
            &["glue:StartJobRun", "glue:GetJobRun", "glue:StartCrawler", "glue:GetCrawler"],
            json!([
                sub(&format!(
                    "arn:${{AWS::Partition}}:glue:${{AWS::Region}}:${{AWS::AccountId}}:job/${{{}}}",
                    catalog.etl_job
                )),
                sub(&format!(
                    "arn:${{AWS::Partition}}:glue:${{AWS::Region}}:${{AWS::AccountId}}:crawler/${{{}}}",
                    catalog.crawler
                )),
            ]),
        ));
        statements.push(statement(
            "PassCatalogRole",
            &["iam:PassRole"],
            json!([role_arn(&Naming::new(config), ServiceRole::Glue)]),
        ));
    }
    if let Some(query) = inputs.query {
        statements.push(statement(
            "QueryWorkgroup",
            &[
                "athena:StartQueryExecution",
                "athena:StopQueryExecution",
                "athena:GetQueryExecution",
                "athena:GetQueryResults",
                "athena:GetWorkGroup",
            ],
            json!([sub(&format!(
                "arn:${{AWS::Partition}}:athena:${{AWS::Region}}:${{AWS::AccountId}}:workgroup/${{{}}}",
                query.workgroup
            ))]),
        ));
    }
    if config.features.generative_ai {
        statements.push(statement(
            "InvokeFoundationModels",
            &["bedrock:InvokeModel", "bedrock:InvokeModelWithResponseStream"],
            json!([sub(
                "arn:${AWS::Partition}:bedrock:${AWS::Region}::foundation-model/*"
            )]),
        ));
    }
    if let Some(kb) = inputs.knowledge_base {
        statements.push(statement(
            "QueryKnowledgeBase",
            &["bedrock:Retrieve", "bedrock:RetrieveAndGenerate"],
            json!([get_att(&kb.knowledge_base, "KnowledgeBaseArn")]),
        ));
    }
    if let Some(guardrail) = inputs.guardrail {
        statements.push(statement(
            "ApplyGuardrail",
            &["bedrock:ApplyGuardrail"],
            json!([get_att(&guardrail.guardrail, "GuardrailArn")]),
        ));
    }
    if let Some(ingestion) = inputs.ingestion {
        statements.push(statement(
            "TriggerIngestion",
            &["lambda:InvokeFunction"],
            json!([get_att(&ingestion.function, "Arn")]),
        ));
    }
    if let Some(pipeline) = inputs.experiment {
        statements.extend(pipeline_statements(config, storage, pipeline));
    }
    statements
}

/// The pipeline runs as the execution role, so the role both starts it and
/// launches its jobs. The pipeline is named, not referenced, because it
/// already depends on this role.
fn pipeline_statements(
    config: &EnvironmentConfig,
    storage: &StorageOutputs,
    pipeline: &ExperimentPipelineOutputs,
) -> Vec<Value> {
    let naming = Naming::new(config);
    vec![
        statement(
            "ReadPipelineScripts",
            &["s3:GetObject"],
            json!([sub(&format!(
                "arn:${{AWS::Partition}}:s3:::${{{}}}/{}*",
                storage.code,
                experiment::SCRIPT_PREFIX
            ))]),
        ),
        statement(
            "WritePipelineArtifacts",
            &["s3:GetObject", "s3:PutObject"],
            json!([sub(&format!(
                "arn:${{AWS::Partition}}:s3:::${{{}}}/{}*",
                storage.project,
                experiment::ARTIFACT_PREFIX
            ))]),
        ),
        statement(
            "RunExperimentPipeline",
            &[
                "sagemaker:StartPipelineExecution",
                "sagemaker:StopPipelineExecution",
                "sagemaker:DescribePipeline",
                "sagemaker:DescribePipelineExecution",
                "sagemaker:ListPipelineExecutionSteps",
            ],
            json!([
                sub(&format!(
                    "arn:${{AWS::Partition}}:sagemaker:${{AWS::Region}}:${{AWS::AccountId}}:pipeline/{}",
                    pipeline.pipeline_name
                )),
                sub(&format!(
                    "arn:${{AWS::Partition}}:sagemaker:${{AWS::Region}}:${{AWS::AccountId}}:pipeline/{}/execution/*",
                    pipeline.pipeline_name
                )),
            ]),
        ),
        statement(
            "LaunchPipelineJobs",
            &[
                "sagemaker:CreateProcessingJob",
                "sagemaker:DescribeProcessingJob",
                "sagemaker:CreateTrainingJob",
                "sagemaker:DescribeTrainingJob",
                "sagemaker:AddTags",
            ],
            json!([
                sub("arn:${AWS::Partition}:sagemaker:${AWS::Region}:${AWS::AccountId}:processing-job/*"),
                sub("arn:${AWS::Partition}:sagemaker:${AWS::Region}:${AWS::AccountId}:training-job/*"),
            ]),
        ),
        json!({
            "Sid": "PassExecutionRole",
            "Effect": "Allow",
            "Action": ["iam:PassRole"],
            "Resource": [role_arn(&naming, ServiceRole::SageMakerExecution)],
            "Condition": {
                "StringEquals": { "iam:PassedToService": "sagemaker.amazonaws.com" },
            },
        }),
    ]
}

fn declare_role(
    template: &mut Template,
    naming: &Naming,
    role: ServiceRole,
    statements: Vec<Value>,
) -> Result<String> {
    let managed: Vec<Value> = role
        .managed_policies()
        .iter()
        .map(|p| sub(&format!("arn:${{AWS::Partition}}:iam::aws:policy/{}", p)))
        .collect();
    let mut assume_actions = vec!["sts:AssumeRole"];
    if role == ServiceRole::DomainExecution {
        assume_actions.push("sts:TagSession");
    }
    template.add(
        role.logical_id(),
        ResourceDescriptor::new(
            "AWS::IAM::Role",
            json!({
                "RoleName": role_name(naming, role),
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "Service": role.principal() },
                        "Action": assume_actions,
                        "Condition": {
                            "StringEquals": { "aws:SourceAccount": sub("${AWS::AccountId}") },
                        },
                    }],
                },
                "ManagedPolicyArns": managed,
                "Policies": [{
                    "PolicyName": "platform-access",
                    "PolicyDocument": { "Version": "2012-10-17", "Statement": statements },
                }],
                "Tags": naming.tags(),
            }),
        ),
    )
}

fn statement(sid: &str, actions: &[&str], resources: Value) -> Value {
    json!({ "Sid": sid, "Effect": "Allow", "Action": actions, "Resource": resources })
}

fn bucket_resources(buckets: &[&str]) -> Value {
    Value::Array(
        buckets
            .iter()
            .flat_map(|b| match bucket_and_objects(b) {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect(),
    )
}

fn s3_read(buckets: &[&str]) -> Value {
    statement(
        "ReadBuckets",
        &["s3:GetObject", "s3:ListBucket", "s3:GetBucketLocation"],
        bucket_resources(buckets),
    )
}

fn s3_read_write(buckets: &[&str]) -> Value {
    statement(
        "ReadWriteBuckets",
        &[
            "s3:GetObject",
            "s3:PutObject",
            "s3:DeleteObject",
            "s3:ListBucket",
            "s3:GetBucketLocation",
        ],
        bucket_resources(buckets),
    )
}

fn kms_use(key: &str) -> Value {
    statement(
        "UseDataKey",
        &["kms:Decrypt", "kms:Encrypt", "kms:GenerateDataKey*", "kms:DescribeKey"],
        json!([get_att(key, "Arn")]),
    )
}

fn glue_catalog(database: &str, write: bool) -> Value {
    let mut actions = vec![
        "glue:GetDatabase",
        "glue:GetTables",
        "glue:GetTable",
        "glue:GetPartitions",
    ];
    if write {
        actions.extend([
            "glue:CreateTable",
            "glue:UpdateTable",
            "glue:BatchCreatePartition",
        ]);
    }
    statement(
        "CatalogAccess",
        &actions,
        json!([
            sub("arn:${AWS::Partition}:glue:${AWS::Region}:${AWS::AccountId}:catalog"),
            sub(&format!(
                "arn:${{AWS::Partition}}:glue:${{AWS::Region}}:${{AWS::AccountId}}:database/${{{}}}",
                database
            )),
            sub(&format!(
                "arn:${{AWS::Partition}}:glue:${{AWS::Region}}:${{AWS::AccountId}}:table/${{{}}}/*",
                database
            )),
        ]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{catalog, fixtures, storage};

    #[test]
    fn test_role_arn() {
        let config = fixtures::config();
        let naming = Naming::new(&config);
        assert_eq!(
            role_arn(&naming, ServiceRole::KnowledgeBase),
            sub("arn:${AWS::Partition}:iam::${AWS::AccountId}:role/mlp-kb-service")
        );
    }

    #[test]
    fn test_minimal_identity() {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let inputs = IdentityInputs {
            storage: &s,
            catalog: None,
            query: None,
            knowledge_base: None,
            guardrail: None,
            ingestion: None,
            experiment: None,
        };
        let out = declare(&mut t, &config, &inputs).unwrap();
        assert_eq!(out.roles(), vec!["DomainExecutionRole", "SageMakerExecutionRole"]);
        assert!(out.glue_role.is_none());
        let policy = t.resources["SageMakerExecutionRole"].properties["Policies"][0]
            ["PolicyDocument"]["Statement"]
            .as_array()
            .unwrap()
            .len();
        assert_eq!(policy, 2);
        t.check_references().unwrap();
    }

    #[test]
    fn test_catalog_grants() {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let c = catalog::declare(&mut t, &config, &s).unwrap();
        let inputs = IdentityInputs {
            storage: &s,
            catalog: Some(&c),
            query: None,
            knowledge_base: None,
            guardrail: None,
            ingestion: None,
            experiment: None,
        };
        let out = declare(&mut t, &config, &inputs).unwrap();
        assert_eq!(out.glue_role.as_deref(), Some("GlueServiceRole"));
        assert_eq!(
            t.resources["GlueServiceRole"].properties["RoleName"],
            "mlp-glue-service"
        );
        let refs = t.references_of("SageMakerExecutionRole");
        assert!(refs.contains("GlueDatabase"));
        assert!(refs.contains("GlueEtlJob"));
        t.check_references().unwrap();
    }

    #[test]
    fn test_pipeline_grants_name_the_pipeline() {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let p = experiment::declare(&mut t, &config, &s).unwrap();
        let inputs = IdentityInputs {
            storage: &s,
            catalog: None,
            query: None,
            knowledge_base: None,
            guardrail: None,
            ingestion: None,
            experiment: Some(&p),
        };
        declare(&mut t, &config, &inputs).unwrap();
        let statements = t.resources["SageMakerExecutionRole"].properties["Policies"][0]
            ["PolicyDocument"]["Statement"]
            .as_array()
            .unwrap()
            .clone();
        let run = statements
            .iter()
            .find(|s| s["Sid"] == "RunExperimentPipeline")
            .unwrap();
        assert!(run["Resource"][0]["Fn::Sub"]
            .as_str()
            .unwrap()
            .ends_with(":pipeline/mlp-experiment"));
        let scripts = statements
            .iter()
            .find(|s| s["Sid"] == "ReadPipelineScripts")
            .unwrap();
        assert_eq!(
            scripts["Resource"][0],
            sub("arn:${AWS::Partition}:s3:::${CodeBucket}/sagemaker-scripts/experiment-pipeline/*")
        );
        assert!(!t.references_of("SageMakerExecutionRole").contains("ExperimentPipeline"));
        t.check_references().unwrap();
    }

    #[test]
    fn test_domain_role_can_tag_session() {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let inputs = IdentityInputs {
            storage: &s,
            catalog: None,
            query: None,
            knowledge_base: None,
            guardrail: None,
            ingestion: None,
            experiment: None,
        };
        declare(&mut t, &config, &inputs).unwrap();
        let trust = &t.resources["DomainExecutionRole"].properties["AssumeRolePolicyDocument"]
            ["Statement"][0];
        assert_eq!(trust["Principal"]["Service"], "datazone.amazonaws.com");
        assert_eq!(trust["Action"], json!(["sts:AssumeRole", "sts:TagSession"]));
    }
}
