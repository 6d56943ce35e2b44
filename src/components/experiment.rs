//! Experiment pipeline: a three-step ML workflow (preprocess, train,
//! evaluate) run as the studio execution role.
//!
//! Step scripts are deployment assets under [`SCRIPT_PREFIX`] in the code
//! bucket. Intermediate datasets, model artifacts and evaluation reports
//! land under [`ARTIFACT_PREFIX`] in the project bucket.

use super::identity::{self, ServiceRole};
use super::storage::StorageOutputs;
use super::Naming;
use crate::core::error::{Error, Result};
use crate::core::template::{sub, ResourceDescriptor, Template};
use crate::core::types::EnvironmentConfig;
use serde_json::{json, Value};

pub const SCRIPT_PREFIX: &str = "sagemaker-scripts/experiment-pipeline/";
pub const ARTIFACT_PREFIX: &str = "experiments/";
pub const PREPROCESSING_SCRIPT: &str = "preprocessing/preprocessing.py";
/// Packaged `train.py`, as the framework container expects.
pub const TRAINING_SOURCE: &str = "training/sourcedir.tar.gz";
pub const EVALUATION_SCRIPT: &str = "evaluation/evaluate.py";

const FRAMEWORK_IMAGE: &str = "sagemaker-scikit-learn:1.2-1-cpu-py3";
const INSTANCE_TYPE: &str = "ml.m5.xlarge";
const MAX_TRAINING_SECONDS: u32 = 3600;

/// Registry accounts hosting the scikit-learn framework image.
const FRAMEWORK_REGISTRIES: &[(&str, &str)] = &[
    ("us-east-1", "683313688378"),
    ("us-east-2", "257758044811"),
    ("us-west-1", "746614075791"),
    ("us-west-2", "246618743249"),
    ("ca-central-1", "341280168497"),
    ("eu-west-1", "141502667606"),
    ("eu-west-2", "764974769150"),
    ("eu-central-1", "492215442770"),
    ("ap-northeast-1", "354813040037"),
    ("ap-southeast-1", "121021644041"),
    ("ap-southeast-2", "783357654285"),
];

#[derive(Debug, Clone)]
pub struct ExperimentPipelineOutputs {
    pub pipeline: String,
    pub pipeline_name: String,
}

impl ExperimentPipelineOutputs {
    /// Code-bucket keys the pipeline steps read.
    pub fn asset_keys(&self) -> Vec<String> {
        [PREPROCESSING_SCRIPT, TRAINING_SOURCE, EVALUATION_SCRIPT]
            .iter()
            .map(|k| format!("{}{}", SCRIPT_PREFIX, k))
            .collect()
    }
}

/// Physical pipeline name. Identity grants on it by name, so it cannot
/// reference the pipeline resource itself.
pub fn pipeline_name(naming: &Naming) -> String {
    naming.resource("experiment")
}

pub fn framework_image(region: &str) -> Result<String> {
    let (_, account) = FRAMEWORK_REGISTRIES
        .iter()
        .find(|(r, _)| *r == region)
        .ok_or_else(|| {
            Error::declaration(format!(
                "no scikit-learn framework image is published for region {}",
                region
            ))
        })?;
    Ok(format!("{}.dkr.ecr.{}.amazonaws.com/{}", account, region, FRAMEWORK_IMAGE))
}

pub fn declare(
    template: &mut Template,
    config: &EnvironmentConfig,
    storage: &StorageOutputs,
) -> Result<ExperimentPipelineOutputs> {
    let naming = Naming::new(config);
    let pipeline_name = pipeline_name(&naming);
    let image = framework_image(&config.region)?;
    let definition = definition(&naming, storage, &image);

    let pipeline = template.add(
        "ExperimentPipeline",
        ResourceDescriptor::new(
            "AWS::SageMaker::Pipeline",
            json!({
                "PipelineName": pipeline_name,
                "PipelineDisplayName": pipeline_name,
                "PipelineDescription": "Preprocess, train and evaluate an experiment model",
                "RoleArn": identity::role_arn(&naming, ServiceRole::SageMakerExecution),
                "PipelineDefinition": {
                    "PipelineDefinitionBody": sub(&definition.to_string()),
                },
                "Tags": naming.tags(),
            }),
        ),
    )?;

    tracing::info!(pipeline = %pipeline_name, "experiment pipeline declared");
    Ok(ExperimentPipelineOutputs {
        pipeline,
        pipeline_name,
    })
}

/// Pipeline definition document. Bucket and key names are `${...}`
/// substitutions resolved when the stack is deployed.
fn definition(naming: &Naming, storage: &StorageOutputs, image: &str) -> Value {
    let scripts = format!("s3://${{{}}}/{}", storage.code, SCRIPT_PREFIX);
    let artifacts = format!("s3://${{{}}}/{}", storage.project, ARTIFACT_PREFIX);
    let role = format!(
        "arn:${{AWS::Partition}}:iam::${{AWS::AccountId}}:role/{}",
        identity::role_name(naming, ServiceRole::SageMakerExecution)
    );
    let key = format!("${{{}.Arn}}", storage.key);
    let cluster = json!({
        "InstanceType": { "Get": "Parameters.ProcessingInstanceType" },
        "InstanceCount": 1,
        "VolumeSizeInGB": 30,
    });
    let preprocessed = |channel: &str| {
        format!(
            "Steps.Preprocess.ProcessingOutputConfig.Outputs['{}'].S3Output.S3Uri",
            channel
        )
    };

    let preprocess = json!({
        "Name": "Preprocess",
        "Type": "Processing",
        "Arguments": {
            "RoleArn": role,
            "ProcessingResources": { "ClusterConfig": cluster },
            "AppSpecification": {
                "ImageUri": image,
                "ContainerEntrypoint": ["python3", "/opt/ml/processing/code/preprocessing.py"],
            },
            "ProcessingInputs": [
                processing_input("input", json!({ "Get": "Parameters.InputDataUri" }), "/opt/ml/processing/input"),
                processing_input(
                    "code",
                    json!(format!("{}{}", scripts, PREPROCESSING_SCRIPT)),
                    "/opt/ml/processing/code",
                ),
            ],
            "ProcessingOutputConfig": {
                "KmsKeyId": key,
                "Outputs": (["train", "validation", "test"]
                    .iter()
                    .map(|channel| processing_output(
                        channel,
                        &format!("{}preprocessed/{}/", artifacts, channel),
                        &format!("/opt/ml/processing/{}", channel),
                    ))
                    .collect::<Vec<_>>()),
            },
        },
    });

    let train = json!({
        "Name": "Train",
        "Type": "Training",
        "Arguments": {
            "RoleArn": role,
            "AlgorithmSpecification": { "TrainingImage": image, "TrainingInputMode": "File" },
            "HyperParameters": {
                "sagemaker_program": "\"train.py\"",
                "sagemaker_submit_directory": format!("\"{}{}\"", scripts, TRAINING_SOURCE),
                "model_type": { "Get": "Parameters.ModelType" },
                "n_estimators": { "Std:Join": { "On": "", "Values": [{ "Get": "Parameters.NEstimators" }] } },
                "max_depth": { "Std:Join": { "On": "", "Values": [{ "Get": "Parameters.MaxDepth" }] } },
            },
            "InputDataConfig": (["training", "validation"]
                .iter()
                .map(|channel| {
                    let source = if *channel == "training" { "train" } else { "validation" };
                    json!({
                        "ChannelName": channel,
                        "ContentType": "text/csv",
                        "DataSource": {
                            "S3DataSource": {
                                "S3DataType": "S3Prefix",
                                "S3Uri": { "Get": preprocessed(source) },
                                "S3DataDistributionType": "FullyReplicated",
                            },
                        },
                    })
                })
                .collect::<Vec<_>>()),
            "OutputDataConfig": {
                "S3OutputPath": format!("{}models/", artifacts),
                "KmsKeyId": key,
            },
            "ResourceConfig": {
                "InstanceType": { "Get": "Parameters.TrainingInstanceType" },
                "InstanceCount": 1,
                "VolumeSizeInGB": 30,
                "VolumeKmsKeyId": key,
            },
            "StoppingCondition": { "MaxRuntimeInSeconds": MAX_TRAINING_SECONDS },
        },
    });

    let evaluate = json!({
        "Name": "Evaluate",
        "Type": "Processing",
        "Arguments": {
            "RoleArn": role,
            "ProcessingResources": { "ClusterConfig": cluster },
            "AppSpecification": {
                "ImageUri": image,
                "ContainerEntrypoint": ["python3", "/opt/ml/processing/code/evaluate.py"],
            },
            "ProcessingInputs": [
                processing_input(
                    "model",
                    json!({ "Get": "Steps.Train.ModelArtifacts.S3ModelArtifacts" }),
                    "/opt/ml/processing/model",
                ),
                processing_input("test", json!({ "Get": preprocessed("test") }), "/opt/ml/processing/test"),
                processing_input(
                    "code",
                    json!(format!("{}{}", scripts, EVALUATION_SCRIPT)),
                    "/opt/ml/processing/code",
                ),
            ],
            "ProcessingOutputConfig": {
                "KmsKeyId": key,
                "Outputs": [processing_output(
                    "evaluation",
                    &format!("{}evaluation/", artifacts),
                    "/opt/ml/processing/evaluation",
                )],
            },
        },
    });

    json!({
        "Version": "2020-12-01",
        "Metadata": {},
        "Parameters": [
            { "Name": "InputDataUri", "Type": "String", "DefaultValue": format!("s3://${{{}}}/raw/experiment/", storage.raw) },
            { "Name": "ModelType", "Type": "String", "DefaultValue": "random_forest" },
            { "Name": "NEstimators", "Type": "Integer", "DefaultValue": 100 },
            { "Name": "MaxDepth", "Type": "Integer", "DefaultValue": 10 },
            { "Name": "ProcessingInstanceType", "Type": "String", "DefaultValue": INSTANCE_TYPE },
            { "Name": "TrainingInstanceType", "Type": "String", "DefaultValue": INSTANCE_TYPE },
        ],
        "PipelineExperimentConfig": {
            "ExperimentName": { "Get": "Execution.PipelineName" },
            "TrialName": { "Get": "Execution.PipelineExecutionId" },
        },
        "Steps": [preprocess, train, evaluate],
    })
}

fn processing_input(name: &str, uri: Value, local_path: &str) -> Value {
    json!({
        "InputName": name,
        "AppManaged": false,
        "S3Input": {
            "S3Uri": uri,
            "LocalPath": local_path,
            "S3DataType": "S3Prefix",
            "S3InputMode": "File",
            "S3DataDistributionType": "FullyReplicated",
        },
    })
}

fn processing_output(name: &str, uri: &str, local_path: &str) -> Value {
    json!({
        "OutputName": name,
        "AppManaged": false,
        "S3Output": { "S3Uri": uri, "LocalPath": local_path, "S3UploadMode": "EndOfJob" },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{fixtures, storage};

    fn declared() -> (Template, ExperimentPipelineOutputs) {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let out = declare(&mut t, &config, &s).unwrap();
        (t, out)
    }

    fn definition_of(t: &Template, out: &ExperimentPipelineOutputs) -> Value {
        let body = t.resources[&out.pipeline].properties["PipelineDefinition"]
            ["PipelineDefinitionBody"]["Fn::Sub"]
            .as_str()
            .unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_pipeline_runs_as_studio_role() {
        let (t, out) = declared();
        let props = &t.resources[&out.pipeline].properties;
        assert_eq!(out.pipeline_name, "mlp-experiment");
        assert_eq!(
            props["RoleArn"],
            sub("arn:${AWS::Partition}:iam::${AWS::AccountId}:role/mlp-sagemaker-execution")
        );
        t.check_references().unwrap();
    }

    #[test]
    fn test_steps_read_scripts_and_write_artifacts() {
        let (t, out) = declared();
        let d = definition_of(&t, &out);
        let steps: Vec<_> = d["Steps"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["Name"].as_str().unwrap())
            .collect();
        assert_eq!(steps, vec!["Preprocess", "Train", "Evaluate"]);

        let code = &d["Steps"][0]["Arguments"]["ProcessingInputs"][1]["S3Input"]["S3Uri"];
        assert_eq!(
            code,
            "s3://${CodeBucket}/sagemaker-scripts/experiment-pipeline/preprocessing/preprocessing.py"
        );
        let models = &d["Steps"][1]["Arguments"]["OutputDataConfig"]["S3OutputPath"];
        assert_eq!(models, "s3://${ProjectBucket}/experiments/models/");
        let channels: Vec<_> = d["Steps"][1]["Arguments"]["InputDataConfig"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["ChannelName"].as_str().unwrap())
            .collect();
        assert_eq!(channels, vec!["training", "validation"]);

        // substitutions name only storage resources
        let refs = t.references_of(&out.pipeline);
        assert!(refs.contains("CodeBucket"));
        assert!(refs.contains("ProjectBucket"));
        assert!(refs.contains("DataKey"));
        assert!(!refs.contains("SageMakerExecutionRole"));
    }

    #[test]
    fn test_asset_keys() {
        let (_, out) = declared();
        assert_eq!(
            out.asset_keys(),
            vec![
                "sagemaker-scripts/experiment-pipeline/preprocessing/preprocessing.py",
                "sagemaker-scripts/experiment-pipeline/training/sourcedir.tar.gz",
                "sagemaker-scripts/experiment-pipeline/evaluation/evaluate.py",
            ]
        );
    }

    #[test]
    fn test_unsupported_region() {
        assert!(framework_image("us-east-1")
            .unwrap()
            .starts_with("683313688378.dkr.ecr.us-east-1.amazonaws.com/"));
        let mut config = fixtures::config();
        config.region = "xx-nowhere-1".to_string();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let err = declare(&mut t, &config, &s).unwrap_err();
        assert!(matches!(err, Error::Declaration(_)));
    }
}
