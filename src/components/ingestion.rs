//! Data-ingestion function writing into the raw bucket with the shared key.

use super::identity::{self, ServiceRole};
use super::storage::StorageOutputs;
use super::Naming;
use crate::core::error::Result;
use crate::core::template::{reference, ResourceDescriptor, Template};
use crate::core::types::EnvironmentConfig;
use serde_json::json;

/// Object key of the function package inside the code bucket.
pub const CODE_KEY: &str = "lambdas/data-ingestion.zip";
pub const DEFAULT_DATASET_TYPE: &str = "amazon-reviews";
const RUNTIME: &str = "python3.11";
const TIMEOUT_SECONDS: u32 = 900;
const MEMORY_MB: u32 = 1024;

#[derive(Debug, Clone)]
pub struct IngestionOutputs {
    pub function: String,
    pub function_name: String,
}

pub fn declare(
    template: &mut Template,
    config: &EnvironmentConfig,
    storage: &StorageOutputs,
) -> Result<IngestionOutputs> {
    let naming = Naming::new(config);
    let function_name = naming.resource("data-ingestion");

    let function = template.add(
        "IngestionFunction",
        ResourceDescriptor::new(
            "AWS::Lambda::Function",
            json!({
                "FunctionName": function_name,
                "Description": "Loads sample datasets into the raw bucket",
                "Runtime": RUNTIME,
                "Handler": "index.handler",
                "Role": identity::role_arn(&naming, ServiceRole::Ingestion),
                "Timeout": TIMEOUT_SECONDS,
                "MemorySize": MEMORY_MB,
                "Code": {
                    "S3Bucket": reference(&storage.code),
                    "S3Key": CODE_KEY,
                },
                "Environment": {
                    "Variables": {
                        "RAW_DATA_BUCKET": reference(&storage.raw),
                        "KMS_KEY_ID": reference(&storage.key),
                        "DEFAULT_DATASET_TYPE": DEFAULT_DATASET_TYPE,
                    },
                },
                "Tags": naming.tags(),
            }),
        ),
    )?;

    tracing::info!(function = %function_name, "ingestion declared");
    Ok(IngestionOutputs {
        function,
        function_name,
    })
}
