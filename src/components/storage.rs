//! Encrypted object storage: raw, curated, project, code, and access-log
//! buckets sharing one customer-managed key.

use super::Naming;
use crate::core::error::Result;
use crate::core::template::{get_att, reference, sub, ResourceDescriptor, Template};
use crate::core::types::EnvironmentConfig;
use serde_json::{json, Value};

/// Days before raw objects move to infrequent access.
const RAW_TRANSITION_DAYS: u32 = 90;
const LOG_RETENTION_DAYS: u32 = 365;

#[derive(Debug, Clone)]
pub struct StorageOutputs {
    pub key: String,
    pub key_alias: String,
    pub raw: String,
    pub curated: String,
    pub project: String,
    pub logs: String,
    pub code: String,
}

impl StorageOutputs {
    /// The KMS-encrypted data buckets (everything except logs).
    pub fn data_buckets(&self) -> [&str; 4] {
        [&self.raw, &self.curated, &self.project, &self.code]
    }
}

pub fn declare(template: &mut Template, config: &EnvironmentConfig) -> Result<StorageOutputs> {
    let naming = Naming::new(config);

    let key = template.add(
        "DataKey",
        ResourceDescriptor::new(
            "AWS::KMS::Key",
            json!({
                "Description": format!("{} data platform encryption key", config.project_prefix),
                "EnableKeyRotation": true,
                "KeyPolicy": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Sid": "AccountAdministration",
                        "Effect": "Allow",
                        "Principal": { "AWS": sub("arn:${AWS::Partition}:iam::${AWS::AccountId}:root") },
                        "Action": "kms:*",
                        "Resource": "*",
                    }],
                },
                "Tags": naming.tags(),
            }),
        ),
    )?;
    let key_alias = template.add(
        "DataKeyAlias",
        ResourceDescriptor::new(
            "AWS::KMS::Alias",
            json!({
                "AliasName": format!("alias/{}", naming.resource("data")),
                "TargetKeyId": reference(&key),
            }),
        ),
    )?;

    // log delivery cannot write to KMS-encrypted buckets
    let logs = template.add(
        "LogsBucket",
        ResourceDescriptor::new(
            "AWS::S3::Bucket",
            json!({
                "BucketName": naming.bucket("logs")?,
                "BucketEncryption": {
                    "ServerSideEncryptionConfiguration": [{
                        "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" },
                    }],
                },
                "OwnershipControls": { "Rules": [{ "ObjectOwnership": "BucketOwnerPreferred" }] },
                "VersioningConfiguration": { "Status": "Enabled" },
                "PublicAccessBlockConfiguration": block_public_access(),
                "LifecycleConfiguration": {
                    "Rules": [{
                        "Id": "expire-access-logs",
                        "Status": "Enabled",
                        "ExpirationInDays": LOG_RETENTION_DAYS,
                    }],
                },
                "Tags": naming.tags(),
            }),
        ),
    )?;
    tls_only_policy(template, &logs)?;

    let raw = data_bucket(template, &naming, "raw", &key, &logs)?;
    let curated = data_bucket(template, &naming, "curated", &key, &logs)?;
    let project = data_bucket(template, &naming, "project", &key, &logs)?;
    let code = data_bucket(template, &naming, "code", &key, &logs)?;

    tracing::info!(buckets = 5, "storage declared");
    Ok(StorageOutputs {
        key,
        key_alias,
        raw,
        curated,
        project,
        logs,
        code,
    })
}

fn data_bucket(
    template: &mut Template,
    naming: &Naming,
    purpose: &str,
    key: &str,
    logs: &str,
) -> Result<String> {
    let logical_id = format!("{}{}Bucket", purpose[..1].to_uppercase(), &purpose[1..]);
    let mut properties = json!({
        "BucketName": naming.bucket(purpose)?,
        "BucketEncryption": {
            "ServerSideEncryptionConfiguration": [{
                "ServerSideEncryptionByDefault": {
                    "SSEAlgorithm": "aws:kms",
                    "KMSMasterKeyID": get_att(key, "Arn"),
                },
                "BucketKeyEnabled": true,
            }],
        },
        "VersioningConfiguration": { "Status": "Enabled" },
        "PublicAccessBlockConfiguration": block_public_access(),
        "LoggingConfiguration": {
            "DestinationBucketName": reference(logs),
            "LogFilePrefix": format!("{}/", purpose),
        },
        "Tags": naming.tags(),
    });
    if purpose == "raw" {
        properties["LifecycleConfiguration"] = json!({
            "Rules": [{
                "Id": "raw-to-infrequent-access",
                "Status": "Enabled",
                "Transitions": [{
                    "StorageClass": "STANDARD_IA",
                    "TransitionInDays": RAW_TRANSITION_DAYS,
                }],
            }],
        });
    }
    let id = template.add(
        &logical_id,
        ResourceDescriptor::new("AWS::S3::Bucket", properties),
    )?;
    tls_only_policy(template, &id)?;
    Ok(id)
}

fn tls_only_policy(template: &mut Template, bucket: &str) -> Result<String> {
    template.add(
        &format!("{}Policy", bucket),
        ResourceDescriptor::new(
            "AWS::S3::BucketPolicy",
            json!({
                "Bucket": reference(bucket),
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Sid": "DenyInsecureTransport",
                        "Effect": "Deny",
                        "Principal": "*",
                        "Action": "s3:*",
                        "Resource": bucket_and_objects(bucket),
                        "Condition": { "Bool": { "aws:SecureTransport": "false" } },
                    }],
                },
            }),
        ),
    )
}

/// `[bucket ARN, bucket ARN/*]` for policy statements.
pub fn bucket_and_objects(bucket: &str) -> Value {
    json!([get_att(bucket, "Arn"), sub(&format!("${{{}.Arn}}/*", bucket))])
}

fn block_public_access() -> Value {
    json!({
        "BlockPublicAcls": true,
        "BlockPublicPolicy": true,
        "IgnorePublicAcls": true,
        "RestrictPublicBuckets": true,
    })
}
