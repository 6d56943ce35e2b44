//! Data catalog: metadata database, crawler over the raw and curated
//! buckets, and the ETL job that promotes raw data to curated.

use super::identity::{self, ServiceRole};
use super::storage::StorageOutputs;
use super::Naming;
use crate::core::error::Result;
use crate::core::template::{get_att, reference, sub, ResourceDescriptor, Template};
use crate::core::types::EnvironmentConfig;
use serde_json::json;

/// Object key of the ETL script inside the code bucket.
pub const ETL_SCRIPT_KEY: &str = "scripts/glue-etl/sample-etl.py";
const CRAWLER_SCHEDULE: &str = "cron(0 2 * * ? *)";

#[derive(Debug, Clone)]
pub struct CatalogOutputs {
    pub database: String,
    pub database_name: String,
    pub crawler: String,
    pub etl_job: String,
    pub security_configuration: String,
}

impl CatalogOutputs {
    /// Resources that run as the catalog service role.
    pub fn role_consumers(&self) -> [&str; 2] {
        [&self.crawler, &self.etl_job]
    }
}

pub fn declare(
    template: &mut Template,
    config: &EnvironmentConfig,
    storage: &StorageOutputs,
) -> Result<CatalogOutputs> {
    let naming = Naming::new(config);
    let database_name = naming.database("catalog");
    let role_arn = identity::role_arn(&naming, ServiceRole::Glue);
    let key_arn = get_att(&storage.key, "Arn");

    let database = template.add(
        "GlueDatabase",
        ResourceDescriptor::new(
            "AWS::Glue::Database",
            json!({
                "CatalogId": reference("AWS::AccountId"),
                "DatabaseInput": {
                    "Name": database_name,
                    "Description": format!("{} data platform catalog", config.project_prefix),
                    "LocationUri": sub(&format!("s3://${{{}}}/", storage.curated)),
                },
            }),
        ),
    )?;

    let security_configuration = template.add(
        "GlueSecurityConfiguration",
        ResourceDescriptor::new(
            "AWS::Glue::SecurityConfiguration",
            json!({
                "Name": naming.resource("glue-security"),
                "EncryptionConfiguration": {
                    "S3Encryptions": [{ "S3EncryptionMode": "SSE-KMS", "KmsKeyArn": key_arn }],
                    "CloudWatchEncryption": {
                        "CloudWatchEncryptionMode": "SSE-KMS",
                        "KmsKeyArn": key_arn,
                    },
                    "JobBookmarksEncryption": {
                        "JobBookmarksEncryptionMode": "CSE-KMS",
                        "KmsKeyArn": key_arn,
                    },
                },
            }),
        ),
    )?;

    let crawler = template.add(
        "GlueCrawler",
        ResourceDescriptor::new(
            "AWS::Glue::Crawler",
            json!({
                "Name": naming.resource("crawler"),
                "Role": role_arn,
                "DatabaseName": reference(&database),
                "Targets": {
                    "S3Targets": [
                        { "Path": sub(&format!("s3://${{{}}}/raw/", storage.raw)) },
                        { "Path": sub(&format!("s3://${{{}}}/curated/", storage.curated)) },
                    ],
                },
                "Schedule": { "ScheduleExpression": CRAWLER_SCHEDULE },
                "SchemaChangePolicy": {
                    "UpdateBehavior": "UPDATE_IN_DATABASE",
                    "DeleteBehavior": "LOG",
                },
                "CrawlerSecurityConfiguration": reference(&security_configuration),
                "Tags": naming.tag_map(),
            }),
        ),
    )?;

    let etl_job = template.add(
        "GlueEtlJob",
        ResourceDescriptor::new(
            "AWS::Glue::Job",
            json!({
                "Name": naming.resource("sample-etl"),
                "Role": role_arn,
                "Command": {
                    "Name": "glueetl",
                    "ScriptLocation": sub(&format!("s3://${{{}}}/{}", storage.code, ETL_SCRIPT_KEY)),
                    "PythonVersion": "3",
                },
                "GlueVersion": "4.0",
                "WorkerType": "G.1X",
                "NumberOfWorkers": 2,
                "DefaultArguments": {
                    "--source-bucket": reference(&storage.raw),
                    "--target-bucket": reference(&storage.curated),
                    "--database-name": reference(&database),
                    "--job-bookmark-option": "job-bookmark-enable",
                    "--enable-metrics": "true",
                },
                "SecurityConfiguration": reference(&security_configuration),
                "Tags": naming.tag_map(),
            }),
        ),
    )?;

    tracing::info!(database = %database_name, "catalog declared");
    Ok(CatalogOutputs {
        database,
        database_name,
        crawler,
        etl_job,
        security_configuration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{fixtures, storage};

    fn declared() -> (Template, CatalogOutputs) {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let c = declare(&mut t, &config, &s).unwrap();
        (t, c)
    }

    #[test]
    fn test_catalog_resources() {
        let (t, c) = declared();
        assert_eq!(c.database_name, "mlp_catalog");
        assert_eq!(t.ids_of_type("AWS::Glue::Crawler").count(), 1);
        assert_eq!(t.ids_of_type("AWS::Glue::Job").count(), 1);
        t.check_references().unwrap();
    }

    #[test]
    fn test_crawler_targets_raw_and_curated() {
        let (t, c) = declared();
        let refs = t.references_of(&c.crawler);
        assert!(refs.contains("RawBucket"));
        assert!(refs.contains("CuratedBucket"));
        assert!(refs.contains("GlueDatabase"));
    }

    #[test]
    fn test_etl_job_arguments() {
        let (t, c) = declared();
        let args = &t.resources[&c.etl_job].properties["DefaultArguments"];
        assert_eq!(args["--source-bucket"], reference("RawBucket"));
        assert_eq!(args["--target-bucket"], reference("CuratedBucket"));
        assert_eq!(args["--database-name"], reference("GlueDatabase"));
        assert_eq!(
            t.resources[&c.etl_job].properties["Command"]["ScriptLocation"]["Fn::Sub"],
            "s3://${CodeBucket}/scripts/glue-etl/sample-etl.py"
        );
    }

    #[test]
    fn test_role_is_named_not_referenced() {
        let (t, c) = declared();
        let role = &t.resources[&c.crawler].properties["Role"]["Fn::Sub"];
        assert_eq!(role, "arn:${AWS::Partition}:iam::${AWS::AccountId}:role/mlp-glue-service");
    }
}
