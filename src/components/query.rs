//! Interactive query engine: an Athena workgroup writing encrypted results
//! into the project bucket, plus starter queries when the catalog exists.

use super::catalog::CatalogOutputs;
use super::storage::StorageOutputs;
use super::Naming;
use crate::core::error::Result;
use crate::core::template::{get_att, reference, sub, ResourceDescriptor, Template};
use crate::core::types::EnvironmentConfig;
use serde_json::json;

pub const RESULTS_PREFIX: &str = "athena-results/";
const ENGINE_VERSION: &str = "Athena engine version 3";

#[derive(Debug, Clone)]
pub struct QueryOutputs {
    pub workgroup: String,
    pub workgroup_name: String,
    pub named_queries: Vec<String>,
}

pub fn declare(
    template: &mut Template,
    config: &EnvironmentConfig,
    storage: &StorageOutputs,
    catalog: Option<&CatalogOutputs>,
) -> Result<QueryOutputs> {
    let naming = Naming::new(config);
    let workgroup_name = naming.resource("workgroup");

    let workgroup = template.add(
        "AthenaWorkgroup",
        ResourceDescriptor::new(
            "AWS::Athena::WorkGroup",
            json!({
                "Name": workgroup_name,
                "Description": format!("{} interactive queries", config.project_prefix),
                "State": "ENABLED",
                "RecursiveDeleteOption": true,
                "WorkGroupConfiguration": {
                    "EnforceWorkGroupConfiguration": true,
                    "PublishCloudWatchMetricsEnabled": true,
                    "EngineVersion": { "SelectedEngineVersion": ENGINE_VERSION },
                    "ResultConfiguration": {
                        "OutputLocation": sub(&format!("s3://${{{}}}/{}", storage.project, RESULTS_PREFIX)),
                        "EncryptionConfiguration": {
                            "EncryptionOption": "SSE_KMS",
                            "KmsKey": get_att(&storage.key, "Arn"),
                        },
                    },
                },
                "Tags": naming.tags(),
            }),
        ),
    )?;

    let mut named_queries = Vec::new();
    match catalog {
        Some(catalog) => {
            let starters = [
                (
                    "ListTablesQuery",
                    "list-tables",
                    "Tables registered in the platform catalog",
                    format!(
                        "SELECT table_name FROM information_schema.tables WHERE table_schema = '{}'",
                        catalog.database_name
                    ),
                ),
                (
                    "SampleRawDataQuery",
                    "sample-raw-data",
                    "First rows of the crawled raw dataset",
                    format!("SELECT * FROM \"{}\".\"raw\" LIMIT 10", catalog.database_name),
                ),
            ];
            for (id, purpose, description, query) in starters {
                named_queries.push(template.add(
                    id,
                    ResourceDescriptor::new(
                        "AWS::Athena::NamedQuery",
                        json!({
                            "Name": naming.resource(purpose),
                            "Description": description,
                            "Database": reference(&catalog.database),
                            "WorkGroup": reference(&workgroup),
                            "QueryString": query,
                        }),
                    ),
                )?);
            }
        }
        None => tracing::warn!("catalog disabled, starter queries omitted"),
    }

    tracing::info!(workgroup = %workgroup_name, queries = named_queries.len(), "query engine declared");
    Ok(QueryOutputs {
        workgroup,
        workgroup_name,
        named_queries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{catalog, fixtures, storage};

    #[test]
    fn test_workgroup_results_location() {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let q = declare(&mut t, &config, &s, None).unwrap();
        let result = &t.resources[&q.workgroup].properties["WorkGroupConfiguration"]
            ["ResultConfiguration"];
        assert_eq!(result["OutputLocation"], sub("s3://${ProjectBucket}/athena-results/"));
        assert_eq!(result["EncryptionConfiguration"]["EncryptionOption"], "SSE_KMS");
        assert_eq!(q.workgroup_name, "mlp-workgroup");
    }

    #[test]
    fn test_no_catalog_no_named_queries() {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let q = declare(&mut t, &config, &s, None).unwrap();
        assert!(q.named_queries.is_empty());
        assert_eq!(t.ids_of_type("AWS::Athena::NamedQuery").count(), 0);
        assert!(!t.all_references().contains("GlueDatabase"));
        t.check_references().unwrap();
    }

    #[test]
    fn test_named_queries_with_catalog() {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let s = storage::declare(&mut t, &config).unwrap();
        let c = catalog::declare(&mut t, &config, &s).unwrap();
        let q = declare(&mut t, &config, &s, Some(&c)).unwrap();
        assert_eq!(q.named_queries, vec!["ListTablesQuery", "SampleRawDataQuery"]);
        let names: Vec<_> = q
            .named_queries
            .iter()
            .map(|id| t.resources[id].properties["Name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["mlp-list-tables", "mlp-sample-raw-data"]);
        assert!(t.references_of("ListTablesQuery").contains("GlueDatabase"));
        t.check_references().unwrap();
    }
}
