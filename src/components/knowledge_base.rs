//! Retrieval knowledge base: a serverless vector collection with its
//! security policies, the vector index inside it, the knowledge base, and a
//! data source reading the project bucket.

use super::identity::{self, ServiceRole};
use super::storage::StorageOutputs;
use super::Naming;
use crate::core::error::Result;
use crate::core::template::{get_att, sub, ResourceDescriptor, Template};
use crate::core::types::EnvironmentConfig;
use serde_json::json;

pub const EMBEDDING_MODEL: &str = "amazon.titan-embed-text-v2:0";
pub const EMBEDDING_DIMENSIONS: u32 = 1024;
pub const DOCUMENT_PREFIX: &str = "knowledge-base/";
/// Collection and security policy names are limited to 32 characters.
const VECTOR_NAME_LIMIT: usize = 32;

#[derive(Debug, Clone)]
pub struct KnowledgeBaseOutputs {
    pub collection: String,
    pub encryption_policy: String,
    pub network_policy: String,
    pub access_policy: String,
    pub index: String,
    pub index_name: String,
    pub knowledge_base: String,
    pub data_source: String,
    pub embedding_model: &'static str,
}

impl KnowledgeBaseOutputs {
    /// Resources that name the knowledge-base service role.
    pub fn role_consumers(&self) -> [&str; 2] {
        [&self.access_policy, &self.knowledge_base]
    }
}

pub fn declare(
    template: &mut Template,
    config: &EnvironmentConfig,
    storage: &StorageOutputs,
) -> Result<KnowledgeBaseOutputs> {
    let naming = Naming::new(config);
    let collection_name = naming.bounded("kb", VECTOR_NAME_LIMIT)?;
    let index_name = naming.resource("kb-index");
    let role_arn = identity::role_arn(&naming, ServiceRole::KnowledgeBase);
    let role_name = identity::role_name(&naming, ServiceRole::KnowledgeBase);
    let resource = format!("collection/{}", collection_name);

    let encryption_policy = template.add(
        "VectorEncryptionPolicy",
        ResourceDescriptor::new(
            "AWS::OpenSearchServerless::SecurityPolicy",
            json!({
                "Name": naming.bounded("kb-enc", VECTOR_NAME_LIMIT)?,
                "Type": "encryption",
                "Policy": json!({
                    "Rules": [{ "ResourceType": "collection", "Resource": [resource] }],
                    "AWSOwnedKey": true,
                })
                .to_string(),
            }),
        ),
    )?;

    let network_policy = template.add(
        "VectorNetworkPolicy",
        ResourceDescriptor::new(
            "AWS::OpenSearchServerless::SecurityPolicy",
            json!({
                "Name": naming.bounded("kb-net", VECTOR_NAME_LIMIT)?,
                "Type": "network",
                "Policy": json!([{
                    "Rules": [
                        { "ResourceType": "collection", "Resource": [resource] },
                        { "ResourceType": "dashboard", "Resource": [resource] },
                    ],
                    "AllowFromPublic": true,
                }])
                .to_string(),
            }),
        ),
    )?;

    // Policy documents are plain strings, so the account is substituted in place.
    let access_document = json!([{
        "Rules": [
            {
                "ResourceType": "collection",
                "Resource": [resource],
                "Permission": ["aoss:CreateCollectionItems", "aoss:DescribeCollectionItems", "aoss:UpdateCollectionItems"],
            },
            {
                "ResourceType": "index",
                "Resource": [format!("index/{}/*", collection_name)],
                "Permission": ["aoss:CreateIndex", "aoss:DescribeIndex", "aoss:ReadDocument", "aoss:WriteDocument", "aoss:UpdateIndex"],
            },
        ],
        "Principal": [
            format!("arn:${{AWS::Partition}}:iam::${{AWS::AccountId}}:role/{}", role_name),
            "arn:${AWS::Partition}:iam::${AWS::AccountId}:root",
        ],
    }]);
    let access_policy = template.add(
        "VectorAccessPolicy",
        ResourceDescriptor::new(
            "AWS::OpenSearchServerless::AccessPolicy",
            json!({
                "Name": naming.bounded("kb-access", VECTOR_NAME_LIMIT)?,
                "Type": "data",
                "Policy": sub(&access_document.to_string()),
            }),
        ),
    )?;

    let collection = template.add(
        "VectorCollection",
        ResourceDescriptor::new(
            "AWS::OpenSearchServerless::Collection",
            json!({
                "Name": collection_name,
                "Type": "VECTORSEARCH",
                "Description": format!("{} knowledge base vectors", config.project_prefix),
                "StandbyReplicas": "DISABLED",
                "Tags": naming.tags(),
            }),
        )
        .depends_on(&encryption_policy)
        .depends_on(&network_policy),
    )?;

    // The knowledge base refuses to create against a missing index.
    let index = template.add(
        "VectorIndex",
        ResourceDescriptor::new(
            "AWS::OpenSearchServerless::Index",
            json!({
                "CollectionEndpoint": get_att(&collection, "CollectionEndpoint"),
                "IndexName": index_name,
                "Settings": {
                    "Index": { "Knn": true, "KnnAlgoParamEfSearch": 512 },
                },
                "Mappings": {
                    "Properties": {
                        "vector": {
                            "Type": "knn_vector",
                            "Dimension": EMBEDDING_DIMENSIONS,
                            "Method": { "Engine": "faiss", "Name": "hnsw", "SpaceType": "l2" },
                        },
                        "text": { "Type": "text" },
                        "metadata": { "Type": "text", "Index": false },
                    },
                },
            }),
        )
        .depends_on(&access_policy),
    )?;

    let knowledge_base = template.add(
        "KnowledgeBase",
        ResourceDescriptor::new(
            "AWS::Bedrock::KnowledgeBase",
            json!({
                "Name": naming.resource("knowledge-base"),
                "RoleArn": role_arn,
                "KnowledgeBaseConfiguration": {
                    "Type": "VECTOR",
                    "VectorKnowledgeBaseConfiguration": {
                        "EmbeddingModelArn": sub(&format!(
                            "arn:${{AWS::Partition}}:bedrock:${{AWS::Region}}::foundation-model/{}",
                            EMBEDDING_MODEL
                        )),
                    },
                },
                "StorageConfiguration": {
                    "Type": "OPENSEARCH_SERVERLESS",
                    "OpensearchServerlessConfiguration": {
                        "CollectionArn": get_att(&collection, "Arn"),
                        "VectorIndexName": index_name,
                        "FieldMapping": {
                            "VectorField": "vector",
                            "TextField": "text",
                            "MetadataField": "metadata",
                        },
                    },
                },
                "Tags": naming.tag_map(),
            }),
        )
        .depends_on(&access_policy)
        .depends_on(&index),
    )?;

    let data_source = template.add(
        "KnowledgeBaseDataSource",
        ResourceDescriptor::new(
            "AWS::Bedrock::DataSource",
            json!({
                "Name": naming.resource("kb-documents"),
                "KnowledgeBaseId": get_att(&knowledge_base, "KnowledgeBaseId"),
                "DataSourceConfiguration": {
                    "Type": "S3",
                    "S3Configuration": {
                        "BucketArn": get_att(&storage.project, "Arn"),
                        "InclusionPrefixes": [DOCUMENT_PREFIX],
                    },
                },
                "ServerSideEncryptionConfiguration": {
                    "KmsKeyArn": get_att(&storage.key, "Arn"),
                },
            }),
        ),
    )?;

    tracing::info!(collection = %collection_name, "knowledge base declared");
    Ok(KnowledgeBaseOutputs {
        collection,
        encryption_policy,
        network_policy,
        access_policy,
        index,
        index_name,
        knowledge_base,
        data_source,
        embedding_model: EMBEDDING_MODEL,
    })
}
