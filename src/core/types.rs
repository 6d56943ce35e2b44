//! Configuration, component, lock, plan, and provenance types.
//!
//! The environment record is JSON (camelCase, mirroring the provider's
//! conventions); the stack lock is YAML. All persisted types derive
//! Serialize/Deserialize.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Environment configuration
// ============================================================================

/// Per-environment deployment configuration, loaded once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// Environment name (taken from the file name, not the record)
    #[serde(skip)]
    pub environment: String,

    /// Twelve-digit cloud account id
    pub account_id: String,

    /// Deployment region, e.g. "us-east-1"
    pub region: String,

    /// Studio domain name
    pub domain_name: String,

    /// Network access mode
    #[serde(default)]
    pub network_access: NetworkAccess,

    /// Legacy flag; `true` overrides `networkAccess` to isolated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolated: Option<bool>,

    /// Prefix for bucket and resource names
    pub project_prefix: String,

    /// Optional component toggles
    #[serde(default)]
    pub features: FeatureToggles,

    /// Tags applied to every taggable resource
    #[serde(default)]
    pub tags: IndexMap<String, String>,
}

impl EnvironmentConfig {
    /// Effective network mode after applying the legacy `isolated` flag.
    pub fn network_mode(&self) -> NetworkAccess {
        match self.isolated {
            Some(true) => NetworkAccess::Isolated,
            _ => self.network_access,
        }
    }

    /// Name of the stack the orchestrator deploys.
    pub fn stack_name(&self) -> String {
        format!("{}-{}", self.project_prefix, self.environment)
    }
}

/// How the platform reaches the internet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NetworkAccess {
    /// Public and private subnets with internet and NAT gateways
    #[default]
    Public,
    /// Isolated subnets reaching services only through private endpoints
    Isolated,
}

impl fmt::Display for NetworkAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Isolated => write!(f, "isolated"),
        }
    }
}

/// Optional component toggles. Everything is off unless enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureToggles {
    pub catalog: bool,
    pub query_engine: bool,
    pub generative_ai: bool,
    pub knowledge_base: bool,
    pub guardrails: bool,
    pub data_ingestion: bool,
    pub experiment_pipeline: bool,
}

impl FeatureToggles {
    /// The knowledge base needs generative AI enabled to be constructed.
    pub fn knowledge_base_active(&self) -> bool {
        self.generative_ai && self.knowledge_base
    }

    pub fn guardrails_active(&self) -> bool {
        self.generative_ai && self.guardrails
    }

    /// Whether `component` is constructed under these toggles.
    pub fn is_active(&self, component: Component) -> bool {
        match component {
            Component::Catalog => self.catalog,
            Component::Query => self.query_engine,
            Component::KnowledgeBase => self.knowledge_base_active(),
            Component::Guardrail => self.guardrails_active(),
            Component::Ingestion => self.data_ingestion,
            Component::ExperimentPipeline => self.experiment_pipeline,
            Component::Network | Component::Storage | Component::Identity | Component::Studio => {
                true
            }
        }
    }

    /// Reason an optional component is skipped, if it is.
    pub fn skip_reason(&self, component: Component) -> Option<String> {
        if self.is_active(component) {
            return None;
        }
        let reason = match component {
            Component::Catalog => "features.catalog is disabled",
            Component::Query => "features.queryEngine is disabled",
            Component::KnowledgeBase if self.knowledge_base => {
                "features.knowledgeBase requires features.generativeAi"
            }
            Component::KnowledgeBase => "features.knowledgeBase is disabled",
            Component::Guardrail if self.guardrails => {
                "features.guardrails requires features.generativeAi"
            }
            Component::Guardrail => "features.guardrails is disabled",
            Component::Ingestion => "features.dataIngestion is disabled",
            Component::ExperimentPipeline => "features.experimentPipeline is disabled",
            _ => return None,
        };
        Some(reason.to_string())
    }

    /// These toggles with every component that reads code-bucket assets
    /// switched off. Deployed first so the code bucket exists before the
    /// assets are uploaded.
    pub fn without_asset_consumers(&self) -> Self {
        Self {
            catalog: false,
            data_ingestion: false,
            experiment_pipeline: false,
            ..self.clone()
        }
    }
}

// ============================================================================
// Components
// ============================================================================

/// A unit of declared cloud-resource configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Network,
    Storage,
    Catalog,
    Query,
    KnowledgeBase,
    Guardrail,
    Ingestion,
    ExperimentPipeline,
    Identity,
    Studio,
}

impl Component {
    /// Every component, in declaration order.
    pub const ALL: [Component; 10] = [
        Self::Network,
        Self::Storage,
        Self::Catalog,
        Self::Query,
        Self::KnowledgeBase,
        Self::Guardrail,
        Self::Ingestion,
        Self::ExperimentPipeline,
        Self::Identity,
        Self::Studio,
    ];

    /// Components whose outputs this one consumes.
    pub fn dependencies(&self) -> &'static [Component] {
        match self {
            Self::Network | Self::Storage | Self::Guardrail => &[],
            Self::Catalog | Self::KnowledgeBase | Self::Ingestion | Self::ExperimentPipeline => {
                &[Self::Storage]
            }
            Self::Query => &[Self::Storage, Self::Catalog],
            Self::Identity => &[
                Self::Storage,
                Self::Catalog,
                Self::Query,
                Self::KnowledgeBase,
                Self::Guardrail,
                Self::Ingestion,
                Self::ExperimentPipeline,
            ],
            Self::Studio => &[
                Self::Network,
                Self::Storage,
                Self::Catalog,
                Self::Query,
                Self::KnowledgeBase,
                Self::Guardrail,
                Self::Identity,
            ],
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Self::Catalog
                | Self::Query
                | Self::KnowledgeBase
                | Self::Guardrail
                | Self::Ingestion
                | Self::ExperimentPipeline
        )
    }

    /// Components whose resources read objects from the code bucket.
    pub fn reads_assets(&self) -> bool {
        matches!(self, Self::Catalog | Self::Ingestion | Self::ExperimentPipeline)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Storage => write!(f, "storage"),
            Self::Catalog => write!(f, "catalog"),
            Self::Query => write!(f, "query"),
            Self::KnowledgeBase => write!(f, "knowledge-base"),
            Self::Guardrail => write!(f, "guardrail"),
            Self::Ingestion => write!(f, "ingestion"),
            Self::ExperimentPipeline => write!(f, "experiment-pipeline"),
            Self::Identity => write!(f, "identity"),
            Self::Studio => write!(f, "studio"),
        }
    }
}

/// What the composition driver did with a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComponentStatus {
    Constructed { resources: usize },
    Skipped { reason: String },
}

/// One line of the composition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub component: Component,
    #[serde(flatten)]
    pub status: ComponentStatus,
}

impl ComponentRecord {
    pub fn is_constructed(&self) -> bool {
        matches!(self.status, ComponentStatus::Constructed { .. })
    }
}

// ============================================================================
// Stack lock
// ============================================================================

/// Per-environment record of the last deployed template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackLock {
    /// Schema version
    pub schema: String,

    /// Environment name
    pub environment: String,

    /// Orchestrator stack name
    pub stack_name: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 hash of the whole template
    pub template_hash: String,

    /// Per-resource state, keyed by logical id
    pub resources: IndexMap<String, ResourceLock>,

    /// Stack outputs reported by the orchestrator
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    /// Provider resource type
    #[serde(rename = "type")]
    pub resource_type: String,

    /// BLAKE3 hash of the descriptor
    pub hash: String,
}

// ============================================================================
// Plan
// ============================================================================

/// Action the orchestrator will take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub logical_id: String,
    pub resource_type: String,
    pub action: PlanAction,
}

/// Diff between the composed template and the stack lock.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub stack_name: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
    /// Whole-template hash differs from the lock (or there is no lock).
    /// Catches output and description edits no resource hash sees.
    pub template_changed: bool,
}

impl ExecutionPlan {
    pub fn has_changes(&self) -> bool {
        self.to_create + self.to_update + self.to_destroy > 0 || self.template_changed
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    RunStarted {
        environment: String,
        run_id: String,
        command: String,
        lakeforge_version: String,
    },
    ComponentDeclared {
        environment: String,
        component: Component,
        resources: usize,
    },
    ComponentSkipped {
        environment: String,
        component: Component,
        reason: String,
    },
    DeployCompleted {
        environment: String,
        run_id: String,
        template_hash: String,
        total_seconds: f64,
    },
    RunFailed {
        environment: String,
        run_id: String,
        error: String,
    },
    DestroyCompleted {
        environment: String,
        run_id: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_camel_case() {
        let json = r#"{
            "accountId": "123456789012",
            "region": "eu-west-1",
            "domainName": "ml-platform-dev",
            "networkAccess": "isolated",
            "projectPrefix": "mlp",
            "features": { "catalog": true, "queryEngine": true },
            "tags": { "team": "data" }
        }"#;
        let config: EnvironmentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.account_id, "123456789012");
        assert_eq!(config.network_mode(), NetworkAccess::Isolated);
        assert!(config.features.catalog);
        assert!(config.features.query_engine);
        assert!(!config.features.generative_ai);
        assert_eq!(config.tags["team"], "data");
        assert!(config.environment.is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let json = r#"{
            "accountId": "123456789012",
            "region": "us-east-1",
            "domainName": "d",
            "projectPrefix": "p"
        }"#;
        let config: EnvironmentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.network_mode(), NetworkAccess::Public);
        assert_eq!(config.features, FeatureToggles::default());
        assert!(config.tags.is_empty());
    }

    #[test]
    fn test_legacy_isolated_flag_wins() {
        let json = r#"{
            "accountId": "123456789012",
            "region": "us-east-1",
            "domainName": "d",
            "projectPrefix": "p",
            "networkAccess": "public",
            "isolated": true
        }"#;
        let config: EnvironmentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.network_mode(), NetworkAccess::Isolated);
    }

    #[test]
    fn test_knowledge_base_requires_generative_ai() {
        let f = FeatureToggles {
            knowledge_base: true,
            guardrails: true,
            ..Default::default()
        };
        assert!(!f.is_active(Component::KnowledgeBase));
        assert!(!f.is_active(Component::Guardrail));
        assert!(f
            .skip_reason(Component::KnowledgeBase)
            .unwrap()
            .contains("requires features.generativeAi"));

        let f = FeatureToggles {
            generative_ai: true,
            ..f
        };
        assert!(f.is_active(Component::KnowledgeBase));
        assert!(f.skip_reason(Component::Guardrail).is_none());
    }

    #[test]
    fn test_mandatory_components_always_active() {
        let f = FeatureToggles::default();
        for c in Component::ALL {
            assert_eq!(f.is_active(c), !c.is_optional(), "{c}");
        }
    }

    #[test]
    fn test_bootstrap_toggles_hold_back_asset_readers() {
        let all = FeatureToggles {
            catalog: true,
            query_engine: true,
            generative_ai: true,
            knowledge_base: true,
            guardrails: true,
            data_ingestion: true,
            experiment_pipeline: true,
        };
        let bootstrap = all.without_asset_consumers();
        for c in Component::ALL {
            assert_eq!(bootstrap.is_active(c), !c.reads_assets(), "{c}");
        }
    }

    #[test]
    fn test_component_display() {
        assert_eq!(Component::KnowledgeBase.to_string(), "knowledge-base");
        assert_eq!(Component::Studio.to_string(), "studio");
        assert_eq!(
            Component::ExperimentPipeline.to_string(),
            "experiment-pipeline"
        );
    }

    #[test]
    fn test_component_record_serde() {
        let rec = ComponentRecord {
            component: Component::Catalog,
            status: ComponentStatus::Skipped {
                reason: "off".to_string(),
            },
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"component\":\"catalog\""));
        assert!(json.contains("\"status\":\"skipped\""));
        assert!(!rec.is_constructed());
    }

    #[test]
    fn test_plan_action_display() {
        assert_eq!(PlanAction::Create.to_string(), "CREATE");
        assert_eq!(PlanAction::NoOp.to_string(), "NO-OP");
    }

    #[test]
    fn test_stack_lock_roundtrip() {
        let lock = StackLock {
            schema: "1.0".to_string(),
            environment: "dev".to_string(),
            stack_name: "mlp-dev".to_string(),
            generated_at: "2026-02-16T14:00:00Z".to_string(),
            generator: "lakeforge 0.3.0".to_string(),
            template_hash: "blake3:abc".to_string(),
            resources: IndexMap::from([(
                "RawBucket".to_string(),
                ResourceLock {
                    resource_type: "AWS::S3::Bucket".to_string(),
                    hash: "blake3:def".to_string(),
                },
            )]),
            outputs: IndexMap::new(),
        };
        let yaml = serde_yaml_ng::to_string(&lock).unwrap();
        let back: StackLock = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.resources["RawBucket"].resource_type, "AWS::S3::Bucket");
    }

    #[test]
    fn test_provenance_event_serde() {
        let event = ProvenanceEvent::ComponentSkipped {
            environment: "dev".to_string(),
            component: Component::Guardrail,
            reason: "off".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"component_skipped\""));
        assert!(json.contains("\"component\":\"guardrail\""));
    }
}
