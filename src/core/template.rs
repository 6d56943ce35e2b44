//! Provider template: resource descriptors, intrinsic references, outputs.
//!
//! Components declare descriptors under unique logical ids and refer to
//! each other only through `Ref`, `Fn::GetAtt`, `Fn::Sub` and `DependsOn`.
//! [`Template::check_references`] rejects any reference whose target was
//! never declared, which is how a disabled feature leaking into a
//! downstream component surfaces.

use super::error::{Error, Result};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const FORMAT_VERSION: &str = "2010-09-09";

/// Desired state of one provider resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties", default)]
    pub properties: Value,

    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceDescriptor {
    pub fn new(resource_type: &str, properties: Value) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, logical_id: &str) -> Self {
        if !self.depends_on.iter().any(|d| d == logical_id) {
            self.depends_on.push(logical_id.to_string());
        }
        self
    }
}

/// A named stack output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateOutput {
    #[serde(rename = "Description")]
    pub description: String,

    #[serde(rename = "Value")]
    pub value: Value,
}

/// The composed stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description")]
    pub description: String,

    #[serde(rename = "Resources")]
    pub resources: IndexMap<String, ResourceDescriptor>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, TemplateOutput>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: description.into(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// Declare a resource. Duplicate logical ids are declaration errors.
    pub fn add(&mut self, logical_id: &str, descriptor: ResourceDescriptor) -> Result<String> {
        if !is_logical_id(logical_id) {
            return Err(Error::declaration(format!(
                "logical id '{}' must be alphanumeric",
                logical_id
            )));
        }
        if self.resources.contains_key(logical_id) {
            return Err(Error::declaration(format!(
                "logical id '{}' declared twice",
                logical_id
            )));
        }
        tracing::debug!(logical_id, resource_type = %descriptor.resource_type, "declared resource");
        self.resources.insert(logical_id.to_string(), descriptor);
        Ok(logical_id.to_string())
    }

    /// Add an explicit ordering edge after both resources exist.
    pub fn add_dependency(&mut self, logical_id: &str, on: &str) -> Result<()> {
        if !self.resources.contains_key(on) {
            return Err(Error::declaration(format!(
                "'{}' cannot depend on undeclared '{}'",
                logical_id, on
            )));
        }
        let resource = self.resources.get_mut(logical_id).ok_or_else(|| {
            Error::declaration(format!("cannot add dependency to undeclared '{}'", logical_id))
        })?;
        if !resource.depends_on.iter().any(|d| d == on) {
            resource.depends_on.push(on.to_string());
        }
        Ok(())
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) -> Result<()> {
        if self.outputs.contains_key(name) {
            return Err(Error::declaration(format!("output '{}' declared twice", name)));
        }
        self.outputs.insert(
            name.to_string(),
            TemplateOutput {
                description: description.to_string(),
                value,
            },
        );
        Ok(())
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id)
    }

    /// Logical ids of every resource of the given provider type.
    pub fn ids_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
            .map(|(id, _)| id.as_str())
    }

    /// Every logical id a resource points at (intrinsics and `DependsOn`).
    pub fn references_of(&self, logical_id: &str) -> IndexSet<String> {
        let mut refs = IndexSet::new();
        if let Some(r) = self.resources.get(logical_id) {
            collect_references(&r.properties, &mut refs);
            refs.extend(r.depends_on.iter().cloned());
        }
        refs
    }

    /// Every logical id referenced anywhere, including outputs.
    pub fn all_references(&self) -> IndexSet<String> {
        let mut refs = IndexSet::new();
        for r in self.resources.values() {
            collect_references(&r.properties, &mut refs);
            refs.extend(r.depends_on.iter().cloned());
        }
        for o in self.outputs.values() {
            collect_references(&o.value, &mut refs);
        }
        refs
    }

    /// Fail on any reference to a logical id that was never declared.
    pub fn check_references(&self) -> Result<()> {
        let mut dangling: Vec<String> = Vec::new();
        for (id, r) in &self.resources {
            let mut refs = IndexSet::new();
            collect_references(&r.properties, &mut refs);
            refs.extend(r.depends_on.iter().cloned());
            for target in refs {
                if !self.contains(&target) {
                    dangling.push(format!("{} -> {}", id, target));
                }
            }
        }
        for (name, o) in &self.outputs {
            let mut refs = IndexSet::new();
            collect_references(&o.value, &mut refs);
            for target in refs {
                if !self.contains(&target) {
                    dangling.push(format!("output {} -> {}", name, target));
                }
            }
        }
        if dangling.is_empty() {
            Ok(())
        } else {
            Err(Error::declaration(format!(
                "dangling reference(s): {}",
                dangling.join(", ")
            )))
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ============================================================================
// Intrinsics
// ============================================================================

/// `{"Ref": id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [id, attr]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::Sub": template}`: `${Id}` and `${Id.Attr}` count as references.
pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// Provider tag list from key/value pairs.
pub fn tags<'a>(pairs: impl IntoIterator<Item = (&'a String, &'a String)>) -> Value {
    Value::Array(
        pairs
            .into_iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect(),
    )
}

fn collect_references(value: &Value, out: &mut IndexSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("Ref") {
                if !id.starts_with("AWS::") {
                    out.insert(id.clone());
                }
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(id)) = parts.first() {
                    out.insert(id.clone());
                }
            }
            if let Some(Value::String(s)) = map.get("Fn::Sub") {
                collect_sub_references(s, out);
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

fn collect_sub_references(s: &str, out: &mut IndexSet<String>) {
    let mut rest = s;
    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            break;
        };
        let name = &after[..close];
        let id = name.split('.').next().unwrap_or(name);
        if !id.starts_with("AWS::") && !id.starts_with('!') && !id.is_empty() {
            out.insert(id.to_string());
        }
        rest = &after[close + 1..];
    }
}

fn is_logical_id(s: &str) -> bool {
    !s.is_empty() && s.len() <= 255 && s.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket() -> ResourceDescriptor {
        ResourceDescriptor::new("AWS::S3::Bucket", json!({ "BucketName": "b" }))
    }

    #[test]
    fn test_add_and_duplicate() {
        let mut t = Template::new("t");
        assert_eq!(t.add("Raw", bucket()).unwrap(), "Raw");
        let err = t.add("Raw", bucket()).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_logical_id_must_be_alphanumeric() {
        let mut t = Template::new("t");
        assert!(t.add("raw-bucket", bucket()).is_err());
        assert!(t.add("", bucket()).is_err());
    }

    #[test]
    fn test_references_from_all_intrinsics() {
        let mut t = Template::new("t");
        t.add("Key", ResourceDescriptor::new("AWS::KMS::Key", json!({})))
            .unwrap();
        t.add("Raw", bucket()).unwrap();
        t.add(
            "Policy",
            ResourceDescriptor::new(
                "AWS::IAM::Policy",
                json!({
                    "Bucket": reference("Raw"),
                    "Key": get_att("Key", "Arn"),
                    "Arn": sub("arn:${AWS::Partition}:s3:::${Raw}/*"),
                    "Region": reference("AWS::Region"),
                    "Literal": sub("${!NotARef}"),
                }),
            )
            .depends_on("Key"),
        )
        .unwrap();
        let refs: Vec<_> = t.references_of("Policy").into_iter().collect();
        assert_eq!(refs, vec!["Raw", "Key"]);
        t.check_references().unwrap();
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let mut t = Template::new("t");
        t.add(
            "Role",
            ResourceDescriptor::new("AWS::IAM::Role", json!({ "Db": reference("GlueDatabase") })),
        )
        .unwrap();
        let err = t.check_references().unwrap_err();
        assert!(err.to_string().contains("Role -> GlueDatabase"));
    }

    #[test]
    fn test_dangling_output_rejected() {
        let mut t = Template::new("t");
        t.add_output("KnowledgeBaseId", "id", get_att("KnowledgeBase", "KnowledgeBaseId"))
            .unwrap();
        assert!(t.check_references().is_err());
    }

    #[test]
    fn test_add_dependency() {
        let mut t = Template::new("t");
        t.add("A", bucket()).unwrap();
        t.add("B", bucket()).unwrap();
        t.add_dependency("A", "B").unwrap();
        t.add_dependency("A", "B").unwrap();
        assert_eq!(t.resources["A"].depends_on, vec!["B"]);
        assert!(t.add_dependency("A", "Ghost").is_err());
        assert!(t.add_dependency("Ghost", "A").is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let mut t = Template::new("platform");
        t.add("Raw", bucket()).unwrap();
        t.add_output("RawBucketName", "raw", reference("Raw")).unwrap();
        let v: Value = serde_json::from_str(&t.to_json_pretty().unwrap()).unwrap();
        assert_eq!(v["AWSTemplateFormatVersion"], FORMAT_VERSION);
        assert_eq!(v["Resources"]["Raw"]["Type"], "AWS::S3::Bucket");
        assert!(v["Resources"]["Raw"].get("DependsOn").is_none());
        assert_eq!(v["Outputs"]["RawBucketName"]["Value"]["Ref"], "Raw");
    }

    #[test]
    fn test_tags() {
        let pairs = IndexMap::from([("team".to_string(), "data".to_string())]);
        assert_eq!(tags(&pairs), json!([{ "Key": "team", "Value": "data" }]));
    }
}
