//! Content-safety guardrail applied to generative model calls.

use super::Naming;
use crate::core::error::Result;
use crate::core::template::{ResourceDescriptor, Template};
use crate::core::types::EnvironmentConfig;
use serde_json::{json, Value};

const BLOCKED_MESSAGE: &str =
    "This request was blocked by the platform content policy. Please rephrase and try again.";

/// Filtered categories and their input/output strength.
const CONTENT_FILTERS: &[(&str, &str, &str)] = &[
    ("HATE", "HIGH", "HIGH"),
    ("INSULTS", "HIGH", "HIGH"),
    ("SEXUAL", "HIGH", "HIGH"),
    ("VIOLENCE", "HIGH", "HIGH"),
    ("MISCONDUCT", "HIGH", "HIGH"),
    // prompt attacks only apply to input
    ("PROMPT_ATTACK", "HIGH", "NONE"),
];

#[derive(Debug, Clone)]
pub struct GuardrailOutputs {
    pub guardrail: String,
}

pub fn declare(template: &mut Template, config: &EnvironmentConfig) -> Result<GuardrailOutputs> {
    let naming = Naming::new(config);
    let filters: Vec<Value> = CONTENT_FILTERS
        .iter()
        .map(|(kind, input, output)| {
            json!({ "Type": kind, "InputStrength": input, "OutputStrength": output })
        })
        .collect();

    let guardrail = template.add(
        "Guardrail",
        ResourceDescriptor::new(
            "AWS::Bedrock::Guardrail",
            json!({
                "Name": naming.resource("guardrail"),
                "Description": format!("{} content safety policy", config.project_prefix),
                "BlockedInputMessaging": BLOCKED_MESSAGE,
                "BlockedOutputsMessaging": BLOCKED_MESSAGE,
                "ContentPolicyConfig": { "FiltersConfig": filters },
                "Tags": naming.tags(),
            }),
        ),
    )?;

    tracing::info!(filters = CONTENT_FILTERS.len(), "guardrail declared");
    Ok(GuardrailOutputs { guardrail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::fixtures;

    #[test]
    fn test_guardrail_filters() {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let out = declare(&mut t, &config).unwrap();
        let props = &t.resources[&out.guardrail].properties;
        let kinds: Vec<_> = props["ContentPolicyConfig"]["FiltersConfig"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["Type"].as_str().unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec!["HATE", "INSULTS", "SEXUAL", "VIOLENCE", "MISCONDUCT", "PROMPT_ATTACK"]
        );
        assert_eq!(props["ContentPolicyConfig"]["FiltersConfig"][5]["OutputStrength"], "NONE");
        assert_eq!(props["BlockedInputMessaging"], BLOCKED_MESSAGE);
    }

    #[test]
    fn test_guardrail_is_a_leaf() {
        let config = fixtures::config();
        let mut t = Template::new("t");
        let out = declare(&mut t, &config).unwrap();
        assert!(t.references_of(&out.guardrail).is_empty());
    }
}
