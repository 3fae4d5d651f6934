//! Materialized declarative infrastructure document
//!
//! Documents use the OpenTofu JSON configuration syntax (`main.tf.json`) so
//! that they can be applied by `tofu` directly and read back by provider
//! adapters without an HCL parser.

use crate::error::{CloudError, Result};
use crate::model::Scenario;
use serde_json::Value;

/// File name of the document inside a deployment workspace
pub const DOCUMENT_FILE: &str = "main.tf.json";

#[derive(Debug, Clone, PartialEq)]
pub struct InfraDocument {
    deployment: String,
    provider: String,
    scenario: Scenario,
    body: Value,
    rendered: String,
}

impl InfraDocument {
    /// Build from a JSON body; the rendered text is the canonical pretty form.
    pub fn from_value(
        deployment: impl Into<String>,
        provider: impl Into<String>,
        scenario: Scenario,
        body: Value,
    ) -> Result<Self> {
        if !body.is_object() {
            return Err(CloudError::InvalidDocument(
                "top level must be an object".to_string(),
            ));
        }
        let mut rendered = serde_json::to_string_pretty(&body)?;
        rendered.push('\n');
        Ok(Self {
            deployment: deployment.into(),
            provider: provider.into(),
            scenario,
            body,
            rendered,
        })
    }

    /// Parse document text, normalizing it to the canonical form.
    pub fn parse(
        deployment: impl Into<String>,
        provider: impl Into<String>,
        scenario: Scenario,
        content: &str,
    ) -> Result<Self> {
        let body: Value = serde_json::from_str(content)
            .map_err(|e| CloudError::InvalidDocument(e.to_string()))?;
        Self::from_value(deployment, provider, scenario, body)
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.rendered.as_bytes()
    }

    /// `resource.<resource_type>.<name>` block
    pub fn resource(&self, resource_type: &str, name: &str) -> Option<&Value> {
        self.body.get("resource")?.get(resource_type)?.get(name)
    }

    /// `resource.<resource_type>.<name>`, or an error naming the missing block
    pub fn require_resource(&self, resource_type: &str, name: &str) -> Result<&Value> {
        self.resource(resource_type, name).ok_or_else(|| {
            CloudError::InvalidDocument(format!(
                "resource {resource_type}.{name} not found in document for {}",
                self.deployment
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_rendering() {
        let a = InfraDocument::parse(
            "d",
            "vultr",
            Scenario::ManualTesting,
            r#"{"resource":{"vultr_instance":{"worker":{"plan":"p","count":1}}}}"#,
        )
        .unwrap();
        let b = InfraDocument::parse(
            "d",
            "vultr",
            Scenario::ManualTesting,
            r#"{ "resource": { "vultr_instance": { "worker": { "count": 1, "plan": "p" } } } }"#,
        )
        .unwrap();

        assert_eq!(a.as_str(), b.as_str());
        assert!(a.as_str().ends_with('\n'));
        assert_eq!(
            a.resource("vultr_instance", "worker").unwrap()["plan"],
            json!("p")
        );
        assert!(a.require_resource("vultr_instance", "db").is_err());
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(InfraDocument::parse("d", "vultr", Scenario::ManualTesting, "[1]").is_err());
        assert!(InfraDocument::parse("d", "vultr", Scenario::ManualTesting, "{").is_err());
    }
}
