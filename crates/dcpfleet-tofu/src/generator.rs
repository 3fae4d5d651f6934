//! Declarative config generator
//!
//! Turns a deployment definition into a provider/scenario-specific OpenTofu
//! document. Rendering is a pure function of the definition: the output is
//! canonicalized through `serde_json`, so the same input always produces the
//! same bytes.

use crate::error::{GenerateError, Result};
use crate::template::TemplateRegistry;
use crate::workspace::Workspace;
use dcpfleet_cloud::{DEPLOYMENT_TAG, DeploymentSpec, InfraDocument, flat_tag};
use serde_json::Value;
use std::collections::BTreeMap;
use tera::Context;
use tracing::{debug, info};

/// Tag key carrying the scenario name
pub const SCENARIO_TAG: &str = "dcpfleet-scenario";

pub struct ConfigGenerator {
    templates: TemplateRegistry,
}

impl ConfigGenerator {
    pub fn new(templates: TemplateRegistry) -> Self {
        Self { templates }
    }

    /// Generator over the built-in templates
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(TemplateRegistry::builtin()?))
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Template defaults overlaid with the deployment's own variables
    pub fn effective_variables(&self, spec: &DeploymentSpec) -> Result<BTreeMap<String, Value>> {
        let template = self
            .templates
            .get(&spec.provider, spec.scenario)
            .ok_or_else(|| GenerateError::TemplateNotFound {
                provider: spec.provider.clone(),
                scenario: spec.scenario,
            })?;

        let mut variables = template.defaults.clone();
        variables.extend(spec.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(variables)
    }

    /// Required template variables that are absent or empty
    pub fn missing_variables(&self, spec: &DeploymentSpec) -> Result<Vec<String>> {
        let template = self
            .templates
            .get(&spec.provider, spec.scenario)
            .ok_or_else(|| GenerateError::TemplateNotFound {
                provider: spec.provider.clone(),
                scenario: spec.scenario,
            })?;

        let merged = DeploymentSpec {
            variables: self.effective_variables(spec)?,
            ..spec.clone()
        };
        Ok(template
            .required_variables
            .iter()
            .filter(|key| !merged.has_variable(key))
            .cloned()
            .collect())
    }

    /// Render the document in memory.
    pub fn render(&self, spec: &DeploymentSpec) -> Result<InfraDocument> {
        let template = self
            .templates
            .get(&spec.provider, spec.scenario)
            .ok_or_else(|| GenerateError::TemplateNotFound {
                provider: spec.provider.clone(),
                scenario: spec.scenario,
            })?;

        let missing = self.missing_variables(spec)?;
        if !missing.is_empty() {
            return Err(GenerateError::MissingVariables {
                deployment: spec.name.clone(),
                missing,
            });
        }

        let variables = self.effective_variables(spec)?;
        let tags = resource_tags(spec);
        let tag_list: Vec<String> = tags.iter().map(|(k, v)| flat_tag(k, v)).collect();

        let mut context = Context::new();
        context.insert("deployment", &spec.name);
        context.insert("provider", &spec.provider);
        context.insert("scenario", &spec.scenario.as_str());
        context.insert("region", &spec.region);
        context.insert("instance_count", &spec.instance_count);
        context.insert("variables", &variables);
        context.insert("tags", &tags);
        context.insert("tag_list", &tag_list);

        let user_data = match &template.bootstrap {
            Some(_) => self.templates.render(&template.bootstrap_key(), &context)?,
            None => String::new(),
        };
        context.insert("user_data", &user_data);

        let key = template.key();
        let rendered = self.templates.render(&key, &context)?;
        let document = InfraDocument::parse(&spec.name, &spec.provider, spec.scenario, &rendered)
            .map_err(|e| GenerateError::Template {
                template: key.clone(),
                message: e.to_string(),
            })?;

        debug!(
            deployment = %spec.name,
            template = %key,
            bytes = document.as_bytes().len(),
            "Rendered infrastructure document"
        );
        Ok(document)
    }

    /// Render and persist the document to the workspace.
    pub async fn generate(
        &self,
        spec: &DeploymentSpec,
        workspace: &dyn Workspace,
    ) -> Result<InfraDocument> {
        let document = self.render(spec)?;
        workspace
            .write_atomic(&spec.name, document.as_bytes())
            .await?;
        info!(deployment = %spec.name, "Generated infrastructure document");
        Ok(document)
    }
}

/// User tags plus the attribution tags every resource carries
pub fn resource_tags(spec: &DeploymentSpec) -> BTreeMap<String, String> {
    let mut tags = spec.tags.clone();
    tags.insert(DEPLOYMENT_TAG.to_string(), spec.name.clone());
    tags.insert(SCENARIO_TAG.to_string(), spec.scenario.as_str().to_string());
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::MemoryWorkspace;
    use dcpfleet_cloud::Scenario;
    use serde_json::json;

    fn backend_spec() -> DeploymentSpec {
        DeploymentSpec::new("fest-2025-enc", Scenario::BackendAutomation, "vultr")
            .with_region("ams")
            .with_instance_count(2)
            .with_variable("plan", json!("vc2-2c-4gb"))
            .with_variable("worker_image", json!("ghcr.io/festival/dcp-worker:1.4"))
            .with_tag("festival", "berlinale")
    }

    #[test]
    fn test_render_backend_automation() {
        let generator = ConfigGenerator::builtin().unwrap();
        let document = generator.render(&backend_spec()).unwrap();

        let worker = document.resource("vultr_instance", "worker").unwrap();
        assert_eq!(worker["count"], json!(2));
        assert_eq!(worker["region"], json!("ams"));
        assert_eq!(worker["plan"], json!("vc2-2c-4gb"));
        assert_eq!(worker["os_id"], json!(2284));
        assert_eq!(worker["label"], json!("fest-2025-enc-worker-${count.index}"));
        assert_eq!(
            worker["tags"],
            json!([
                "dcpfleet-deployment:fest-2025-enc",
                "dcpfleet-scenario:backend-automation",
                "festival:berlinale"
            ])
        );

        let user_data = worker["user_data"].as_str().unwrap();
        assert!(user_data.starts_with("#!/bin/bash"));
        assert!(user_data.contains("docker pull ghcr.io/festival/dcp-worker:1.4"));
        assert!(user_data.contains("DCPFLEET_DEPLOYMENT=fest-2025-enc"));
        assert!(!user_data.contains("DCP_QUEUE_URL"));
    }

    #[test]
    fn test_render_is_byte_identical() {
        let generator = ConfigGenerator::builtin().unwrap();
        let first = generator.render(&backend_spec()).unwrap();
        let second = generator.render(&backend_spec()).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_user_variables_override_defaults() {
        let generator = ConfigGenerator::builtin().unwrap();
        let spec = backend_spec()
            .with_variable("os_id", json!(1743))
            .with_variable("queue_url", json!("amqp://queue.internal/dcp"));
        let document = generator.render(&spec).unwrap();
        let worker = document.resource("vultr_instance", "worker").unwrap();
        assert_eq!(worker["os_id"], json!(1743));
        assert!(
            worker["user_data"]
                .as_str()
                .unwrap()
                .contains("-e DCP_QUEUE_URL=amqp://queue.internal/dcp")
        );
    }

    #[test]
    fn test_missing_variables() {
        let generator = ConfigGenerator::builtin().unwrap();
        let spec = DeploymentSpec::new("qa-box", Scenario::ManualTesting, "vultr")
            .with_region("fra")
            .with_variable("plan", json!("vc2-1c-1gb"));

        match generator.render(&spec) {
            Err(GenerateError::MissingVariables { deployment, missing }) => {
                assert_eq!(deployment, "qa-box");
                assert_eq!(missing, vec!["ssh_key_ids".to_string()]);
            }
            other => panic!("Expected MissingVariables, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_template() {
        let generator = ConfigGenerator::builtin().unwrap();
        let spec = DeploymentSpec::new("x", Scenario::ManualTesting, "hetzner");
        assert!(matches!(
            generator.render(&spec),
            Err(GenerateError::TemplateNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_generate_persists_document() {
        let generator = ConfigGenerator::builtin().unwrap();
        let workspace = MemoryWorkspace::new();
        let document = generator.generate(&backend_spec(), &workspace).await.unwrap();

        let stored = workspace.read("fest-2025-enc").await.unwrap().unwrap();
        assert_eq!(stored, document.as_bytes());
    }
}
