//! Built-in and registered document templates
//!
//! A template is selected by `(provider, scenario)` and consists of a tera
//! source for the `main.tf.json` document, an optional tera source for the
//! worker bootstrap script, the variables it requires and the defaults it
//! falls back to.

use crate::error::{GenerateError, Result};
use dcpfleet_cloud::Scenario;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tera::Tera;

const VULTR_BACKEND_AUTOMATION: &str =
    include_str!("../templates/vultr_backend_automation.tf.json.tera");
const VULTR_MANUAL_TESTING: &str = include_str!("../templates/vultr_manual_testing.tf.json.tera");
const WORKER_BOOTSTRAP: &str = include_str!("../templates/worker_bootstrap.sh.tera");
const MANUAL_BOOTSTRAP: &str = include_str!("../templates/manual_bootstrap.sh.tera");

/// Ubuntu 24.04 LTS x64
const VULTR_DEFAULT_OS_ID: i64 = 2284;

#[derive(Debug, Clone)]
pub struct TemplateSpec {
    pub provider: String,
    pub scenario: Scenario,
    pub document: String,
    pub bootstrap: Option<String>,
    pub required_variables: Vec<String>,
    pub defaults: BTreeMap<String, Value>,
}

impl TemplateSpec {
    pub fn new(provider: impl Into<String>, scenario: Scenario, document: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            scenario,
            document: document.into(),
            bootstrap: None,
            required_variables: Vec::new(),
            defaults: BTreeMap::new(),
        }
    }

    pub fn with_bootstrap(mut self, bootstrap: impl Into<String>) -> Self {
        self.bootstrap = Some(bootstrap.into());
        self
    }

    pub fn require(mut self, variables: &[&str]) -> Self {
        self.required_variables
            .extend(variables.iter().map(|v| v.to_string()));
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    /// Registry key, e.g. `vultr/backend-automation`
    pub fn key(&self) -> String {
        template_key(&self.provider, self.scenario)
    }

    pub(crate) fn bootstrap_key(&self) -> String {
        format!("{}/bootstrap", self.key())
    }
}

pub fn template_key(provider: &str, scenario: Scenario) -> String {
    format!("{provider}/{scenario}")
}

/// Templates compiled into a single tera instance
pub struct TemplateRegistry {
    tera: Tera,
    specs: BTreeMap<String, TemplateSpec>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            specs: BTreeMap::new(),
        }
    }

    /// Registry with the templates shipped with DCPFleet
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(
            TemplateSpec::new("vultr", Scenario::BackendAutomation, VULTR_BACKEND_AUTOMATION)
                .with_bootstrap(WORKER_BOOTSTRAP)
                .require(&["plan", "worker_image"])
                .with_default("os_id", json!(VULTR_DEFAULT_OS_ID))
                .with_default("ssh_key_ids", json!([]))
                .with_default("enable_ipv6", json!(false))
                .with_default("queue_url", json!("")),
        )?;
        registry.register(
            TemplateSpec::new("vultr", Scenario::ManualTesting, VULTR_MANUAL_TESTING)
                .with_bootstrap(MANUAL_BOOTSTRAP)
                .require(&["plan", "ssh_key_ids"])
                .with_default("os_id", json!(VULTR_DEFAULT_OS_ID))
                .with_default("enable_ipv6", json!(true))
                .with_default("activation_email", json!(false))
                .with_default("worker_image", json!("")),
        )?;
        Ok(registry)
    }

    /// Compile and register a template, replacing any with the same key.
    pub fn register(&mut self, spec: TemplateSpec) -> Result<()> {
        let key = spec.key();
        self.tera
            .add_raw_template(&key, &spec.document)
            .map_err(|e| template_error(&key, &e))?;
        if let Some(bootstrap) = &spec.bootstrap {
            let bootstrap_key = spec.bootstrap_key();
            self.tera
                .add_raw_template(&bootstrap_key, bootstrap)
                .map_err(|e| template_error(&bootstrap_key, &e))?;
        }
        tracing::debug!(template = %key, "Registered document template");
        self.specs.insert(key, spec);
        Ok(())
    }

    pub fn get(&self, provider: &str, scenario: Scenario) -> Option<&TemplateSpec> {
        self.specs.get(&template_key(provider, scenario))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.specs.keys()
    }

    pub(crate) fn render(&self, key: &str, context: &tera::Context) -> Result<String> {
        self.tera
            .render(key, context)
            .map_err(|e| template_error(key, &e))
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten a tera error and its source chain into one message.
///
/// Tera's top-level message is usually just "Failed to render"; the cause
/// (undefined variable, filter error) lives further down the chain.
fn template_error(key: &str, e: &tera::Error) -> GenerateError {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }

    GenerateError::Template {
        template: key.to_string(),
        message: details.join(": "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_compile() {
        let registry = TemplateRegistry::builtin().unwrap();
        let keys: Vec<&str> = registry.keys().map(String::as_str).collect();
        assert_eq!(keys, ["vultr/backend-automation", "vultr/manual-testing"]);
        assert!(registry.get("vultr", Scenario::ManualTesting).is_some());
        assert!(registry.get("hetzner", Scenario::ManualTesting).is_none());
    }

    #[test]
    fn test_broken_template_is_rejected() {
        let mut registry = TemplateRegistry::new();
        let err = registry
            .register(TemplateSpec::new("x", Scenario::ManualTesting, "{{ unclosed"))
            .unwrap_err();
        assert!(matches!(err, GenerateError::Template { .. }));
    }
}
