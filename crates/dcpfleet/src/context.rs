//! Settings → orchestrator wiring

use anyhow::Context as _;
use dcpfleet_cloud::ProviderRegistry;
use dcpfleet_cloud_vultr::{VultrCredentials, VultrProvider};
use dcpfleet_config::Settings;
use dcpfleet_orchestrator::{JsonFileRepository, Orchestrator, OrchestratorConfig};
use dcpfleet_tofu::{ConfigGenerator, FsWorkspace};
use std::path::PathBuf;
use std::sync::Arc;

pub struct AppContext {
    pub settings: Settings,
    pub config_path: Option<PathBuf>,
    pub workspace: Arc<FsWorkspace>,
    pub orchestrator: Orchestrator,
}

impl AppContext {
    pub fn load() -> anyhow::Result<Self> {
        let (settings, config_path) = Settings::discover().context("設定の読み込みに失敗しました")?;
        if let Some(path) = &config_path {
            tracing::debug!(path = %path.display(), "Using settings file");
        }

        let registry = Arc::new(build_registry(&settings)?);
        let repository = Arc::new(JsonFileRepository::new(&settings.state_dir));
        let workspace = Arc::new(FsWorkspace::new(&settings.workspace_dir));
        let generator = Arc::new(ConfigGenerator::builtin()?);

        let orchestrator = Orchestrator::new(
            registry,
            repository,
            Arc::clone(&workspace) as _,
            generator,
        )
        .with_config(OrchestratorConfig {
            lock_wait: settings.orchestrator.lock_wait(),
            apply_timeout: settings.orchestrator.apply_timeout(),
            unhealthy_grace: settings.reconciler.unhealthy_grace(),
            ..OrchestratorConfig::default()
        });

        Ok(Self {
            settings,
            config_path,
            workspace,
            orchestrator,
        })
    }
}

fn build_registry(settings: &Settings) -> anyhow::Result<ProviderRegistry> {
    let vultr = &settings.providers.vultr;
    let api_key = vultr.resolve_api_key().unwrap_or_else(|| {
        // Offline commands (create, status, list, providers) still work;
        // API calls fail with an authentication error.
        tracing::debug!(env = %vultr.api_key_env, "Vultr API key not configured");
        String::new()
    });

    let mut credentials = VultrCredentials::new(api_key);
    if let Some(base_url) = &vultr.base_url {
        credentials = credentials.with_base_url(base_url);
    }
    let provider = VultrProvider::new(credentials)?.with_pricing_ttl(vultr.pricing_ttl());

    Ok(ProviderRegistry::new().with_provider(Arc::new(provider)))
}
