use crate::DefinitionArgs;
use crate::commands::status_colored;
use crate::context::AppContext;
use anyhow::{Context, bail};
use colored::Colorize;
use dcpfleet_cloud::{DeploymentConfig, DeploymentSpec, Scenario};
use serde_json::Value;

/// Build a definition from `--file` or from flags.
pub fn spec_from_args(args: DefinitionArgs) -> anyhow::Result<DeploymentSpec> {
    if let Some(path) = &args.file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("定義ファイルを読み込めません: {}", path.display()))?;
        // YAML is a superset of JSON
        let spec: DeploymentSpec = serde_yaml::from_str(&content)
            .with_context(|| format!("定義ファイルの形式が不正です: {}", path.display()))?;
        return Ok(spec);
    }

    let Some(name) = args.name else {
        bail!("デプロイメント名または --file を指定してください");
    };
    let scenario: Scenario = args.scenario.parse()?;
    let mut spec =
        DeploymentSpec::new(name, scenario, args.provider).with_instance_count(args.count);
    if let Some(region) = args.region {
        spec = spec.with_region(region);
    }
    for var in &args.vars {
        let (key, value) = split_pair(var)?;
        spec = spec.with_variable(key, parse_value(value));
    }
    for tag in &args.tags {
        let (key, value) = split_pair(tag)?;
        spec = spec.with_tag(key, value);
    }
    Ok(spec)
}

fn split_pair(pair: &str) -> anyhow::Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => bail!("KEY=VALUE 形式で指定してください: {}", pair),
    }
}

/// JSON when it parses, otherwise the raw string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_definition(config: &DeploymentConfig) {
    let spec = &config.spec;
    println!("  名前:       {}", spec.name.cyan());
    println!("  状態:       {}", status_colored(config.status));
    println!("  シナリオ:   {}", spec.scenario);
    println!("  プロバイダー: {}", spec.provider);
    println!(
        "  リージョン: {}",
        spec.region.as_deref().unwrap_or("(未指定)")
    );
    println!("  台数:       {}", spec.instance_count);
    for (key, value) in &spec.variables {
        println!("    {} = {}", key.dimmed(), value);
    }
}

pub async fn create(ctx: &AppContext, args: DefinitionArgs) -> anyhow::Result<()> {
    let spec = spec_from_args(args)?;
    let config = ctx.orchestrator.create_deployment(spec).await?;
    println!("{}", "✓ デプロイメントを作成しました".green());
    print_definition(&config);
    println!();
    println!("次のコマンドでデプロイできます:");
    println!("  {} deploy {}", "dcpfleet".cyan(), config.name());
    Ok(())
}

pub async fn update(ctx: &AppContext, args: DefinitionArgs) -> anyhow::Result<()> {
    let spec = spec_from_args(args)?;
    let config = ctx.orchestrator.update_deployment(spec).await?;
    println!("{}", "✓ デプロイメントを更新しました".green());
    print_definition(&config);
    Ok(())
}

pub async fn scale(ctx: &AppContext, name: &str, count: u32) -> anyhow::Result<()> {
    let config = ctx.orchestrator.scale(name, count).await?;
    println!(
        "{} {} の目標台数を {} に変更しました",
        "✓".green(),
        name.cyan(),
        count.to_string().bold()
    );
    if config.status == dcpfleet_cloud::DeploymentStatus::Deployed {
        println!(
            "  {}",
            "次回の reconcile または deploy で反映されます".dimmed()
        );
    }
    Ok(())
}
