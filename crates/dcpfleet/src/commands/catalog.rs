use crate::DefinitionArgs;
use crate::commands::definition::spec_from_args;
use crate::context::AppContext;
use anyhow::bail;
use colored::Colorize;

pub fn providers(ctx: &AppContext) -> anyhow::Result<()> {
    for descriptor in ctx.orchestrator.list_providers() {
        println!(
            "{} ({})",
            descriptor.name.cyan().bold(),
            descriptor.display_name
        );
        let scenarios: Vec<&str> = descriptor.scenarios.iter().map(|s| s.as_str()).collect();
        println!("  シナリオ:   {}", scenarios.join(", "));
        let regions: Vec<&str> = descriptor.regions.iter().map(|r| r.id.as_str()).collect();
        println!("  リージョン: {}", regions.join(", "));
        println!("  プラン:");
        for instance in &descriptor.instance_types {
            println!(
                "    {:<16} {} vCPU / {} MB / {} GB  {}",
                instance.id,
                instance.vcpus,
                instance.memory_mb,
                instance.disk_gb,
                format!("${:.3}/h", instance.hourly_cost).dimmed()
            );
        }
    }
    Ok(())
}

pub async fn estimate(ctx: &AppContext, args: DefinitionArgs) -> anyhow::Result<()> {
    let spec = spec_from_args(args)?;
    let monthly = ctx.orchestrator.estimate_cost(&spec).await?;
    println!(
        "{}: {} 台 × {} → {}",
        spec.name.cyan(),
        spec.instance_count,
        spec.variable_str("plan").unwrap_or("(plan 未指定)"),
        format!("${monthly:.2}/月").green().bold()
    );
    Ok(())
}

pub async fn test_connection(ctx: &AppContext, provider: &str) -> anyhow::Result<()> {
    println!("{} {}", "接続を確認中:".blue(), provider.cyan());
    if ctx.orchestrator.test_connection(provider).await? {
        println!("{}", "✓ 認証に成功しました".green());
        return Ok(());
    }
    if provider == dcpfleet_cloud_vultr::PROVIDER_NAME {
        println!(
            "  {} 環境変数 {} か設定ファイルの providers.vultr.api_key を確認してください",
            "ヒント:".yellow(),
            ctx.settings.providers.vultr.api_key_env
        );
    }
    bail!("{} の認証に失敗しました", provider)
}
