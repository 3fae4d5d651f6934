use crate::context::AppContext;
use anyhow::{Context, bail};
use colored::Colorize;
use dcpfleet_tofu::{Tofu, Workspace};
use std::collections::BTreeMap;

pub async fn handle(ctx: &AppContext, name: &str, binary: &str) -> anyhow::Result<()> {
    let document = ctx.orchestrator.generate(name).await?;
    let dir = ctx
        .workspace
        .local_dir(name)
        .context("ワークスペースがディスク上にありません")?;
    println!(
        "{} {}",
        "ドキュメントを生成しました:".green(),
        dir.display().to_string().cyan()
    );
    println!(
        "  {} バイト ({} / {})",
        document.as_bytes().len(),
        document.provider(),
        document.scenario()
    );

    let mut tofu = Tofu::new(&dir).with_binary(binary);
    if let Some(api_key) = ctx.settings.providers.vultr.resolve_api_key() {
        tofu = tofu.with_env("VULTR_API_KEY", api_key);
    }

    let version = tofu.check_installed().await?;
    println!("  {} {}", binary.dimmed(), version.dimmed());

    tofu.init().await?;
    let report = tofu.validate().await?;
    for diagnostic in &report.diagnostics {
        let label = match diagnostic.severity.as_str() {
            "error" => diagnostic.severity.red(),
            _ => diagnostic.severity.yellow(),
        };
        println!("  {} {}", label, diagnostic.summary);
        if !diagnostic.detail.is_empty() {
            println!("    {}", diagnostic.detail.dimmed());
        }
    }
    if !report.valid {
        bail!("検証エラー: {} 件", report.error_count);
    }
    println!("{}", "✓ 検証に成功しました".green());

    let changes = tofu.plan(&BTreeMap::new()).await?;
    if changes.is_empty() {
        println!("{}", "変更はありません".dimmed());
    } else {
        println!("{} {}", "プラン:".bold(), changes);
    }
    Ok(())
}
