use crate::commands::{status_colored, worker_state_colored};
use crate::context::AppContext;
use anyhow::bail;
use colored::Colorize;

pub async fn handle(ctx: &AppContext, name: &str) -> anyhow::Result<()> {
    println!("{} {}", "デプロイを開始します:".blue().bold(), name.cyan());

    let outcome = ctx.orchestrator.deploy(name).await?;

    if let Some(plan) = &outcome.plan {
        println!("  プラン: {}", plan);
    }
    for worker in &outcome.workers {
        println!(
            "  {} {:<24} {}",
            "•".dimmed(),
            worker.provider_worker_id,
            worker_state_colored(worker.state)
        );
    }
    println!();

    if outcome.is_success() {
        println!(
            "{} {} ({} 台)",
            "✓ デプロイ完了:".green().bold(),
            name.cyan(),
            outcome.workers.len()
        );
        return Ok(());
    }

    println!("  状態: {}", status_colored(outcome.status));
    if outcome.shortfall > 0 {
        println!("  不足: {} 台", outcome.shortfall.to_string().red());
    }
    bail!(
        "デプロイに失敗しました: {}",
        outcome.error.as_deref().unwrap_or("不明なエラー")
    )
}
