use crate::commands::{status_colored, worker_state_colored};
use crate::context::AppContext;
use colored::Colorize;
use dcpfleet_cloud::DeploymentStatus;

pub async fn show(ctx: &AppContext, name: &str, json: bool) -> anyhow::Result<()> {
    let config = ctx.orchestrator.get_status(name).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", config.name().bold());
    println!("  状態:       {}", status_colored(config.status));
    println!(
        "  構成:       {} / {} / {}",
        spec.provider,
        spec.scenario,
        spec.region.as_deref().unwrap_or("-")
    );
    println!(
        "  ワーカー:   {}/{}",
        config.active_count(),
        spec.instance_count
    );
    if config.shortfall > 0 {
        println!("  不足:       {}", config.shortfall.to_string().red());
    }
    if let Some(error) = &config.last_error {
        println!("  エラー:     {}", error.red());
    }
    println!(
        "  更新日時:   {}",
        config.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if !config.workers.is_empty() {
        println!();
        println!(
            "{}",
            format!("{:<28} {:<14} {:<22}", "WORKER", "STATE", "CREATED").bold()
        );
        println!("{}", "─".repeat(64).dimmed());
        for worker in &config.workers {
            println!(
                "{:<28} {:<14} {:<22}",
                worker.provider_worker_id,
                worker_state_colored(worker.state).to_string(),
                worker.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    if !config.history.is_empty() {
        println!();
        println!("{}", "履歴:".bold());
        for transition in &config.history {
            let reason = transition
                .reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default();
            println!(
                "  {} {} → {}{}",
                transition.at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                transition.from,
                transition.to,
                reason.dimmed()
            );
        }
    }
    Ok(())
}

pub async fn list(ctx: &AppContext, status: Option<&str>) -> anyhow::Result<()> {
    let filter = status.map(str::parse::<DeploymentStatus>).transpose()?;
    let deployments = ctx.orchestrator.list_deployments(filter).await?;

    if deployments.is_empty() {
        println!("{}", "デプロイメントはありません".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<28} {:<12} {:<20} {:<10} {:<8}",
            "NAME", "STATUS", "SCENARIO", "PROVIDER", "WORKERS"
        )
        .bold()
    );
    println!("{}", "─".repeat(82).dimmed());
    for config in &deployments {
        println!(
            "{:<28} {:<12} {:<20} {:<10} {}/{}",
            config.name(),
            status_colored(config.status).to_string(),
            config.spec.scenario.as_str(),
            config.spec.provider,
            config.active_count(),
            config.spec.instance_count
        );
    }
    Ok(())
}
