use crate::context::AppContext;
use colored::Colorize;
use dcpfleet_orchestrator::ReconcileReport;

fn print_report(report: &ReconcileReport) {
    if report.skipped {
        println!("  {} {}", report.deployment.cyan(), "スキップ".dimmed());
        return;
    }
    let plan = report
        .plan
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("  {} {}", report.deployment.cyan(), plan.dimmed());
    if report.provisioned > 0 {
        println!("    {} {} 台作成", "+".green(), report.provisioned);
    }
    for id in &report.terminated {
        println!("    {} {}", "-".red(), id);
    }
    if let Some(error) = &report.error {
        println!("    {} {}", "✗".red(), error);
    }
}

pub async fn handle(ctx: &AppContext, name: Option<&str>, watch: bool) -> anyhow::Result<()> {
    let reconciler = ctx.orchestrator.reconciler();

    if watch {
        let interval = ctx.settings.reconciler.interval();
        println!(
            "{} {} 秒ごとに実行します (Ctrl-C で停止)",
            "リコンサイル:".blue().bold(),
            interval.as_secs()
        );
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });
        reconciler.run(interval, shutdown_rx).await;
        return Ok(());
    }

    let reports = match name {
        Some(name) => vec![reconciler.reconcile_once(name).await?],
        None => reconciler.reconcile_all().await?,
    };
    if reports.is_empty() {
        println!("{}", "Deployed のデプロイメントはありません".dimmed());
        return Ok(());
    }
    println!("{}", "リコンサイル結果:".bold());
    for report in &reports {
        print_report(report);
    }
    Ok(())
}
