use crate::context::AppContext;
use colored::Colorize;
use std::io::{self, Write};

pub async fn handle(ctx: &AppContext, name: &str, yes: bool) -> anyhow::Result<()> {
    let current = ctx.orchestrator.get_status(name).await?;
    let live = current.live_worker_ids();

    if !yes {
        println!(
            "{} {} のワーカー {} 台を削除します。この操作は取り消せません。",
            "⚠".yellow(),
            name.cyan(),
            live.len()
        );
        print!("続行しますか? [y/N]: ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("{}", "キャンセルしました".yellow());
            return Ok(());
        }
    }

    println!("{} {}", "削除中:".blue().bold(), name.cyan());
    let destroyed = ctx.orchestrator.destroy(name).await?;
    println!(
        "{} {} (状態: {})",
        "✓ 削除完了:".green().bold(),
        destroyed.name().cyan(),
        destroyed.status
    );
    Ok(())
}
