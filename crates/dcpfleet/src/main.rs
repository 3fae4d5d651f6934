mod commands;
mod context;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dcpfleet")]
#[command(version)]
#[command(about = "DCP処理ワーカーのフリートを、宣言的に。", long_about = None)]
struct Cli {
    /// デバッグログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// デプロイメント定義の指定（ファイルまたはフラグ）
#[derive(clap::Args, Debug, Clone)]
pub struct DefinitionArgs {
    /// デプロイメント名
    #[arg(required_unless_present = "file")]
    pub name: Option<String>,

    /// YAML/JSON の定義ファイル
    #[arg(short, long, conflicts_with = "name")]
    pub file: Option<PathBuf>,

    /// シナリオ (backend-automation, manual-testing)
    #[arg(long, default_value = "backend-automation")]
    pub scenario: String,

    /// クラウドプロバイダー
    #[arg(short, long, default_value = "vultr")]
    pub provider: String,

    /// リージョン (例: nrt, ams)
    #[arg(short, long)]
    pub region: Option<String>,

    /// ワーカー台数
    #[arg(short = 'n', long, default_value = "1")]
    pub count: u32,

    /// テンプレート変数 (KEY=VALUE, VALUE は JSON として解釈、失敗時は文字列)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// リソースタグ (KEY=VALUE)
    #[arg(long = "tag", value_name = "KEY=VALUE")]
    pub tags: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// デプロイメントを作成（Draft）
    Create(DefinitionArgs),
    /// Draft/Failed のデプロイメント定義を更新
    Update(DefinitionArgs),
    /// ワーカー台数を変更
    Scale {
        /// デプロイメント名
        name: String,
        /// 目標台数
        count: u32,
    },
    /// デプロイメントをデプロイ
    Deploy {
        /// デプロイメント名
        name: String,
    },
    /// デプロイメントの全ワーカーを削除
    Destroy {
        /// デプロイメント名
        name: String,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// デプロイメントの状態を表示
    Status {
        /// デプロイメント名
        name: String,
        /// JSON で出力
        #[arg(long)]
        json: bool,
    },
    /// デプロイメント一覧を表示
    List {
        /// 状態で絞り込み (draft, deployed, failed, ...)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// 月額コストを見積もる
    Estimate(DefinitionArgs),
    /// 利用可能なプロバイダーを表示
    Providers,
    /// プロバイダーへの接続を確認
    #[command(name = "test-connection")]
    TestConnection {
        /// プロバイダー名
        #[arg(default_value = "vultr")]
        provider: String,
    },
    /// 生成したドキュメントを OpenTofu で検証・プラン表示
    Plan {
        /// デプロイメント名
        name: String,
        /// tofu バイナリ
        #[arg(long, env = "DCPFLEET_TOFU", default_value = "tofu")]
        tofu: String,
    },
    /// デプロイ済みフリートを目標台数に収束させる
    Reconcile {
        /// 対象デプロイメント（省略時は全 Deployed）
        name: Option<String>,
        /// 一定間隔で継続実行（Ctrl-C で停止）
        #[arg(short, long)]
        watch: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ctx = context::AppContext::load()?;

    let result = match cli.command {
        Commands::Create(args) => commands::definition::create(&ctx, args).await,
        Commands::Update(args) => commands::definition::update(&ctx, args).await,
        Commands::Scale { name, count } => commands::definition::scale(&ctx, &name, count).await,
        Commands::Deploy { name } => commands::deploy::handle(&ctx, &name).await,
        Commands::Destroy { name, yes } => commands::destroy::handle(&ctx, &name, yes).await,
        Commands::Status { name, json } => commands::status::show(&ctx, &name, json).await,
        Commands::List { status } => commands::status::list(&ctx, status.as_deref()).await,
        Commands::Estimate(args) => commands::catalog::estimate(&ctx, args).await,
        Commands::Providers => commands::catalog::providers(&ctx),
        Commands::TestConnection { provider } => {
            commands::catalog::test_connection(&ctx, &provider).await
        }
        Commands::Plan { name, tofu } => commands::plan::handle(&ctx, &name, &tofu).await,
        Commands::Reconcile { name, watch } => {
            commands::reconcile::handle(&ctx, name.as_deref(), watch).await
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}
