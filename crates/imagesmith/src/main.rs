mod build;
mod docker;
mod utils;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "smith")]
#[command(about = "宣言的な設定から Docker イメージをビルド・タグ付け・公開する", long_about = None)]
struct Cli {
    /// デバッグログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// 設定ファイルとプロパティの指定
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// ビルド設定ファイル（省略時は imagesmith.yaml などを探索）
    #[arg(short, long, env = "IMAGESMITH_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// プロジェクトプロパティ (key=value)。設定ファイルの properties を上書き
    #[arg(short = 'P', long = "property", value_name = "KEY=VALUE")]
    pub properties: Vec<String>,
}

/// build コマンドのオプション
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// ビルド後にイメージをプッシュ（pushImage）
    #[arg(long)]
    pub push: bool,

    /// imageTags のタグのみをプッシュ（pushImageTag）
    #[arg(long)]
    pub push_tags: bool,

    /// プッシュをすべてスキップ（skipDockerPush）
    #[arg(long)]
    pub skip_push: bool,

    /// キャッシュを使わずにビルド
    #[arg(long)]
    pub no_cache: bool,

    /// ベースイメージを常に pull する
    #[arg(long)]
    pub pull: bool,

    /// ターゲットプラットフォーム (例: linux/amd64)
    #[arg(long)]
    pub platform: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// イメージをビルド（設定に応じてタグ付け・プッシュ・保存）
    Build(BuildArgs),
    /// 生成される Dockerfile を表示
    Dockerfile(ConfigArgs),
    /// バージョン情報を表示
    Version,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("imagesmith {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing(cli.verbose);

    match cli.command {
        Commands::Build(args) => build::handle_build_command(&args).await?,
        Commands::Dockerfile(args) => build::handle_dockerfile_command(&args).await?,
        Commands::Version => unreachable!("Version is handled before logging setup"),
    }

    Ok(())
}
