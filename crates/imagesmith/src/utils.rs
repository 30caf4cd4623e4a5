use crate::ConfigArgs;
use anyhow::Context;
use colored::Colorize;
use imagesmith_build::BuildConfig;
use std::path::{Path, PathBuf};

/// 読み込んだビルド設定
pub struct LoadedConfig {
    pub config: BuildConfig,
    pub path: PathBuf,
    /// 設定ファイルのあるディレクトリ（Gitリポジトリの探索起点）
    pub project_dir: PathBuf,
}

/// 設定ファイルを探して読み込み、`-P` のプロパティを反映する
pub fn load_config(args: &ConfigArgs) -> anyhow::Result<LoadedConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => imagesmith_config::find_config_file()?,
    };
    let path = std::fs::canonicalize(&path)
        .with_context(|| format!("設定ファイルを開けません: {}", path.display()))?;

    let mut config = BuildConfig::from_yaml_file(&path)
        .with_context(|| format!("設定ファイルの読み込みに失敗しました: {}", path.display()))?;

    for raw in &args.properties {
        let (key, value) = imagesmith_config::parse_property(raw)?;
        tracing::debug!("Property override: {}", key);
        config.properties.insert(key, value);
    }

    let project_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(LoadedConfig {
        config,
        path,
        project_dir,
    })
}

/// 読み込んだ設定ファイル情報を表示
pub fn print_loaded_config_file(path: &Path) {
    println!("📄 読み込んだ設定ファイル:");
    println!("  • {}", path.display().to_string().cyan());
}
