//! ImageSmith の設定ファイル探索
//!
//! ビルド設定（YAML）の置き場所を決め、コマンドラインのプロパティ指定を解析します。

pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_PATH_ENV: &str = "IMAGESMITH_CONFIG_PATH";

/// 探索するファイル名（優先順）
pub const CONFIG_FILE_CANDIDATES: [&str; 4] = [
    "imagesmith.local.yaml",
    ".imagesmith.local.yaml",
    "imagesmith.yaml",
    ".imagesmith.yaml",
];

/// プロジェクト内の設定ディレクトリ名
pub const PROJECT_CONFIG_DIR: &str = ".imagesmith";

/// ImageSmith のユーザー設定ディレクトリを取得（なければ作成）
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("imagesmith");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// カレントディレクトリを起点にビルド設定ファイルを探す
pub fn find_config_file() -> Result<PathBuf> {
    let current_dir = std::env::current_dir()?;
    find_config_file_from(&current_dir)
}

/// `start` を起点にビルド設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 IMAGESMITH_CONFIG_PATH (直接パス指定)
/// 2. `start` 直下: imagesmith.local.yaml, .imagesmith.local.yaml, imagesmith.yaml, .imagesmith.yaml
/// 3. `start/.imagesmith/` ディレクトリ内: 同様の順序
/// 4. ~/.config/imagesmith/imagesmith.yaml (グローバル設定)
pub fn find_config_file_from(start: &Path) -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Some(config_path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        let path = PathBuf::from(config_path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ConfigError::ConfigPathMissing(path));
    }

    // 2. 起点ディレクトリ
    if let Some(path) = first_existing(start) {
        return Ok(path);
    }

    // 3. ./.imagesmith/ ディレクトリ
    let project_dir = start.join(PROJECT_CONFIG_DIR);
    if project_dir.is_dir()
        && let Some(path) = first_existing(&project_dir)
    {
        return Ok(path);
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("imagesmith").join("imagesmith.yaml");
        if global_config.is_file() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// `key=value` 形式のプロパティ指定を分解する
///
/// 値には `=` を含められる。キーが空の場合はエラー。
pub fn parse_property(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ConfigError::InvalidProperty(raw.to_string())),
    }
}
