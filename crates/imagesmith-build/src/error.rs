//! ビルドエラー型

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("無効な設定: {0}")]
    Configuration(String),

    #[error("Gitリポジトリではありません: {0}")]
    NotARepository(PathBuf),

    #[error("Gitコマンドの実行に失敗しました: {detail}")]
    Git {
        detail: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ビルドがタイムアウトしました ({timeout_ms}ms 以内にイメージIDが得られませんでした)")]
    BuildTimeout { timeout_ms: u64 },

    #[error("Docker接続エラー: {0}")]
    Backend(#[from] bollard::errors::Error),

    #[error("ビルドに失敗しました: {0}")]
    BuildFailed(String),

    #[error("タグが既に存在します: {reference}")]
    TagConflict { reference: String },

    #[error("プッシュに失敗しました: {message}")]
    PushFailed { message: String },

    #[error("レジストリ認証エラー ({registry}): {message}")]
    Auth { registry: String, message: String },

    #[error("シリアライズエラー: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("設定ファイルのパースエラー: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// バックエンド起因のエラーか（プッシュのリトライ対象判定に使用）
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            BuildError::Backend(_) | BuildError::PushFailed { .. } | BuildError::BuildFailed(_)
        )
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::NotARepository(path) => {
                format!(
                    "Gitリポジトリではないため、コミットIDを取得できません: {}\n\
                     \n\
                     解決方法:\n\
                     1. git init でリポジトリを初期化してください\n\
                     2. または useGitCommitId / ${{gitShortCommitId}} の指定を外してください",
                    path.display()
                )
            }
            BuildError::BuildTimeout { timeout_ms } => {
                format!(
                    "ビルドが {}ms 以内に完了しませんでした。\n\
                     \n\
                     readTimeout を延ばすか、0 (無制限) を指定してください。",
                    timeout_ms
                )
            }
            BuildError::TagConflict { reference } => {
                format!(
                    "タグ {} は既に別のイメージを指しています。\n\
                     \n\
                     上書きする場合は forceTags: true を指定してください。",
                    reference
                )
            }
            BuildError::Backend(e) => {
                format!(
                    "Docker接続エラー: {}\n\
                     \n\
                     解決方法:\n\
                     • Dockerが起動しているか確認してください\n\
                     • dockerHost / dockerCertPath の設定を確認してください",
                    e
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
