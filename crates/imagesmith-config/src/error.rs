use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: imagesmith.local.yaml, .imagesmith.local.yaml, imagesmith.yaml, .imagesmith.yaml\n\
        - ./.imagesmith/ ディレクトリ\n\
        - ~/.config/imagesmith/imagesmith.yaml\n\
        または IMAGESMITH_CONFIG_PATH 環境変数で直接指定できます"
    )]
    ConfigFileNotFound,

    #[error("IMAGESMITH_CONFIG_PATH が存在しないファイルを指しています: {0}")]
    ConfigPathMissing(std::path::PathBuf),

    #[error("プロパティは key=value 形式で指定してください: {0}")]
    InvalidProperty(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
