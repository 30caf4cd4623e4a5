//! ビルド設定
//!
//! ホスト（CLI など）から一度だけ渡され、ビルド中は読み取り専用で扱われる。
//! キーは camelCase、未指定のフィールドはすべて既定値になる。

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// プッシュ失敗時のリトライ回数の既定値
pub const DEFAULT_RETRY_PUSH_COUNT: u32 = 5;
/// リトライ間隔の既定値（ミリ秒）
pub const DEFAULT_RETRY_PUSH_TIMEOUT_MS: u64 = 10_000;
/// Docker API 接続タイムアウトの既定値（ミリ秒）
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
/// Docker API 読み取りタイムアウトの既定値（ミリ秒）
pub const DEFAULT_API_READ_TIMEOUT_MS: u64 = 45_000;
/// 来歴ファイルの既定ファイル名
pub const IMAGE_INFO_FILE: &str = "image_info.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    // ---- イメージ名 / タグ ----
    /// ビルドしたイメージに付ける名前（`repo[:tag]`）
    pub image_name: String,
    /// 追加で付けるタグ
    pub image_tags: Vec<String>,
    pub use_git_commit_id: bool,
    pub need_tag_latest: bool,
    pub force_tags: bool,

    // ---- Dockerfile 生成 ----
    pub base_image: Option<String>,
    pub maintainer: Option<String>,
    pub entry_point: Option<String>,
    pub cmd: Option<String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub volumes: Vec<String>,
    pub labels: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub exposes: Vec<String>,
    pub runs: Vec<String>,
    pub squash_run_commands: bool,
    pub healthcheck: Option<Healthcheck>,

    // ---- ビルドコンテキスト ----
    /// 既存の Dockerfile を含むディレクトリ。指定時は Dockerfile を生成しない
    pub docker_directory: Option<PathBuf>,
    pub docker_directory_includes: Option<Vec<String>>,
    pub docker_directory_excludes: Option<Vec<String>>,
    pub resources: Vec<ResourceSpec>,
    /// コンテキストは `<buildDirectory>/docker` に組み立てられる
    pub build_directory: PathBuf,
    /// リソース走査で空のパスが出た場合にエラーとする
    pub strict_paths: bool,

    // ---- ビルドオプション ----
    pub build_args: BTreeMap<String, String>,
    pub network: Option<String>,
    pub platform: Option<String>,
    pub pull_on_build: bool,
    pub no_cache: bool,
    pub rm: bool,
    pub quiet: bool,
    /// イメージIDを待つ最大時間（ミリ秒）。0 は無制限
    pub read_timeout: u64,

    // ---- プッシュ / 保存 ----
    pub push_image: bool,
    pub push_image_tag: bool,
    pub skip_docker_push: bool,
    pub retry_push_count: u32,
    pub retry_push_timeout: u64,
    pub save_image_to_tar_archive: Option<PathBuf>,
    pub tag_info_file: Option<PathBuf>,

    // ---- スキップ ----
    pub skip_docker: bool,
    pub skip_docker_build: bool,

    // ---- バックエンド接続 ----
    pub docker_host: Option<String>,
    pub docker_cert_path: Option<PathBuf>,
    pub connect_timeout: u64,
    pub api_read_timeout: u64,

    // ---- レジストリ ----
    pub server_id: Option<String>,
    pub registry_url: Option<String>,
    pub auth: Option<AuthConfig>,

    /// プレースホルダー展開と認証情報の解決に使うプロジェクトプロパティ
    pub properties: BTreeMap<String, String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image_name: String::new(),
            image_tags: Vec::new(),
            use_git_commit_id: false,
            need_tag_latest: true,
            force_tags: false,
            base_image: None,
            maintainer: None,
            entry_point: None,
            cmd: None,
            workdir: None,
            user: None,
            volumes: Vec::new(),
            labels: Vec::new(),
            env: BTreeMap::new(),
            exposes: Vec::new(),
            runs: Vec::new(),
            squash_run_commands: false,
            healthcheck: None,
            docker_directory: None,
            docker_directory_includes: None,
            docker_directory_excludes: None,
            resources: Vec::new(),
            build_directory: PathBuf::from("build"),
            strict_paths: false,
            build_args: BTreeMap::new(),
            network: None,
            platform: None,
            pull_on_build: false,
            no_cache: false,
            rm: true,
            quiet: false,
            read_timeout: 0,
            push_image: false,
            push_image_tag: false,
            skip_docker_push: false,
            retry_push_count: DEFAULT_RETRY_PUSH_COUNT,
            retry_push_timeout: DEFAULT_RETRY_PUSH_TIMEOUT_MS,
            save_image_to_tar_archive: None,
            tag_info_file: None,
            skip_docker: false,
            skip_docker_build: false,
            docker_host: None,
            docker_cert_path: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_MS,
            api_read_timeout: DEFAULT_API_READ_TIMEOUT_MS,
            server_id: None,
            registry_url: None,
            auth: None,
            properties: BTreeMap::new(),
        }
    }
}

impl BuildConfig {
    /// YAML 文字列から読み込み
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// YAML ファイルから読み込み
    ///
    /// 相対パスの `buildDirectory` / `dockerDirectory` / リソースはファイルのあるディレクトリ基準で解決する。
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    /// 相対パスを `base` 基準に置き換える
    pub fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.build_directory);
        if let Some(dir) = self.docker_directory.as_mut() {
            join(dir);
        }
        if let Some(file) = self.tag_info_file.as_mut() {
            join(file);
        }
        if let Some(file) = self.save_image_to_tar_archive.as_mut() {
            join(file);
        }
        for resource in &mut self.resources {
            join(&mut resource.directory);
        }
    }

    /// 組み立て先のビルドコンテキストディレクトリ
    pub fn destination(&self) -> PathBuf {
        self.build_directory.join("docker")
    }

    /// 来歴ファイルの出力先（未指定なら `<buildDirectory>/image_info.json`）
    pub fn tag_info_path(&self) -> PathBuf {
        self.tag_info_file
            .clone()
            .unwrap_or_else(|| self.build_directory.join(IMAGE_INFO_FILE))
    }
}

/// HEALTHCHECK 設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Healthcheck {
    pub options: Option<String>,
    pub cmd: String,
}

/// レジストリ認証情報
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// ビルドコンテキストへコピーするファイル群
///
/// `includes` / `excludes` が `None` の場合は既定のフィルタ、空配列の場合はフィルタなし。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    pub directory: PathBuf,
    #[serde(default)]
    pub includes: Option<Vec<String>>,
    #[serde(default)]
    pub excludes: Option<Vec<String>>,
    #[serde(default)]
    pub target_path: Option<String>,
}

impl ResourceSpec {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.get_or_insert_with(Vec::new).push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.get_or_insert_with(Vec::new).push(pattern.into());
        self
    }

    pub fn target(mut self, target_path: impl Into<String>) -> Self {
        self.target_path = Some(target_path.into());
        self
    }

    fn has_includes(&self) -> bool {
        self.includes.as_ref().is_some_and(|p| !p.is_empty())
    }

    fn has_excludes(&self) -> bool {
        self.excludes.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// パターンが一つもなく、コピー先が指定されている場合はディレクトリごとコピーする
    pub fn copies_whole_directory(&self) -> bool {
        !self.has_includes() && !self.has_excludes() && self.target_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BuildConfig::default();
        assert_eq!(config.retry_push_count, 5);
        assert_eq!(config.retry_push_timeout, 10_000);
        assert!(config.rm);
        assert!(config.need_tag_latest);
        assert_eq!(config.connect_timeout, 30_000);
        assert_eq!(config.api_read_timeout, 45_000);
        assert_eq!(config.read_timeout, 0);
        assert_eq!(
            config.tag_info_path(),
            PathBuf::from("build").join("image_info.json")
        );
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
imageName: demo/app:1.0
baseImage: alpine:3.18
env:
  B: "2"
  A: "1"
exposes: ["80"]
retryPushCount: 2
healthcheck:
  options: --interval=5s
  cmd: curl -f http://localhost/
resources:
  - directory: target
    includes: ["*.jar"]
    targetPath: app
"#;
        let config = BuildConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.image_name, "demo/app:1.0");
        assert_eq!(config.base_image.as_deref(), Some("alpine:3.18"));
        assert_eq!(config.env.len(), 2);
        assert_eq!(config.retry_push_count, 2);
        // 未指定のフィールドは既定値
        assert!(config.rm);
        assert_eq!(config.retry_push_timeout, 10_000);
        assert_eq!(config.resources[0].target_path.as_deref(), Some("app"));
        assert_eq!(
            config.healthcheck.unwrap().options.as_deref(),
            Some("--interval=5s")
        );
    }

    #[test]
    fn test_rebase_relative_paths() {
        let mut config = BuildConfig {
            resources: vec![ResourceSpec::new("assets")],
            ..Default::default()
        };
        config.rebase(Path::new("/project"));
        assert_eq!(config.build_directory, PathBuf::from("/project/build"));
        assert_eq!(config.resources[0].directory, PathBuf::from("/project/assets"));
        assert_eq!(config.destination(), PathBuf::from("/project/build/docker"));
    }

    #[test]
    fn test_copies_whole_directory() {
        assert!(ResourceSpec::new("a").target("lib").copies_whole_directory());
        assert!(!ResourceSpec::new("a").copies_whole_directory());
        assert!(
            !ResourceSpec::new("a")
                .target("lib")
                .include("*.jar")
                .copies_whole_directory()
        );

        // 空配列もパターンなしとして扱う
        let spec = ResourceSpec {
            includes: Some(vec![]),
            excludes: Some(vec![]),
            ..ResourceSpec::new("a").target("lib")
        };
        assert!(spec.copies_whole_directory());
    }
}
