//! ビルドパイプライン
//!
//! バージョン解決 → コンテキスト組み立て → ビルド → タグ付け → プッシュ → 来歴の記録
//! を1回の実行として行う。同一プロセス内の実行はグローバルなロックで直列化される。

use crate::auth::RegistryAuth;
use crate::backend::ImageBackend;
use crate::builder::ImageBuilder;
use crate::config::{BuildConfig, ResourceSpec};
use crate::context::ContextAssembler;
use crate::dockerfile::{DOCKERFILE_NAME, DockerfileWriter};
use crate::error::{BuildError, Result};
use crate::progress::{ProgressObserver, Silent};
use crate::provenance::BuildProvenance;
use crate::pusher::{Publisher, RetryPolicy};
use crate::reference::ImageReference;
use crate::tagger::ImageTagger;
use crate::version::{GitRepository, VersionResolver};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tokio::sync::Mutex;

/// コミットIDのプレースホルダー名
pub const GIT_SHORT_COMMIT_ID: &str = "gitShortCommitId";

/// 設定値より優先されるビルドスキップ指定
pub const SKIP_DOCKER_BUILD_ENV: &str = "SKIP_DOCKER_BUILD";

const DOCKER_DIRECTORY_INCLUDES: [&str; 3] = ["build/libs/**", "Docker*", "docker/**"];
const DOCKER_DIRECTORY_EXCLUDES: [&str; 4] = ["gradle/**", ".gradle/**", "*gradle*", "src/**"];

/// プロセス全体でビルドを直列化するロック
static BUILD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// パイプラインの段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Assemble,
    Build,
    Tag,
    Push,
    Save,
    Record,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "イメージ名の解決",
            Stage::Assemble => "ビルドコンテキストの作成",
            Stage::Build => "イメージのビルド",
            Stage::Tag => "タグ付け",
            Stage::Push => "プッシュ",
            Stage::Save => "イメージの保存",
            Stage::Record => "来歴の記録",
        };
        f.write_str(name)
    }
}

/// パイプライン全体の失敗（元のエラーを保持）
#[derive(Debug, Error)]
#[error("{stage}に失敗しました: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: BuildError,
}

impl PipelineError {
    pub fn user_message(&self) -> String {
        format!("{}に失敗しました\n\n{}", self.stage, self.source.user_message())
    }
}

/// 実行結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 設定によりスキップされた
    Skipped { reason: String },
    Built(BuildOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// 最終的なイメージ参照
    pub image: String,
    pub image_id: String,
    /// 追加で付けたタグ（`repo:tag`）
    pub tags: Vec<String>,
    /// pushImageTag でプッシュした参照
    pub pushed_tags: Vec<String>,
    pub digest: Option<String>,
    pub provenance: BuildProvenance,
    pub provenance_path: PathBuf,
    pub context_dir: PathBuf,
    pub warnings: Vec<String>,
}

/// 解決済みのイメージ名と関連情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub reference: ImageReference,
    pub base_image: Option<String>,
    pub version: Option<String>,
    pub warnings: Vec<String>,
}

/// `${key}` を `values` の値で置き換える（未定義のキーはそのまま残す）
pub fn expand_placeholders(value: &str, values: &BTreeMap<String, String>) -> String {
    values.iter().fold(value.to_string(), |acc, (key, replacement)| {
        acc.replace(&format!("${{{}}}", key), replacement)
    })
}

fn references_commit_id(value: &str) -> bool {
    value.contains(&format!("${{{}}}", GIT_SHORT_COMMIT_ID))
}

/// `SKIP_DOCKER_BUILD` が設定されていればその値、なければ設定値
fn skip_docker_build(config: &BuildConfig) -> bool {
    match std::env::var(SKIP_DOCKER_BUILD_ENV) {
        Ok(value) if !value.trim().is_empty() => {
            matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        }
        _ => config.skip_docker_build,
    }
}

/// 設定によりビルドをスキップする場合はその理由
pub fn skip_reason(config: &BuildConfig) -> Option<String> {
    if config.skip_docker {
        return Some("skipDocker が設定されています".to_string());
    }
    if skip_docker_build(config) {
        return Some("skipDockerBuild が設定されています".to_string());
    }
    if let Some(dir) = &config.docker_directory
        && !dir.join(DOCKERFILE_NAME).is_file()
    {
        return Some(format!(
            "dockerDirectory に Dockerfile がありません: {}",
            dir.display()
        ));
    }
    None
}

/// イメージ名とベースイメージを確定する
///
/// `project_dir` のGitリポジトリからバージョンを解決し、`${key}` を展開してから
/// 設定の整合性を検査する。コミットIDが必要な設定でリポジトリがなければエラー。
pub async fn resolve_image(config: &BuildConfig, project_dir: &Path) -> Result<ResolvedImage> {
    let needs_commit = config.use_git_commit_id
        || references_commit_id(&config.image_name)
        || config.base_image.as_deref().is_some_and(references_commit_id);

    let version = match VersionResolver::new(project_dir).resolve().await {
        Ok(Some(info)) => Some(info.to_string()),
        Ok(None) if needs_commit => {
            return Err(BuildError::Configuration(
                "HEAD を解決できないため、コミットIDを取得できません".to_string(),
            ));
        }
        Err(e @ BuildError::NotARepository(_)) if needs_commit => return Err(e),
        Ok(None) | Err(BuildError::NotARepository(_)) => {
            tracing::debug!(
                "Not a git repository, cannot get commit ID: {}",
                project_dir.display()
            );
            None
        }
        Err(e) => return Err(e),
    };

    let mut values = config.properties.clone();
    if let Some(version) = &version {
        values.insert(GIT_SHORT_COMMIT_ID.to_string(), version.clone());
    }

    let image_name = expand_placeholders(&config.image_name, &values);
    if image_name.trim().is_empty() {
        return Err(BuildError::Configuration(
            "imageName が指定されていません".to_string(),
        ));
    }
    let base_image = config
        .base_image
        .as_deref()
        .map(|b| expand_placeholders(b, &values))
        .filter(|b| !b.is_empty());

    let warnings = validate(config, base_image.as_deref())?;

    let mut reference = ImageReference::parse(&image_name)?;
    if config.use_git_commit_id {
        if reference.tag().is_some() {
            tracing::warn!(
                "Ignoring useGitCommitId flag because tag is explicitly set in image name"
            );
        } else if let Some(version) = &version {
            reference = reference.with_tag(version);
        }
    }

    Ok(ResolvedImage {
        reference,
        base_image,
        version,
        warnings,
    })
}

/// dockerDirectory の有無に応じて必須項目と無視される項目を検査する
fn validate(config: &BuildConfig, base_image: Option<&str>) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if config.docker_directory.is_none() {
        if base_image.is_none() {
            return Err(BuildError::Configuration(
                "dockerDirectory を指定しない場合は baseImage が必要です".to_string(),
            ));
        }
        return Ok(warnings);
    }

    let ignored = [
        ("baseImage", base_image.is_some()),
        ("maintainer", config.maintainer.is_some()),
        ("entryPoint", config.entry_point.is_some()),
        ("cmd", config.cmd.is_some()),
        ("runs", !config.runs.is_empty()),
        ("workdir", config.workdir.is_some()),
        ("user", config.user.is_some()),
    ];
    for (field, set) in ignored {
        if set {
            let message = format!("Ignoring {} because dockerDirectory is set", field);
            tracing::warn!("{}", message);
            warnings.push(message);
        }
    }
    Ok(warnings)
}

pub struct Pipeline<'a> {
    config: BuildConfig,
    project_dir: PathBuf,
    backend: &'a dyn ImageBackend,
    observer: &'a dyn ProgressObserver,
    auth: RegistryAuth,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: BuildConfig,
        project_dir: impl Into<PathBuf>,
        backend: &'a dyn ImageBackend,
    ) -> Self {
        Self {
            config,
            project_dir: project_dir.into(),
            backend,
            observer: &Silent,
            auth: RegistryAuth::new(),
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn ProgressObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// パイプラインを実行
    pub async fn run(&self) -> std::result::Result<RunOutcome, PipelineError> {
        let _guard = BUILD_LOCK.lock().await;

        if let Some(reason) = skip_reason(&self.config) {
            tracing::info!("Skipping docker build: {}", reason);
            return Ok(RunOutcome::Skipped { reason });
        }

        self.execute().await.map(RunOutcome::Built).map_err(|e| {
            tracing::error!("imagesmith build error: {}", e);
            e
        })
    }

    async fn execute(&self) -> std::result::Result<BuildOutcome, PipelineError> {
        let config = &self.config;
        let stage = |stage: Stage| move |source: BuildError| PipelineError { stage, source };

        // 1. イメージ名の解決
        let resolved = self.resolve().await.map_err(stage(Stage::Resolve))?;
        let reference = resolved.reference.clone();
        let image = reference.to_string();
        let mut warnings = resolved.warnings.clone();

        // 2. ビルドコンテキスト
        let context_dir = config.destination();
        let manifest_warnings = self
            .assemble(&context_dir, resolved.base_image.as_deref())
            .map_err(stage(Stage::Assemble))?;
        warnings.extend(manifest_warnings);

        // 3. ビルド
        let request = ImageBuilder::request(config, &reference);
        let image_id = ImageBuilder::new(self.backend)
            .build(&context_dir, &request, config.read_timeout, self.observer)
            .await
            .map_err(stage(Stage::Build))?;
        tracing::info!("Built {} ({})", image, image_id);

        // 4. タグ付け
        let tags = ImageTagger::new(self.backend)
            .tag(
                &image_id,
                reference.repository(),
                &config.image_tags,
                config.force_tags,
            )
            .await
            .map_err(stage(Stage::Tag))?;

        let mut provenance = self.record(&image).await;

        // 5. プッシュ
        let mut pushed_tags = Vec::new();
        let mut digest = None;
        if config.push_image_tag || config.push_image {
            let credentials = if config.skip_docker_push {
                None
            } else {
                self.auth
                    .resolve(config, &image)
                    .map_err(stage(Stage::Push))?
            };
            let publisher = Publisher::new(self.backend).with_credentials(credentials);

            if config.push_image_tag {
                pushed_tags = publisher
                    .push_tags(
                        &image,
                        &config.image_tags,
                        config.skip_docker_push,
                        self.observer,
                    )
                    .await
                    .map_err(stage(Stage::Push))?;
            }

            if config.push_image {
                digest = publisher
                    .push(
                        reference.repository(),
                        reference.tag(),
                        &config.image_tags,
                        RetryPolicy::new(config.retry_push_count, config.retry_push_timeout),
                        config.skip_docker_push,
                        self.observer,
                    )
                    .await
                    .map_err(stage(Stage::Push))?;
                if let Some(digest) = &digest {
                    provenance = provenance.attach_digest(digest.clone());
                }
            }
        }

        // 6. tar アーカイブへの保存
        if let Some(archive) = &config.save_image_to_tar_archive {
            self.backend
                .save(&image, archive)
                .await
                .map_err(stage(Stage::Save))?;
        }

        // 7. 来歴の書き出し
        let provenance_path = config.tag_info_path();
        provenance
            .persist(&provenance_path)
            .map_err(stage(Stage::Record))?;

        Ok(BuildOutcome {
            image,
            image_id,
            tags,
            pushed_tags,
            digest,
            provenance,
            provenance_path,
            context_dir,
            warnings,
        })
    }

    /// イメージ名とベースイメージを確定する
    pub async fn resolve(&self) -> Result<ResolvedImage> {
        resolve_image(&self.config, &self.project_dir).await
    }

    /// コンテキストを組み立て、必要なら Dockerfile を生成する
    fn assemble(&self, context_dir: &Path, base_image: Option<&str>) -> Result<Vec<String>> {
        let config = &self.config;
        let assembler = ContextAssembler::new(context_dir).strict_paths(config.strict_paths);

        match &config.docker_directory {
            Some(dir) => {
                let mut resource = ResourceSpec::new(dir.clone());
                for pattern in DOCKER_DIRECTORY_INCLUDES
                    .iter()
                    .map(|p| p.to_string())
                    .chain(config.docker_directory_includes.iter().flatten().cloned())
                {
                    resource = resource.include(pattern);
                }
                for pattern in DOCKER_DIRECTORY_EXCLUDES
                    .iter()
                    .map(|p| p.to_string())
                    .chain(config.docker_directory_excludes.iter().flatten().cloned())
                {
                    resource = resource.exclude(pattern);
                }
                let copied = assembler.assemble(std::slice::from_ref(&resource))?;
                tracing::debug!("Copied {} files from {}", copied.len(), dir.display());
                Ok(Vec::new())
            }
            None => {
                let copied = assembler.assemble(&config.resources)?;
                let effective = BuildConfig {
                    base_image: base_image.map(str::to_string),
                    ..config.clone()
                };
                let (path, manifest) =
                    DockerfileWriter::new(&effective, context_dir).write(&copied)?;
                tracing::info!("Generated {}", path.display());
                Ok(manifest.warnings)
            }
        }
    }

    /// 来歴を作成（リポジトリURLとフルコミットIDは取得できた場合のみ）
    async fn record(&self, image: &str) -> BuildProvenance {
        let Ok(repo) = GitRepository::open(&self.project_dir).await else {
            return BuildProvenance::record(image, None, None);
        };
        let repository_url = repo.remote_url().await.ok().flatten();
        let commit_id = repo.head().await.ok().flatten();
        BuildProvenance::record(image, repository_url, commit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_expand_placeholders() {
        let values = BTreeMap::from([
            (GIT_SHORT_COMMIT_ID.to_string(), "0123abcd".to_string()),
            ("registry".to_string(), "host:5000".to_string()),
        ]);
        assert_eq!(
            expand_placeholders("${registry}/app:${gitShortCommitId}", &values),
            "host:5000/app:0123abcd"
        );
        assert_eq!(
            expand_placeholders("app:${unknown}", &values),
            "app:${unknown}"
        );
    }

    #[test]
    #[serial]
    fn test_skip_docker_build_env_override() {
        let config = BuildConfig {
            skip_docker_build: true,
            ..Default::default()
        };
        temp_env::with_var(SKIP_DOCKER_BUILD_ENV, Some("false"), || {
            assert!(!skip_docker_build(&config));
        });
        temp_env::with_var(SKIP_DOCKER_BUILD_ENV, None::<&str>, || {
            assert!(skip_docker_build(&config));
        });
        temp_env::with_var(SKIP_DOCKER_BUILD_ENV, Some("TRUE"), || {
            assert!(skip_docker_build(&BuildConfig::default()));
        });
    }

    #[test]
    fn test_stage_error_message() {
        let error = PipelineError {
            stage: Stage::Tag,
            source: BuildError::TagConflict {
                reference: "demo/app:stable".to_string(),
            },
        };
        assert_eq!(
            error.to_string(),
            "タグ付けに失敗しました: タグが既に存在します: demo/app:stable"
        );
        assert!(std::error::Error::source(&error).is_some());
    }
}
