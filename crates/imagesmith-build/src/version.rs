//! Gitリポジトリからのバージョン解決
//!
//! `git` CLI を呼び出して HEAD のコミットID、HEAD を指すタグ、未コミットの変更の有無を取得し、
//! `<短縮コミットID>[.<タグ>][.DIRTY]` 形式の識別子を組み立てます。

use crate::error::{BuildError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// 短縮コミットIDの桁数
const SHORT_COMMIT_LEN: usize = 8;

/// ビルド識別子の構成要素
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub short_commit_id: String,
    pub tag: Option<String>,
    pub dirty: bool,
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_commit_id)?;
        if let Some(tag) = &self.tag {
            write!(f, ".{}", tag)?;
        }
        if self.dirty {
            f.write_str(".DIRTY")?;
        }
        Ok(())
    }
}

pub struct VersionResolver {
    repo_path: PathBuf,
}

impl VersionResolver {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    /// バージョン情報を解決
    ///
    /// # Returns
    /// * `Ok(Some(info))` - HEAD が解決できた場合
    /// * `Ok(None)` - リポジトリだが HEAD が解決できない場合（コミットなし等）
    /// * `Err(BuildError::NotARepository)` - Gitリポジトリではない場合
    pub async fn resolve(&self) -> Result<Option<VersionInfo>> {
        let repo = GitRepository::open(&self.repo_path).await?;

        let Some(head) = repo.head().await? else {
            tracing::debug!("HEAD を解決できません: {}", self.repo_path.display());
            return Ok(None);
        };

        let short_commit_id: String = head.chars().take(SHORT_COMMIT_LEN).collect();
        let tag = repo.tag_pointing_at(&head).await?;
        let dirty = repo.has_uncommitted_changes().await?;

        Ok(Some(VersionInfo {
            short_commit_id,
            tag,
            dirty,
        }))
    }
}

/// `git` CLI 経由でアクセスするリポジトリ
#[derive(Debug, Clone)]
pub struct GitRepository {
    workdir: PathBuf,
}

impl GitRepository {
    /// `path` を含むリポジトリを開く
    pub async fn open(path: &Path) -> Result<Self> {
        let lookup = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match lookup {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("git コマンドが見つかりません: {}", e);
                return Err(BuildError::NotARepository(path.to_path_buf()));
            }
            Err(e) => {
                return Err(BuildError::Git {
                    detail: "git rev-parse を実行できません".to_string(),
                    source: e,
                });
            }
        };

        if !output.status.success() {
            return Err(BuildError::NotARepository(path.to_path_buf()));
        }

        let toplevel = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Self {
            workdir: PathBuf::from(toplevel),
        })
    }

    /// HEAD のフルコミットID
    pub async fn head(&self) -> Result<Option<String>> {
        Ok(self
            .run(&["rev-parse", "--verify", "--quiet", "HEAD"])
            .await?
            .filter(|id| !id.is_empty()))
    }

    /// 指定リビジョンを指すタグ（`git tag` の列挙順で最初のもの）
    pub async fn tag_pointing_at(&self, revision: &str) -> Result<Option<String>> {
        let tags = self.run(&["tag", "--points-at", revision]).await?;
        Ok(tags.and_then(|out| out.lines().next().map(str::to_string)))
    }

    /// 追跡中のファイルに未コミットの変更があるか
    pub async fn has_uncommitted_changes(&self) -> Result<bool> {
        let status = self
            .run(&["status", "--porcelain", "--untracked-files=no"])
            .await?;
        Ok(status.is_some_and(|s| !s.is_empty()))
    }

    /// `remote.origin.url`
    pub async fn remote_url(&self) -> Result<Option<String>> {
        Ok(self
            .run(&["config", "--get", "remote.origin.url"])
            .await?
            .filter(|url| !url.is_empty()))
    }

    /// git コマンドを実行し、成功時のみ標準出力を返す
    async fn run(&self, args: &[&str]) -> Result<Option<String>> {
        tracing::debug!("Running: git {}", args.join(" "));

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BuildError::Git {
                detail: format!("git {} を実行できません", args.join(" ")),
                source: e,
            })?;

        if !output.status.success() {
            tracing::debug!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}
