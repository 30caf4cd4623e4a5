//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュします。
//! 主参照と追加タグを一連のシーケンスとしてプッシュし、バックエンド起因の失敗時は
//! シーケンス全体を上限回数までリトライします。

use crate::auth::Credentials;
use crate::backend::ImageBackend;
use crate::error::{BuildError, Result};
use crate::progress::ProgressObserver;
use crate::reference::ImageReference;
use std::time::Duration;

/// プッシュのリトライ方針
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 初回に加えて行う追加試行の回数
    pub retry_count: u32,
    /// 試行間の待ち時間
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retry_count: u32, backoff_ms: u64) -> Self {
        Self {
            retry_count,
            backoff: Duration::from_millis(backoff_ms),
        }
    }
}

/// リトライループの状態
#[derive(Debug)]
enum PushState {
    Attempting { attempt: u32 },
    BackingOff { attempt: u32 },
    Succeeded(Option<String>),
    Exhausted(BuildError),
}

/// イメージプッシュを実行するハンドラ
pub struct Publisher<'a> {
    backend: &'a dyn ImageBackend,
    credentials: Option<Credentials>,
}

impl<'a> Publisher<'a> {
    pub fn new(backend: &'a dyn ImageBackend) -> Self {
        Self {
            backend,
            credentials: None,
        }
    }

    /// レジストリ認証情報を指定
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// 主参照と追加タグをプッシュし、主参照のダイジェストを返す
    ///
    /// ダイジェストは `repository@sha256:...` の形式。
    /// `skip` が true の場合は何もせず `None` を返す。
    pub async fn push(
        &self,
        repository: &str,
        primary_tag: Option<&str>,
        extra_tags: &[String],
        policy: RetryPolicy,
        skip: bool,
        observer: &dyn ProgressObserver,
    ) -> Result<Option<String>> {
        if skip {
            tracing::info!("Skipping push of {}", repository);
            return Ok(None);
        }

        let mut state = PushState::Attempting { attempt: 1 };
        loop {
            state = match state {
                PushState::Attempting { attempt } => {
                    match self
                        .push_sequence(repository, primary_tag, extra_tags, observer)
                        .await
                    {
                        Ok(digest) => PushState::Succeeded(digest),
                        Err(e) if e.is_backend() && attempt <= policy.retry_count => {
                            tracing::warn!(
                                "Push attempt {}/{} failed: {}",
                                attempt,
                                policy.retry_count + 1,
                                e
                            );
                            PushState::BackingOff { attempt }
                        }
                        Err(e) => PushState::Exhausted(e),
                    }
                }
                PushState::BackingOff { attempt } => {
                    tracing::info!("Retrying push in {}ms", policy.backoff.as_millis());
                    tokio::time::sleep(policy.backoff).await;
                    PushState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                PushState::Succeeded(digest) => return Ok(digest),
                PushState::Exhausted(e) => return Err(e),
            };
        }
    }

    /// 主参照 → 追加タグの順に1回ずつプッシュ
    async fn push_sequence(
        &self,
        repository: &str,
        primary_tag: Option<&str>,
        extra_tags: &[String],
        observer: &dyn ProgressObserver,
    ) -> Result<Option<String>> {
        let primary = match primary_tag {
            Some(tag) => format!("{}:{}", repository, tag),
            None => repository.to_string(),
        };

        let receipt = self
            .backend
            .push(&primary, self.credentials.as_ref(), observer)
            .await?;
        let digest = receipt
            .digest
            .map(|digest| format!("{}@{}", repository, digest));

        for tag in extra_tags.iter().filter(|t| !t.is_empty()) {
            let reference = format!("{}:{}", repository, tag);
            self.backend
                .push(&reference, self.credentials.as_ref(), observer)
                .await?;
        }

        Ok(digest)
    }

    /// `image_name` のリポジトリに対して各タグを1回ずつプッシュ（リトライなし）
    ///
    /// タグが1つもない場合は設定エラー。
    pub async fn push_tags(
        &self,
        image_name: &str,
        tags: &[String],
        skip: bool,
        observer: &dyn ProgressObserver,
    ) -> Result<Vec<String>> {
        if skip {
            tracing::info!("Skipping tag push of {}", image_name);
            return Ok(Vec::new());
        }

        if tags.is_empty() {
            return Err(BuildError::Configuration(
                "タグのプッシュには少なくとも1つのタグ (imageTags) が必要です".to_string(),
            ));
        }

        let reference = ImageReference::parse(image_name)?;
        let mut pushed = Vec::new();
        for tag in tags {
            validate_tag(tag)?;
            let full_image = reference.with_tag(tag).to_string();
            self.backend
                .push(&full_image, self.credentials.as_ref(), observer)
                .await?;
            pushed.push(full_image);
        }
        Ok(pushed)
    }
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(BuildError::Configuration("タグが空です".to_string()));
    }

    if tag.len() > 128 {
        return Err(BuildError::Configuration(format!(
            "タグが長すぎます ({} 文字、最大 128): {}",
            tag.len(),
            tag
        )));
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::Configuration(format!(
            "タグの先頭に '.' や '-' は使えません: {}",
            tag
        )));
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_'))
    {
        return Err(BuildError::Configuration(format!(
            "タグに使えない文字 '{}' が含まれています: {}",
            c, tag
        )));
    }

    Ok(())
}
