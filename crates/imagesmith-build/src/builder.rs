//! コンテキストを tar.gz にしてバックエンドでビルドする

use crate::backend::{BuildRequest, ImageBackend};
use crate::config::BuildConfig;
use crate::context::ContextBuilder;
use crate::dockerfile::DOCKERFILE_NAME;
use crate::error::{BuildError, Result};
use crate::progress::ProgressObserver;
use crate::reference::ImageReference;
use std::path::Path;
use std::time::Duration;

pub struct ImageBuilder<'a> {
    backend: &'a dyn ImageBackend,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(backend: &'a dyn ImageBackend) -> Self {
        Self { backend }
    }

    /// 設定からビルド要求を組み立てる
    ///
    /// 追加タグが指定されていない場合、または `needTagLatest` が有効な場合は
    /// 解決済みのイメージ参照そのものをビルド時のタグとして付ける。
    pub fn request(config: &BuildConfig, reference: &ImageReference) -> BuildRequest {
        let tag_primary = config.image_tags.is_empty() || config.need_tag_latest;

        BuildRequest {
            dockerfile: DOCKERFILE_NAME.to_string(),
            tag: tag_primary.then(|| reference.to_string()),
            pull: config.pull_on_build,
            no_cache: config.no_cache,
            remove_intermediate: config.rm,
            quiet: config.quiet,
            build_args: config.build_args.clone(),
            network_mode: config.network.clone().filter(|n| !n.is_empty()),
            platform: config.platform.clone().filter(|p| !p.is_empty()),
        }
    }

    /// コンテキストディレクトリからイメージをビルドし、イメージIDを返す
    ///
    /// `read_timeout_ms` が 0 より大きい場合はその時間内にイメージIDが得られなければ
    /// [`BuildError::BuildTimeout`] で失敗する。0 なら無制限に待つ。
    pub async fn build(
        &self,
        context_dir: &Path,
        request: &BuildRequest,
        read_timeout_ms: u64,
        observer: &dyn ProgressObserver,
    ) -> Result<String> {
        let dockerfile = context_dir.join(&request.dockerfile);
        if !dockerfile.is_file() {
            return Err(BuildError::Configuration(format!(
                "Dockerfile が見つかりません: {}",
                dockerfile.display()
            )));
        }

        let context = ContextBuilder::create_context(context_dir)?;
        tracing::debug!(
            "Build context: {} ({} bytes)",
            context_dir.display(),
            context.len()
        );

        let build = self.backend.build(context, request, observer);
        if read_timeout_ms == 0 {
            return build.await;
        }

        match tokio::time::timeout(Duration::from_millis(read_timeout_ms), build).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Build did not finish within {}ms", read_timeout_ms);
                Err(BuildError::BuildTimeout {
                    timeout_ms: read_timeout_ms,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::backend::PushReceipt;
    use crate::progress::{ProgressEvent, RecordingObserver};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// 指定時間待ってからイメージIDを返すバックエンド
    struct SlowBackend {
        delay: Duration,
        requests: Mutex<Vec<BuildRequest>>,
    }

    impl SlowBackend {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageBackend for SlowBackend {
        async fn build(
            &self,
            context: Vec<u8>,
            request: &BuildRequest,
            observer: &dyn ProgressObserver,
        ) -> Result<String> {
            assert!(!context.is_empty());
            self.requests.lock().unwrap().push(request.clone());
            for step in ["Step 1/2 : FROM alpine\n", "Step 2/2 : CMD true\n"] {
                observer.on_event(&ProgressEvent {
                    stream: Some(step.to_string()),
                    ..Default::default()
                });
            }
            tokio::time::sleep(self.delay).await;
            Ok("sha256:feedface".to_string())
        }

        async fn tag(&self, _: &str, _: &str, _: &str, _: bool) -> Result<()> {
            Ok(())
        }

        async fn push(
            &self,
            _: &str,
            _: Option<&Credentials>,
            _: &dyn ProgressObserver,
        ) -> Result<PushReceipt> {
            Ok(PushReceipt::default())
        }

        async fn save(&self, _: &str, _: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn context_dir() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine\nCMD true\n").unwrap();
        dir
    }

    #[test]
    fn test_request_tags_primary_reference() {
        let reference = ImageReference::parse("demo/app:1.0").unwrap();

        // タグ一覧なし -> 付ける
        let config = BuildConfig {
            need_tag_latest: false,
            ..Default::default()
        };
        let request = ImageBuilder::request(&config, &reference);
        assert_eq!(request.tag.as_deref(), Some("demo/app:1.0"));
        assert!(request.remove_intermediate);

        // タグ一覧あり + needTagLatest=false -> 付けない
        let config = BuildConfig {
            image_tags: vec!["extra".to_string()],
            need_tag_latest: false,
            ..Default::default()
        };
        assert_eq!(ImageBuilder::request(&config, &reference).tag, None);

        // タグ一覧あり + needTagLatest=true -> 付ける
        let config = BuildConfig {
            image_tags: vec!["extra".to_string()],
            ..Default::default()
        };
        assert_eq!(
            ImageBuilder::request(&config, &reference).tag.as_deref(),
            Some("demo/app:1.0")
        );
    }

    #[tokio::test]
    async fn test_build_streams_progress_and_returns_id() {
        let dir = context_dir();
        let backend = SlowBackend::new(Duration::ZERO);
        let observer = RecordingObserver::new();
        let request = BuildRequest {
            dockerfile: DOCKERFILE_NAME.to_string(),
            ..Default::default()
        };

        let id = ImageBuilder::new(&backend)
            .build(dir.path(), &request, 0, &observer)
            .await
            .unwrap();

        assert_eq!(id, "sha256:feedface");
        assert_eq!(
            observer.lines(),
            vec!["Step 1/2 : FROM alpine\n", "Step 2/2 : CMD true\n"]
        );
        assert_eq!(backend.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_timeout() {
        let dir = context_dir();
        let backend = SlowBackend::new(Duration::from_secs(60));
        let request = BuildRequest {
            dockerfile: DOCKERFILE_NAME.to_string(),
            ..Default::default()
        };

        let result = ImageBuilder::new(&backend)
            .build(dir.path(), &request, 1_000, &RecordingObserver::new())
            .await;

        assert!(matches!(
            result,
            Err(BuildError::BuildTimeout { timeout_ms: 1_000 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_unbounded_when_timeout_is_zero() {
        let dir = context_dir();
        let backend = SlowBackend::new(Duration::from_secs(600));
        let request = BuildRequest {
            dockerfile: DOCKERFILE_NAME.to_string(),
            ..Default::default()
        };

        let id = ImageBuilder::new(&backend)
            .build(dir.path(), &request, 0, &RecordingObserver::new())
            .await
            .unwrap();
        assert_eq!(id, "sha256:feedface");
    }

    #[tokio::test]
    async fn test_build_requires_dockerfile() {
        let dir = tempdir().unwrap();
        let backend = SlowBackend::new(Duration::ZERO);
        let request = BuildRequest {
            dockerfile: DOCKERFILE_NAME.to_string(),
            ..Default::default()
        };

        let result = ImageBuilder::new(&backend)
            .build(dir.path(), &request, 0, &RecordingObserver::new())
            .await;
        assert!(matches!(result, Err(BuildError::Configuration(_))));
        assert!(backend.requests.lock().unwrap().is_empty());
    }
}
