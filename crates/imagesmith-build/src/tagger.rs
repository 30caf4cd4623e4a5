//! ビルド済みイメージへの追加タグ付け

use crate::backend::ImageBackend;
use crate::error::Result;

/// ビルド済みイメージへ追加タグを付ける
pub struct ImageTagger<'a> {
    backend: &'a dyn ImageBackend,
}

impl<'a> ImageTagger<'a> {
    pub fn new(backend: &'a dyn ImageBackend) -> Self {
        Self { backend }
    }

    /// `tags` の空でない各タグについて `repository:tag` を付け、付けた参照を返す
    ///
    /// `force` が false で既存タグと衝突した場合は `TagConflict` で失敗する。
    pub async fn tag(
        &self,
        image_id: &str,
        repository: &str,
        tags: &[String],
        force: bool,
    ) -> Result<Vec<String>> {
        let mut applied = Vec::new();
        for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            tracing::info!("Tagging {} with {}:{}", image_id, repository, tag);
            self.backend.tag(image_id, repository, tag, force).await?;
            applied.push(format!("{}:{}", repository, tag));
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::backend::{BuildRequest, PushReceipt};
    use crate::error::BuildError;
    use crate::progress::ProgressObserver;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// 参照 -> イメージID を保持するだけのバックエンド
    #[derive(Default)]
    struct TagStore {
        tags: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl ImageBackend for TagStore {
        async fn build(
            &self,
            _: Vec<u8>,
            _: &BuildRequest,
            _: &dyn ProgressObserver,
        ) -> Result<String> {
            unreachable!()
        }

        async fn tag(&self, image_id: &str, repository: &str, tag: &str, force: bool) -> Result<()> {
            let reference = format!("{}:{}", repository, tag);
            let mut tags = self.tags.lock().unwrap();
            match tags.get(&reference) {
                Some(existing) if existing != image_id && !force => {
                    Err(BuildError::TagConflict { reference })
                }
                _ => {
                    tags.insert(reference, image_id.to_string());
                    Ok(())
                }
            }
        }

        async fn push(
            &self,
            _: &str,
            _: Option<&Credentials>,
            _: &dyn ProgressObserver,
        ) -> Result<PushReceipt> {
            unreachable!()
        }

        async fn save(&self, _: &str, _: &Path) -> Result<()> {
            unreachable!()
        }
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_skips_empty_tags() {
        let store = TagStore::default();
        let applied = ImageTagger::new(&store)
            .tag("sha256:1", "demo/app", &tags(&["1.0", "", "  ", "stable"]), false)
            .await
            .unwrap();

        assert_eq!(applied, vec!["demo/app:1.0", "demo/app:stable"]);
        assert_eq!(store.tags.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_conflict_without_force() {
        let store = TagStore::default();
        let tagger = ImageTagger::new(&store);
        tagger
            .tag("sha256:old", "demo/app", &tags(&["stable"]), false)
            .await
            .unwrap();

        let result = tagger
            .tag("sha256:new", "demo/app", &tags(&["stable"]), false)
            .await;
        assert!(matches!(
            result,
            Err(BuildError::TagConflict { reference }) if reference == "demo/app:stable"
        ));

        // 同じイメージへの付け直しは衝突ではない
        tagger
            .tag("sha256:old", "demo/app", &tags(&["stable"]), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_force_overwrites() {
        let store = TagStore::default();
        let tagger = ImageTagger::new(&store);
        tagger
            .tag("sha256:old", "demo/app", &tags(&["stable"]), false)
            .await
            .unwrap();
        tagger
            .tag("sha256:new", "demo/app", &tags(&["stable"]), true)
            .await
            .unwrap();

        assert_eq!(
            store.tags.lock().unwrap().get("demo/app:stable").map(String::as_str),
            Some("sha256:new")
        );
    }
}
