//! ビルド来歴の記録
//!
//! イメージ名・リポジトリURL・コミットID・ダイジェストを JSON で保存する。
//! キーは常にソート順で出力し、値のないフィールドは省略する。

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// フィールドは出力キー名の辞書順に宣言する
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProvenance {
    #[serde(rename = "commit", default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub image: String,
    #[serde(rename = "repo", default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
}

impl BuildProvenance {
    pub fn record(
        image: impl Into<String>,
        repository_url: Option<String>,
        commit_id: Option<String>,
    ) -> Self {
        Self {
            image: image.into(),
            repository_url,
            commit_id,
            digest: None,
        }
    }

    pub fn attach_digest(self, digest: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            ..self
        }
    }

    /// キーをソートした JSON 文字列
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `path` に書き出す（親ディレクトリは作成、既存ファイルは上書き）
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        tracing::info!("Wrote image info to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sorted_keys_and_omitted_fields() {
        let provenance = BuildProvenance::record(
            "demo/app:1.0",
            Some("https://example.com/org/app.git".to_string()),
            None,
        )
        .attach_digest("demo/app@sha256:cafebabe");

        let json = provenance.to_json().unwrap();
        let keys: Vec<usize> = ["\"digest\"", "\"image\"", "\"repo\""]
            .iter()
            .map(|k| json.find(k).unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "{}", json);
        assert!(!json.contains("commit"));
    }

    #[test]
    fn test_persist_creates_parents_and_overwrites() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested/out/image_info.json");

        BuildProvenance::record("demo/app:1.0", None, Some("0123abcd".to_string()))
            .persist(&path)
            .unwrap();
        BuildProvenance::record("demo/app:2.0", None, None)
            .persist(&path)
            .unwrap();

        let stored: BuildProvenance =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, BuildProvenance::record("demo/app:2.0", None, None));
    }
}
