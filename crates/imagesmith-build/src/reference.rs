//! イメージ参照の解析
//!
//! `registry:5000/org/app:tag` のような文字列をリポジトリとタグに分離します。

use crate::error::{BuildError, Result};
use std::fmt;

/// リポジトリ + 任意のタグ
///
/// タグがない場合は「最新ビルド」を意味する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    repository: String,
    tag: Option<String>,
}

impl ImageReference {
    /// イメージ名を解析
    ///
    /// 最後の `/` より後ろにある `:` のみをタグ区切りとみなすため、
    /// レジストリのポート番号（`localhost:5000/app`）はタグと誤認しない。
    ///
    /// # Examples
    /// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", Some("v1.0"))`
    /// - `localhost:5000/app` -> `("localhost:5000/app", None)`
    /// - `app:` -> `("app", None)`
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(BuildError::Configuration(
                "imageName を指定してください".to_string(),
            ));
        }

        let last_slash = raw.rfind('/');
        let last_colon = raw.rfind(':');

        let (repository, tag) = match (last_colon, last_slash) {
            (Some(colon), Some(slash)) if colon > slash => (&raw[..colon], Some(&raw[colon + 1..])),
            (Some(colon), None) => (&raw[..colon], Some(&raw[colon + 1..])),
            _ => (raw, None),
        };

        if repository.is_empty() {
            return Err(BuildError::Configuration(format!(
                "イメージ名にリポジトリが含まれていません: {}",
                raw
            )));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.filter(|t| !t.is_empty()).map(str::to_string),
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// 同じリポジトリで別のタグを付けた参照
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{}", self.repository, tag),
            None => f.write_str(&self.repository),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(raw: &str) -> (String, Option<String>) {
        let r = ImageReference::parse(raw).unwrap();
        (r.repository().to_string(), r.tag().map(str::to_string))
    }

    #[test]
    fn test_parse_with_tag() {
        assert_eq!(
            split("ghcr.io/org/app:v1.0"),
            ("ghcr.io/org/app".to_string(), Some("v1.0".to_string()))
        );
    }

    #[test]
    fn test_parse_without_tag() {
        assert_eq!(split("ghcr.io/org/app"), ("ghcr.io/org/app".to_string(), None));
        assert_eq!(split("nginx"), ("nginx".to_string(), None));
    }

    #[test]
    fn test_parse_with_port() {
        // localhost:5000/app はポート番号を含むレジストリ
        assert_eq!(
            split("localhost:5000/app"),
            ("localhost:5000/app".to_string(), None)
        );
    }

    #[test]
    fn test_parse_with_port_and_tag() {
        assert_eq!(
            split("host:5000/name:tag"),
            ("host:5000/name".to_string(), Some("tag".to_string()))
        );
    }

    #[test]
    fn test_parse_empty_tag_is_absent() {
        assert_eq!(split("app:"), ("app".to_string(), None));
        assert_eq!(split("reg:5000/app:"), ("reg:5000/app".to_string(), None));
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(matches!(
            ImageReference::parse(""),
            Err(BuildError::Configuration(_))
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        let r = ImageReference::parse("reg:5000/app:1.2").unwrap();
        assert_eq!(r.to_string(), "reg:5000/app:1.2");
        assert_eq!(r.with_tag("dev").to_string(), "reg:5000/app:dev");
    }
}
