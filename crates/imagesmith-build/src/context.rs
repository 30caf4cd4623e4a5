//! ビルドコンテキストの組み立て
//!
//! リソース定義に従ってファイルをコンテキストディレクトリへコピーし、
//! Docker デーモンへ送る tar.gz アーカイブを作成します。

use crate::config::ResourceSpec;
use crate::dockerfile::separators_to_unix;
use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use glob::{MatchOptions, Pattern};
use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};
use tar::Builder;
use walkdir::WalkDir;

/// includes が指定されていない場合に除外されるパターン
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/*~",
    "**/#*#",
    "**/.#*",
    "**/%*%",
    "**/._*",
    "**/CVS/**",
    "**/.cvsignore",
    "**/SCCS/**",
    "**/vssver.scc",
    "**/.svn/**",
    "**/.DS_Store",
    "**/.git/**",
    "**/.gitattributes",
    "**/.gitignore",
    "**/.gitmodules",
    "**/.hg/**",
    "**/.hgignore",
    "**/.hgsub",
    "**/.hgsubstate",
    "**/.hgtags",
    "**/.bzr/**",
    "**/.bzrignore",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// コンテキストサイズの警告閾値
const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

/// リソースをコンテキストディレクトリへコピーする
pub struct ContextAssembler {
    destination: PathBuf,
    strict_paths: bool,
}

impl ContextAssembler {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            strict_paths: false,
        }
    }

    /// 走査結果に空のパスが含まれていた場合にエラーとする
    pub fn strict_paths(mut self, strict: bool) -> Self {
        self.strict_paths = strict;
        self
    }

    /// 全リソースをコピーし、コンテキスト内の相対パス（`/` 区切り）を返す
    ///
    /// 各リソースのパスはソートしてから結果に追加する。既存ファイルは上書きする。
    pub fn assemble(&self, resources: &[ResourceSpec]) -> Result<Vec<String>> {
        fs::create_dir_all(&self.destination)?;

        // リソースがコンテキストを含む場合に自分自身をコピーしないよう除外する
        let skip = fs::canonicalize(&self.destination)?;

        let mut all_copied = Vec::new();
        for resource in resources {
            let mut copied = self.copy_resource(resource, &skip)?;
            copied.sort();
            all_copied.extend(copied);
        }
        Ok(all_copied)
    }

    /// 空のパスは既定では警告してスキップ、strictPaths ではエラー
    fn reject_empty_path(&self, source: &Path) -> Result<()> {
        if self.strict_paths {
            return Err(BuildError::Configuration(format!(
                "リソース走査で空のパスが検出されました: {}",
                source.display()
            )));
        }
        tracing::warn!("空のパスをスキップします: {}", source.display());
        Ok(())
    }

    fn copy_resource(&self, resource: &ResourceSpec, skip: &Path) -> Result<Vec<String>> {
        let source = &resource.directory;
        if !source.is_dir() {
            return Err(BuildError::Configuration(format!(
                "リソースディレクトリが存在しません: {}",
                source.display()
            )));
        }

        let target_path = resource.target_path.as_deref().unwrap_or("");
        let dest_root = self.destination.join(target_path);

        if resource.copies_whole_directory() {
            let context_path = separators_to_unix(target_path);
            if context_path.is_empty() {
                self.reject_empty_path(source)?;
                return Ok(Vec::new());
            }
            tracing::info!(
                "Copying dir {} -> {}",
                source.display(),
                dest_root.display()
            );
            copy_dir_all(source, &dest_root, skip)?;
            return Ok(vec![context_path]);
        }

        let included = scan(resource, skip)?;
        if included.is_empty() {
            tracing::info!(
                "No resources will be copied, no files match specified patterns: {}",
                source.display()
            );
        }

        let mut copied = Vec::with_capacity(included.len());
        for relative in included {
            if relative.is_empty() {
                self.reject_empty_path(source)?;
                continue;
            }

            let source_path = source.join(&relative);
            let dest_path = dest_root.join(&relative);
            tracing::info!(
                "Copying {} -> {}",
                source_path.display(),
                dest_path.display()
            );
            copy_file(&source_path, &dest_path)?;

            let context_path = Path::new(target_path).join(&relative);
            copied.push(separators_to_unix(&context_path.to_string_lossy()));
        }
        Ok(copied)
    }
}

/// includes / excludes に一致するファイルの相対パス（`/` 区切り、ソート済み）
///
/// `skip` 配下（組み立て中のコンテキスト）は走査しない。
fn scan(resource: &ResourceSpec, skip: &Path) -> Result<Vec<String>> {
    let includes = compile(resource.includes.as_deref().filter(|p| !p.is_empty()))?;
    let excludes = match resource.excludes.as_deref() {
        // excludes 未指定なら既定の除外パターン
        None => compile_defaults()?,
        Some(patterns) => compile(Some(patterns).filter(|p| !p.is_empty()))?,
    };

    let mut files = Vec::new();
    for entry in walk(&resource.directory, skip) {
        let entry = entry.map_err(|e| {
            BuildError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("ディレクトリの走査に失敗しました")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(&resource.directory)
            .unwrap_or(entry.path());
        let relative = separators_to_unix(&relative.to_string_lossy());

        let included = includes
            .as_ref()
            .is_none_or(|patterns| matches_any(patterns, &relative));
        let excluded = excludes
            .as_ref()
            .is_some_and(|patterns| matches_any(patterns, &relative));
        if included && !excluded {
            files.push(relative);
        }
    }
    Ok(files)
}

fn compile(patterns: Option<&[String]>) -> Result<Option<Vec<Pattern>>> {
    patterns
        .map(|patterns| {
            patterns
                .iter()
                .map(|p| compile_one(p))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()
}

fn compile_defaults() -> Result<Option<Vec<Pattern>>> {
    let patterns = DEFAULT_EXCLUDES
        .iter()
        .map(|p| compile_one(p))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(patterns))
}

/// 末尾が `/` のパターンは配下すべてに一致させる
fn compile_one(pattern: &str) -> Result<Pattern> {
    let normalized = separators_to_unix(pattern);
    let normalized = if normalized.ends_with('/') {
        format!("{}**", normalized)
    } else {
        normalized
    };
    Pattern::new(&normalized).map_err(|e| {
        BuildError::Configuration(format!("無効なパターン '{}': {}", pattern, e))
    })
}

fn matches_any(patterns: &[Pattern], path: &str) -> bool {
    patterns
        .iter()
        .any(|p| p.matches_with(path, MATCH_OPTIONS))
}

/// パーミッションと更新日時を保ったままコピー（上書き）
fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest)?;

    let metadata = fs::metadata(source)?;
    let mut times = FileTimes::new().set_modified(metadata.modified()?);
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    File::open(dest)?.set_times(times)?;
    Ok(())
}

/// ディレクトリを名前順に走査する。`skip` と一致するディレクトリには降りない
fn walk<'a>(
    root: &Path,
    skip: &'a Path,
) -> walkdir::FilterEntry<walkdir::IntoIter, impl FnMut(&walkdir::DirEntry) -> bool + 'a> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| {
            !entry.file_type().is_dir()
                || fs::canonicalize(entry.path())
                    .ok()
                    .is_none_or(|path| path != skip)
        })
}

fn copy_dir_all(source: &Path, dest: &Path, skip: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in walk(source, skip) {
        let entry = entry.map_err(|e| {
            BuildError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("ディレクトリの走査に失敗しました")
            }))
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Docker デーモンへ送るビルドコンテキスト
pub struct ContextBuilder;

impl ContextBuilder {
    /// コンテキストディレクトリを tar.gz アーカイブとして作成
    ///
    /// Dockerfile はディレクトリ直下に置かれている前提。
    pub fn create_context(context_path: &Path) -> Result<Vec<u8>> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            // コンテキストディレクトリを再帰的に追加
            tar.append_dir_all(".", context_path)?;
            tar.into_inner()?.finish()?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());

        Self::check_context_size(archive_data.len());

        Ok(archive_data)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 resources の includes / excludes で不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, relative).unwrap();
    }

    #[test]
    fn test_assemble_with_patterns() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(src.path(), "build/libs/app.jar");
        touch(src.path(), "build/libs/app-sources.jar");
        touch(src.path(), "build/tmp/cache.bin");
        touch(src.path(), "README.md");

        let resource = ResourceSpec::new(src.path())
            .include("build/libs/**")
            .exclude("**/*-sources.jar")
            .target("lib");

        let copied = ContextAssembler::new(dest.path())
            .assemble(&[resource])
            .unwrap();

        assert_eq!(copied, vec!["lib/build/libs/app.jar"]);
        assert!(dest.path().join("lib/build/libs/app.jar").is_file());
        assert!(!dest.path().join("lib/build/libs/app-sources.jar").exists());
    }

    #[test]
    fn test_assemble_whole_directory() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(src.path(), "a.txt");
        touch(src.path(), "nested/b.txt");
        fs::create_dir_all(src.path().join("empty")).unwrap();

        let resource = ResourceSpec::new(src.path()).target("static");
        let copied = ContextAssembler::new(dest.path())
            .assemble(&[resource])
            .unwrap();

        // ディレクトリ単位のコピーは1エントリ
        assert_eq!(copied, vec!["static"]);
        assert!(dest.path().join("static/nested/b.txt").is_file());
        assert!(dest.path().join("static/empty").is_dir());
    }

    #[test]
    fn test_whole_directory_skips_nested_destination() {
        let project = tempdir().unwrap();
        touch(project.path(), "a.txt");
        let context_dir = project.path().join("build/docker");

        let resource = ResourceSpec::new(project.path()).target("app");
        let copied = ContextAssembler::new(&context_dir)
            .assemble(&[resource])
            .unwrap();

        assert_eq!(copied, vec!["app"]);
        assert!(context_dir.join("app/a.txt").is_file());
        // コンテキスト自身はコピーされない
        assert!(context_dir.join("app/build").is_dir());
        assert!(!context_dir.join("app/build/docker").exists());
    }

    #[test]
    fn test_scan_skips_nested_destination() {
        let project = tempdir().unwrap();
        touch(project.path(), "a.txt");
        let context_dir = project.path().join("build/docker");
        touch(&context_dir, "stale.txt");

        let copied = ContextAssembler::new(&context_dir)
            .assemble(&[ResourceSpec::new(project.path())])
            .unwrap();

        assert_eq!(copied, vec!["a.txt"]);
    }

    #[test]
    fn test_empty_target_path_is_skipped() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(src.path(), "a.txt");

        let copied = ContextAssembler::new(dest.path())
            .assemble(&[ResourceSpec::new(src.path()).target("")])
            .unwrap();

        assert!(copied.is_empty());
        assert!(!dest.path().join("a.txt").exists());
    }

    #[test]
    fn test_empty_target_path_with_strict_paths() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(src.path(), "a.txt");

        let result = ContextAssembler::new(dest.path())
            .strict_paths(true)
            .assemble(&[ResourceSpec::new(src.path()).target("")]);

        assert!(matches!(result, Err(BuildError::Configuration(_))));
    }

    #[test]
    fn test_default_excludes_apply_when_unset() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(src.path(), "app.txt");
        touch(src.path(), ".git/config");
        touch(src.path(), "notes.txt~");

        // target がないので走査モード、excludes 未指定なので既定の除外
        let copied = ContextAssembler::new(dest.path())
            .assemble(&[ResourceSpec::new(src.path())])
            .unwrap();
        assert_eq!(copied, vec!["app.txt"]);

        // 空配列はフィルタなし
        let resource = ResourceSpec {
            excludes: Some(vec![]),
            ..ResourceSpec::new(src.path())
        };
        let copied = ContextAssembler::new(dest.path())
            .assemble(&[resource])
            .unwrap();
        assert_eq!(copied, vec![".git/config", "app.txt", "notes.txt~"]);
    }

    #[test]
    fn test_paths_sorted_per_resource() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(first.path(), "z.txt");
        touch(first.path(), "a.txt");
        touch(second.path(), "m.txt");

        let copied = ContextAssembler::new(dest.path())
            .assemble(&[
                ResourceSpec::new(second.path()).include("*.txt"),
                ResourceSpec::new(first.path()).include("*.txt").target("first"),
            ])
            .unwrap();

        // リソース単位でソートし、リソースの順序は維持する
        assert_eq!(copied, vec!["m.txt", "first/a.txt", "first/z.txt"]);
    }

    #[test]
    fn test_top_level_pattern_does_not_cross_directories() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(src.path(), "Dockerfile");
        touch(src.path(), "docker/entrypoint.sh");
        touch(src.path(), "sub/Dockerfile");

        let resource = ResourceSpec::new(src.path())
            .include("Docker*")
            .include("docker/");
        let copied = ContextAssembler::new(dest.path())
            .assemble(&[resource])
            .unwrap();
        assert_eq!(copied, vec!["Dockerfile", "docker/entrypoint.sh"]);
    }

    #[test]
    fn test_copy_overwrites_and_preserves_mtime() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(src.path(), "data.txt");

        let past = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(src.path().join("data.txt"))
            .unwrap()
            .set_modified(past)
            .unwrap();

        fs::write(dest.path().join("data.txt"), "stale").unwrap();

        let assembler = ContextAssembler::new(dest.path());
        let resource = ResourceSpec::new(src.path()).include("*.txt");
        assembler.assemble(std::slice::from_ref(&resource)).unwrap();
        assembler.assemble(&[resource]).unwrap();

        let copied = dest.path().join("data.txt");
        assert_eq!(fs::read_to_string(&copied).unwrap(), "data.txt");
        assert_eq!(fs::metadata(&copied).unwrap().modified().unwrap(), past);
    }

    #[test]
    fn test_missing_source_directory() {
        let dest = tempdir().unwrap();
        let result = ContextAssembler::new(dest.path())
            .assemble(&[ResourceSpec::new("/nonexistent/imagesmith/resource")]);
        assert!(matches!(result, Err(BuildError::Configuration(_))));
    }

    #[test]
    fn test_create_context() {
        let temp_dir = tempdir().unwrap();
        touch(temp_dir.path(), "file1.txt");
        touch(temp_dir.path(), "subdir/file3.txt");
        fs::write(temp_dir.path().join("Dockerfile"), "FROM alpine").unwrap();

        let archive = ContextBuilder::create_context(temp_dir.path()).unwrap();
        assert!(!archive.is_empty());

        // tarアーカイブとして展開できるか確認
        let extract_dir = tempdir().unwrap();
        let decoder = flate2::read::GzDecoder::new(std::io::Cursor::new(archive));
        tar::Archive::new(decoder).unpack(extract_dir.path()).unwrap();

        assert!(extract_dir.path().join("Dockerfile").exists());
        assert!(extract_dir.path().join("subdir/file3.txt").exists());
    }
}
