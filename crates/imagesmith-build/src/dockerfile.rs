//! Dockerfile 生成
//!
//! 構造化されたビルド設定とコピー済みファイルの一覧から、命令を固定の順序で並べた Dockerfile を生成します。
//!
//! 順序: FROM → MAINTAINER → ENV → WORKDIR → ADD → RUN → HEALTHCHECK → EXPOSE → USER →
//! ENTRYPOINT → CMD → VOLUME → LABEL

use crate::config::BuildConfig;
use crate::error::Result;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// 生成する Dockerfile のファイル名
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// RUN をまとめる際の連結子
const RUN_JOINER: &str = " &&\\\n\t";

/// Dockerfile の1命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInstruction {
    pub verb: &'static str,
    pub argument: String,
}

impl BuildInstruction {
    fn new(verb: &'static str, argument: impl Into<String>) -> Self {
        Self {
            verb,
            argument: argument.into(),
        }
    }
}

impl fmt::Display for BuildInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb, self.argument)
    }
}

/// 生成結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub instructions: Vec<BuildInstruction>,
    /// 生成時に発生した警告（呼び出し側へ通知する）
    pub warnings: Vec<String>,
}

impl Manifest {
    /// 1行1命令のテキスト
    pub fn render(&self) -> String {
        let mut out = String::new();
        for instruction in &self.instructions {
            out.push_str(&instruction.to_string());
            out.push('\n');
        }
        out
    }
}

pub struct DockerfileWriter<'a> {
    config: &'a BuildConfig,
    /// ADD の宛先判定に使うビルドコンテキストディレクトリ
    context_dir: &'a Path,
}

impl<'a> DockerfileWriter<'a> {
    pub fn new(config: &'a BuildConfig, context_dir: &'a Path) -> Self {
        Self {
            config,
            context_dir,
        }
    }

    /// 命令列を生成
    pub fn generate(&self, copied_paths: &[String]) -> Manifest {
        let config = self.config;
        let mut manifest = Manifest::default();
        let commands = &mut manifest.instructions;

        if let Some(base_image) = present(&config.base_image) {
            commands.push(BuildInstruction::new("FROM", base_image));
        }
        if let Some(maintainer) = present(&config.maintainer) {
            commands.push(BuildInstruction::new("MAINTAINER", maintainer));
        }
        // BTreeMap なのでキー順に並ぶ
        for (key, value) in &config.env {
            commands.push(BuildInstruction::new("ENV", format!("{} {}", key, value)));
        }
        if let Some(workdir) = present(&config.workdir) {
            commands.push(BuildInstruction::new("WORKDIR", workdir));
        }
        for file in copied_paths {
            // Docker は $ を変数として解釈するのでエスケープする
            commands.push(BuildInstruction::new(
                "ADD",
                format!("{} {}", file.replace('$', "\\$"), self.normalize_dest(file)),
            ));
        }
        if !config.runs.is_empty() {
            if config.squash_run_commands {
                commands.push(BuildInstruction::new("RUN", config.runs.join(RUN_JOINER)));
            } else {
                for run in &config.runs {
                    commands.push(BuildInstruction::new("RUN", run.as_str()));
                }
            }
        }
        if let Some(healthcheck) = &config.healthcheck {
            let mut argument = String::new();
            if let Some(options) = healthcheck.options.as_deref().filter(|o| !o.is_empty()) {
                argument.push_str(options);
                argument.push(' ');
            }
            argument.push_str("CMD ");
            argument.push_str(&healthcheck.cmd);
            commands.push(BuildInstruction::new("HEALTHCHECK", argument));
        }
        let exposes: BTreeSet<&str> = config.exposes.iter().map(String::as_str).collect();
        if !exposes.is_empty() {
            let ports: Vec<&str> = exposes.into_iter().collect();
            commands.push(BuildInstruction::new("EXPOSE", ports.join(" ")));
        }
        if let Some(user) = present(&config.user) {
            commands.push(BuildInstruction::new("USER", user));
        }
        let entry_point = present(&config.entry_point);
        if let Some(entry_point) = entry_point {
            commands.push(BuildInstruction::new("ENTRYPOINT", entry_point));
        }
        if let Some(cmd) = present(&config.cmd) {
            if entry_point.is_some() && !is_argument_list(cmd) {
                // ENTRYPOINT がある場合 CMD は引数リストでなければならない
                let converted = to_argument_list(cmd);
                manifest.warnings.push(format!(
                    "entryPoint が指定されていますが cmd が引数リスト形式ではありません。引数リストに変換します: CMD {}",
                    converted
                ));
                manifest
                    .instructions
                    .push(BuildInstruction::new("CMD", converted));
            } else {
                manifest.instructions.push(BuildInstruction::new("CMD", cmd));
            }
        }
        let commands = &mut manifest.instructions;
        for volume in &config.volumes {
            commands.push(BuildInstruction::new("VOLUME", volume.as_str()));
        }
        for label in &config.labels {
            commands.push(BuildInstruction::new("LABEL", label.as_str()));
        }

        for warning in &manifest.warnings {
            tracing::warn!("{}", warning);
        }

        manifest
    }

    /// 生成してビルドコンテキストに書き出す（既存ファイルは上書き）
    pub fn write(&self, copied_paths: &[String]) -> Result<(PathBuf, Manifest)> {
        let manifest = self.generate(copied_paths);
        let rendered = manifest.render();
        tracing::debug!("Writing Dockerfile:\n{}", rendered);

        std::fs::create_dir_all(self.context_dir)?;
        let path = self.context_dir.join(DOCKERFILE_NAME);
        std::fs::write(&path, rendered)?;

        Ok((path, manifest))
    }

    /// ADD の宛先
    ///
    /// ファイルなら親ディレクトリ（末尾 `/`）、トップレベルのファイルなら `.`、
    /// ディレクトリならそのパス自身。
    fn normalize_dest(&self, file_path: &str) -> String {
        let path = Path::new(file_path);
        if self.context_dir.join(path).is_file() {
            match path.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(parent) => format!("{}/", separators_to_unix(&parent.to_string_lossy())),
                None => ".".to_string(),
            }
        } else {
            separators_to_unix(file_path)
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn is_argument_list(cmd: &str) -> bool {
    cmd.starts_with('[') && cmd.ends_with(']')
}

/// 空白で分割し、各要素をダブルクォートで囲んだ JSON 配列形式に変換
fn to_argument_list(cmd: &str) -> String {
    let args: Vec<String> = cmd
        .split_whitespace()
        .map(|arg| format!("\"{}\"", arg))
        .collect();
    format!("[{}]", args.join(","))
}

/// Windows 区切り文字を `/` に変換
pub fn separators_to_unix(path: &str) -> String {
    path.replace('\\', "/")
}
