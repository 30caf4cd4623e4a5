//! ImageSmith のコンテナイメージビルド機能
//!
//! 設定からイメージ参照を確定し、ビルドコンテキスト（ファイル群と Dockerfile）を組み立て、
//! バックエンド経由でビルド・タグ付け・プッシュを行い、来歴を JSON として保存します。

pub mod auth;
pub mod backend;
pub mod builder;
pub mod config;
pub mod context;
pub mod dockerfile;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod provenance;
pub mod pusher;
pub mod reference;
pub mod tagger;
pub mod version;

pub use auth::{Credentials, RegistryAuth};
pub use backend::{BuildRequest, DockerBackend, ImageBackend, PushReceipt};
pub use builder::ImageBuilder;
pub use config::{BuildConfig, ResourceSpec};
pub use context::{ContextAssembler, ContextBuilder};
pub use dockerfile::{BuildInstruction, DockerfileWriter, Manifest};
pub use error::BuildError;
pub use pipeline::{
    BuildOutcome, Pipeline, PipelineError, ResolvedImage, RunOutcome, Stage, resolve_image,
    skip_reason,
};
pub use progress::{BuildProgress, ProgressEvent, ProgressObserver};
pub use provenance::BuildProvenance;
pub use pusher::{Publisher, RetryPolicy};
pub use reference::ImageReference;
pub use tagger::ImageTagger;
pub use version::{VersionInfo, VersionResolver};
