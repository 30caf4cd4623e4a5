//! イメージ操作のバックエンド
//!
//! パイプラインは [`ImageBackend`] を通してのみコンテナエンジンに触れる。
//! 実装は bollard 経由で Docker Engine API を呼ぶ [`DockerBackend`]。

use crate::auth::Credentials;
use crate::config::BuildConfig;
use crate::error::{BuildError, Result};
use crate::progress::{ProgressEvent, ProgressObserver};
use async_trait::async_trait;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// ビルド要求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// コンテキスト内の Dockerfile 名
    pub dockerfile: String,
    /// ビルド時に付ける参照（`repo[:tag]`）
    pub tag: Option<String>,
    pub pull: bool,
    pub no_cache: bool,
    /// 中間コンテナを削除する
    pub remove_intermediate: bool,
    pub quiet: bool,
    pub build_args: BTreeMap<String, String>,
    pub network_mode: Option<String>,
    pub platform: Option<String>,
}

/// プッシュ結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReceipt {
    /// レジストリが報告したマニフェストダイジェスト（`sha256:...`）
    pub digest: Option<String>,
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// tar.gz のコンテキストからイメージをビルドし、イメージIDを返す
    async fn build(
        &self,
        context: Vec<u8>,
        request: &BuildRequest,
        observer: &dyn ProgressObserver,
    ) -> Result<String>;

    /// イメージに `repository:tag` を付ける
    ///
    /// `force` が false で、既に別のイメージを指すタグがある場合は [`BuildError::TagConflict`]。
    async fn tag(&self, image_id: &str, repository: &str, tag: &str, force: bool) -> Result<()>;

    /// `reference` をレジストリへプッシュ
    async fn push(
        &self,
        reference: &str,
        credentials: Option<&Credentials>,
        observer: &dyn ProgressObserver,
    ) -> Result<PushReceipt>;

    /// イメージを tar アーカイブとして保存
    async fn save(&self, image: &str, destination: &Path) -> Result<()>;
}

/// Docker Engine API バックエンド
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// 設定に従って Docker に接続し、疎通を確認する
    ///
    /// - `unix://...` はソケット接続
    /// - `tcp://` / `http(s)://` は HTTP 接続（`dockerCertPath` があれば TLS）
    /// - 未指定なら環境変数 `DOCKER_HOST` などの既定値
    pub async fn connect(config: &BuildConfig) -> Result<Self> {
        let timeout_secs = config.api_read_timeout.div_ceil(1000).max(1);
        let version = bollard::API_DEFAULT_VERSION;

        let docker = match config.docker_host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) if host.starts_with("unix://") => {
                tracing::debug!("Connecting to docker socket: {}", host);
                Docker::connect_with_socket(host, timeout_secs, version)?
            }
            Some(host) => {
                let addr = host.replacen("tcp://", "https://", 1);
                match &config.docker_cert_path {
                    Some(cert_path) => {
                        tracing::debug!("Connecting to docker over TLS: {}", addr);
                        Docker::connect_with_ssl(
                            &addr,
                            &cert_path.join("key.pem"),
                            &cert_path.join("cert.pem"),
                            &cert_path.join("ca.pem"),
                            timeout_secs,
                            version,
                        )?
                    }
                    None => {
                        let addr = host.replacen("tcp://", "http://", 1);
                        tracing::debug!("Connecting to docker over HTTP: {}", addr);
                        Docker::connect_with_http(&addr, timeout_secs, version)?
                    }
                }
            }
            None => Docker::connect_with_local_defaults()?,
        };

        let connect_timeout = Duration::from_millis(config.connect_timeout.max(1));
        match tokio::time::timeout(connect_timeout, docker.ping()).await {
            Ok(result) => {
                result?;
            }
            Err(_) => {
                return Err(BuildError::Configuration(format!(
                    "Docker への接続が {}ms 以内に完了しませんでした",
                    config.connect_timeout
                )));
            }
        }

        Ok(Self::new(docker))
    }

    /// 参照が指すイメージID（存在しなければ None）
    async fn image_id(&self, reference: &str) -> Result<Option<String>> {
        match self.docker.inspect_image(reference).await {
            Ok(image) => Ok(image.id),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            }) => Ok(None),
            Err(e) => Err(BuildError::Backend(e)),
        }
    }
}

fn to_docker_credentials(credentials: &Credentials) -> bollard::auth::DockerCredentials {
    bollard::auth::DockerCredentials {
        username: Some(credentials.username.clone()),
        password: Some(credentials.password.clone()),
        email: credentials.email.clone(),
        serveraddress: Some(credentials.server_address.clone()),
        ..Default::default()
    }
}

/// ビルド出力の `aux` に含まれる `ID` からイメージIDを取り出す
fn aux_image_id(output: &bollard::models::BuildInfo) -> Option<String> {
    output.aux.as_ref().and_then(|aux| aux.id.clone())
}

/// 旧形式のビルド出力 `Successfully built <id>` からイメージIDを取り出す
fn stream_image_id(stream: &str) -> Option<String> {
    stream
        .trim()
        .strip_prefix("Successfully built ")
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// プッシュのステータス行 `<tag>: digest: sha256:... size: N` からダイジェストを取り出す
pub fn parse_push_digest(status: &str) -> Option<String> {
    let (_, rest) = status.split_once("digest: ")?;
    rest.split_whitespace()
        .next()
        .filter(|d| d.contains(':'))
        .map(str::to_string)
}

#[async_trait]
impl ImageBackend for DockerBackend {
    async fn build(
        &self,
        context: Vec<u8>,
        request: &BuildRequest,
        observer: &dyn ProgressObserver,
    ) -> Result<String> {
        tracing::info!(
            "Building image: {}",
            request.tag.as_deref().unwrap_or("<untagged>")
        );

        let build_args: HashMap<String, String> = request
            .build_args
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: request.tag.clone().unwrap_or_default(),
            buildargs: build_args,
            nocache: request.no_cache,
            rm: request.remove_intermediate,
            pull: request.pull,
            q: request.quiet,
            networkmode: request.network_mode.clone().unwrap_or_default(),
            platform: request.platform.clone().unwrap_or_default(),
            ..Default::default()
        };

        tracing::debug!("Build options: {:?}", options);

        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let body = Full::new(Bytes::from(context));
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        let mut image_id = None;
        while let Some(msg) = stream.next().await {
            let output = msg?;

            if let Some(error) = output.error.clone() {
                return Err(BuildError::BuildFailed(error));
            }
            if let Some(error_detail) = output.error_detail.clone() {
                let error_msg = error_detail
                    .message
                    .unwrap_or_else(|| "Unknown build error".to_string());
                return Err(BuildError::BuildFailed(error_msg));
            }

            if let Some(id) = aux_image_id(&output) {
                image_id = Some(id);
            } else if let Some(id) = output.stream.as_deref().and_then(stream_image_id) {
                image_id.get_or_insert(id);
            }

            observer.on_event(&ProgressEvent {
                stream: output.stream,
                id: output.id,
                status: output.status,
                progress: output.progress,
            });
        }

        let image_id = image_id.ok_or_else(|| {
            BuildError::BuildFailed("ビルド出力からイメージIDを取得できませんでした".to_string())
        })?;
        tracing::info!("Successfully built: {}", image_id);
        Ok(image_id)
    }

    async fn tag(&self, image_id: &str, repository: &str, tag: &str, force: bool) -> Result<()> {
        let reference = format!("{}:{}", repository, tag);

        if !force
            && let Some(existing) = self.image_id(&reference).await?
            && existing != image_id
        {
            return Err(BuildError::TagConflict { reference });
        }

        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions {
            repo: repository.to_string(),
            tag: tag.to_string(),
        };

        match self.docker.tag_image(image_id, Some(options)).await {
            Ok(()) => {
                tracing::debug!("Tagged {} as {}", image_id, reference);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                ..
            }) => Err(BuildError::TagConflict { reference }),
            Err(e) => Err(BuildError::Backend(e)),
        }
    }

    async fn push(
        &self,
        reference: &str,
        credentials: Option<&Credentials>,
        observer: &dyn ProgressObserver,
    ) -> Result<PushReceipt> {
        let parsed = crate::reference::ImageReference::parse(reference)?;
        tracing::info!("Pushing image: {}", reference);

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: parsed.tag().unwrap_or("latest").to_string(),
        };

        let mut stream = self.docker.push_image(
            parsed.repository(),
            Some(options),
            credentials.map(to_docker_credentials),
        );

        let mut receipt = PushReceipt::default();
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| BuildError::PushFailed {
                message: e.to_string(),
            })?;

            if let Some(err) = info.error {
                return Err(BuildError::PushFailed { message: err });
            }

            if let Some(digest) = info.status.as_deref().and_then(parse_push_digest) {
                receipt.digest = Some(digest);
            }

            observer.on_event(&ProgressEvent {
                stream: None,
                id: None,
                status: info.status,
                progress: info.progress,
            });
        }

        tracing::info!("Successfully pushed: {}", reference);
        Ok(receipt)
    }

    async fn save(&self, image: &str, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = std::pin::pin!(self.docker.export_image(image));
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        tracing::info!("Saved {} to {}", image, destination.display());
        Ok(())
    }
}
