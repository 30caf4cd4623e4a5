//! レジストリ認証処理
//!
//! 認証情報は次の順序で解決します（ユーザー名とパスワードが揃った最初のものを採用）:
//! 1. ビルド設定の `auth`
//! 2. プロジェクトプロパティ `docker.username` / `docker.password` / `docker.email`
//! 3. 同名の環境変数
//! 4. Docker の config.json（auths / credential helper）

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// serverId / registryUrl が未指定の場合のレジストリ
pub const DEFAULT_SERVER_ADDRESS: &str = "index.docker.io";

const USERNAME_KEY: &str = "docker.username";
const PASSWORD_KEY: &str = "docker.password";
const EMAIL_KEY: &str = "docker.email";

/// Docker Hub の config.json 上のキー
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// 解決済みの認証情報
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub server_address: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("email", &self.email)
            .field("server_address", &self.server_address)
            .finish()
    }
}

impl Credentials {
    fn from_parts(
        username: &str,
        password: &str,
        email: &str,
        server_address: &str,
    ) -> Option<Self> {
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
            email: Some(email.to_string()).filter(|e| !e.is_empty()),
            server_address: server_address.to_string(),
        })
    }
}

/// Docker config.json の構造
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    /// 認証情報 (レジストリ -> AuthEntry)
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default)]
    creds_store: Option<String>,
}

/// 認証エントリ
#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// レジストリ認証を管理
#[derive(Debug)]
pub struct RegistryAuth {
    config_path: PathBuf,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAuth {
    /// 新しい RegistryAuth を作成
    ///
    /// デフォルトで ~/.docker/config.json を使用
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self { config_path }
    }

    /// 指定したパスの config.json を使用
    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// 認証に使うレジストリ識別子（serverId → registryUrl → index.docker.io）
    pub fn server_address(config: &BuildConfig) -> String {
        config
            .server_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(config.registry_url.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(DEFAULT_SERVER_ADDRESS)
            .to_string()
    }

    /// 設定・プロパティ・環境変数・config.json の順で認証情報を解決
    pub fn resolve(&self, config: &BuildConfig, image: &str) -> Result<Option<Credentials>> {
        let server_address = Self::server_address(config);

        // 1. ビルド設定
        if let Some(auth) = &config.auth {
            let email = auth.email.as_deref().unwrap_or("");
            if let Some(creds) =
                Credentials::from_parts(&auth.username, &auth.password, email, &server_address)
            {
                tracing::debug!("Using credentials from build config");
                return Ok(Some(creds));
            }
        }

        // 2. プロジェクトプロパティ
        let property = |key: &str| config.properties.get(key).map(String::as_str).unwrap_or("");
        if let Some(creds) = Credentials::from_parts(
            property(USERNAME_KEY),
            property(PASSWORD_KEY),
            property(EMAIL_KEY),
            &server_address,
        ) {
            tracing::debug!("Using credentials from project properties");
            return Ok(Some(creds));
        }

        // 3. 環境変数
        let env = |key: &str| std::env::var(key).unwrap_or_default().trim().to_string();
        if let Some(creds) = Credentials::from_parts(
            &env(USERNAME_KEY),
            &env(PASSWORD_KEY),
            &env(EMAIL_KEY),
            &server_address,
        ) {
            tracing::debug!("Using credentials from environment");
            return Ok(Some(creds));
        }

        // 4. Docker config.json
        if let Some(creds) = self.get_credentials(image)? {
            return Ok(Some(creds));
        }

        tracing::warn!(
            "No entry found, cannot configure authentication for {}",
            server_address
        );
        Ok(None)
    }

    /// イメージ名からレジストリの認証情報を config.json から取得
    ///
    /// # Returns
    /// * `Ok(Some(credentials))` - 認証情報が見つかった場合
    /// * `Ok(None)` - 認証情報が不要または見つからない場合
    /// * `Err(e)` - 認証情報の取得に失敗した場合
    pub fn get_credentials(&self, image: &str) -> Result<Option<Credentials>> {
        let registry = self.extract_registry(image);

        // config.json が存在しない場合は認証なしで続行
        if !self.config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.config_path);
            return Ok(None);
        }

        let config = self.load_docker_config()?;

        // 1. auths セクションを確認
        let mut keys = vec![registry.clone()];
        if registry == "docker.io" {
            keys.push(DOCKER_HUB_AUTH_KEY.to_string());
        }
        for key in &keys {
            if let Some(auth_entry) = config.auths.get(key)
                && let Some(auth_b64) = &auth_entry.auth
                && let Some(creds) = self.decode_auth(auth_b64, &registry)?
            {
                tracing::debug!("Found credentials in auths for {}", registry);
                return Ok(Some(creds));
            }
        }

        // 2. credential helper を確認
        if let Some(helper) = &config.creds_store {
            tracing::debug!("Trying credential helper: {}", helper);
            if let Ok(Some(creds)) = self.get_from_helper(helper, &registry) {
                return Ok(Some(creds));
            }
        }

        tracing::debug!("No credentials found for {}", registry);
        Ok(None)
    }

    /// イメージ名からレジストリを抽出
    ///
    /// # Examples
    /// - `ghcr.io/org/app:tag` -> `ghcr.io`
    /// - `myuser/app:tag` -> `docker.io`
    /// - `localhost:5000/app` -> `localhost:5000`
    pub fn extract_registry(&self, image: &str) -> String {
        if let Some((first, _)) = image.split_once('/') {
            // `.` か `:` を含む先頭要素はレジストリ（ghcr.io, localhost:5000 など）
            if first.contains('.') || first.contains(':') || first == "localhost" {
                return first.to_string();
            }
        }

        // デフォルトは Docker Hub
        "docker.io".to_string()
    }

    /// Docker config.json を読み込み
    fn load_docker_config(&self) -> Result<DockerConfig> {
        let content = std::fs::read_to_string(&self.config_path).map_err(|e| BuildError::Auth {
            registry: self.config_path.display().to_string(),
            message: format!("Failed to read config.json: {}", e),
        })?;

        serde_json::from_str(&content).map_err(|e| BuildError::Auth {
            registry: self.config_path.display().to_string(),
            message: format!("Failed to parse config.json: {}", e),
        })
    }

    /// Base64エンコードされた認証情報をデコード
    fn decode_auth(&self, auth_b64: &str, registry: &str) -> Result<Option<Credentials>> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth_b64)
            .map_err(|e| BuildError::Auth {
                registry: registry.to_string(),
                message: format!("Failed to decode auth: {}", e),
            })?;

        let auth_str = String::from_utf8(decoded).map_err(|e| BuildError::Auth {
            registry: registry.to_string(),
            message: format!("Invalid UTF-8 in auth: {}", e),
        })?;

        Ok(auth_str
            .split_once(':')
            .and_then(|(username, password)| {
                Credentials::from_parts(username, password, "", registry)
            }))
    }

    /// credential helper から認証情報を取得
    fn get_from_helper(&self, helper: &str, registry: &str) -> Result<Option<Credentials>> {
        let helper_cmd = format!("docker-credential-{}", helper);

        let mut child = Command::new(&helper_cmd)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BuildError::Auth {
                registry: registry.to_string(),
                message: format!("Failed to run {}: {}", helper_cmd, e),
            })?;

        // レジストリ名を stdin に渡す
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(registry.as_bytes()).ok();
        }

        let output = child.wait_with_output().map_err(|e| BuildError::Auth {
            registry: registry.to_string(),
            message: format!("Credential helper failed: {}", e),
        })?;

        if !output.status.success() {
            tracing::debug!(
                "Credential helper returned error for {}: {}",
                registry,
                String::from_utf8_lossy(&output.stderr)
            );
            return Ok(None);
        }

        let response: CredentialResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| BuildError::Auth {
                registry: registry.to_string(),
                message: format!("Failed to parse credential helper response: {}", e),
            })?;

        Ok(Credentials::from_parts(
            &response.username,
            &response.secret,
            "",
            registry,
        ))
    }
}
