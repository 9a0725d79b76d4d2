use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use parabot_core::error::ParabotError;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Refresh this long before the recorded expiry.
const EXPIRY_SKEW_MS: i64 = 60_000;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.into()
}

/// Where a JSON secret comes from: a file on disk or an inline env value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    File(PathBuf),
    Inline(String),
}

impl SecretSource {
    fn describe(&self) -> String {
        match self {
            SecretSource::File(path) => path.display().to_string(),
            SecretSource::Inline(_) => "inline JSON".into(),
        }
    }

    fn read(&self) -> Result<Option<String>, ParabotError> {
        match self {
            SecretSource::Inline(raw) if raw.trim().is_empty() => Ok(None),
            SecretSource::Inline(raw) => Ok(Some(raw.clone())),
            SecretSource::File(path) if !path.exists() => Ok(None),
            SecretSource::File(path) => std::fs::read_to_string(path).map(Some).map_err(|e| {
                ParabotError::Auth(format!("Failed to read {}: {e}", path.display()))
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// The persisted OAuth token, as written by the authorization flow.
/// Unknown fields are kept so a refreshed token round-trips cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StoredToken {
    /// Tokens that don't record a scope are assumed to carry it.
    fn grants_drive_scope(&self) -> bool {
        match self.scope.as_deref() {
            Some(scope) => scope.split_whitespace().any(|s| s == DRIVE_SCOPE),
            None => true,
        }
    }

    fn usable_access_token(&self, now_ms: i64) -> Option<&str> {
        let token = self
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())?;
        match self.expiry_date {
            Some(expiry) if now_ms + EXPIRY_SKEW_MS >= expiry => None,
            _ => Some(token),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
}

pub fn parse_client_secret(raw: &str) -> Result<ClientSecret, ParabotError> {
    let parsed: ClientSecretFile = serde_json::from_str(raw)
        .map_err(|e| ParabotError::Auth(format!("Failed to parse client secret: {e}")))?;
    parsed
        .installed
        .or(parsed.web)
        .ok_or_else(|| {
            ParabotError::Auth("client secret has no 'installed' or 'web' section".into())
        })
}

pub fn parse_token(raw: &str) -> Result<StoredToken, ParabotError> {
    let token: StoredToken = serde_json::from_str(raw)
        .map_err(|e| ParabotError::Auth(format!("Failed to parse token: {e}")))?;
    let has_access = token
        .access_token
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());
    let has_refresh = token
        .refresh_token
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());
    if !has_access && !has_refresh {
        return Err(ParabotError::Auth(
            "token has neither access_token nor refresh_token".into(),
        ));
    }
    Ok(token)
}

/// Renewable access credential for the remote store.
pub struct GoogleAuth {
    client: ClientSecret,
    token: Mutex<StoredToken>,
    token_file: Option<PathBuf>,
    http: reqwest::Client,
}

impl GoogleAuth {
    /// Missing credentials or token are fatal: the one-time authorization flow must run first.
    pub fn load(credentials: &SecretSource, token: &SecretSource) -> Result<Self, ParabotError> {
        let raw_credentials = credentials.read()?.ok_or_else(|| {
            ParabotError::Auth(format!(
                "Client secret not found ({}). Download OAuth desktop credentials from the Google Cloud console.",
                credentials.describe()
            ))
        })?;
        let raw_token = token.read()?.ok_or_else(|| {
            ParabotError::Auth(format!(
                "Token not found ({}). Run the authorization flow first.",
                token.describe()
            ))
        })?;

        let stored = parse_token(&raw_token)?;
        if !stored.grants_drive_scope() {
            warn!("Token scope does not include {DRIVE_SCOPE}; Drive calls may be rejected");
        }
        let auth = GoogleAuth {
            client: parse_client_secret(&raw_credentials)?,
            token: Mutex::new(stored),
            token_file: match token {
                SecretSource::File(path) => Some(path.clone()),
                SecretSource::Inline(_) => None,
            },
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()?,
        };
        info!("Authenticated with Google Drive");
        Ok(auth)
    }

    pub fn client_id(&self) -> &str {
        &self.client.client_id
    }

    /// A bearer token valid for at least another minute, refreshing when needed.
    pub async fn access_token(&self) -> Result<String, ParabotError> {
        let mut token = self.token.lock().await;
        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Some(access) = token.usable_access_token(now_ms) {
            return Ok(access.to_string());
        }
        self.refresh(&mut token).await?;
        token
            .access_token
            .clone()
            .ok_or_else(|| ParabotError::Auth("refresh returned no access token".into()))
    }

    async fn refresh(&self, token: &mut StoredToken) -> Result<(), ParabotError> {
        let refresh_token = token
            .refresh_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ParabotError::Auth(
                    "access token expired and no refresh_token is available; re-run the authorization flow"
                        .into(),
                )
            })?;

        let resp = self
            .http
            .post(&self.client.token_uri)
            .form(&[
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ParabotError::Auth(format!(
                "token refresh failed: HTTP {status} {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        let refreshed: RefreshResponse = resp.json().await?;
        apply_refresh(token, refreshed, chrono::Utc::now().timestamp_millis());

        if let Some(path) = &self.token_file {
            if let Err(e) = persist_token(path, token) {
                warn!("Refreshed token could not be saved to {}: {e}", path.display());
            }
        }
        info!("Google access token refreshed");
        Ok(())
    }
}

fn apply_refresh(token: &mut StoredToken, refreshed: RefreshResponse, now_ms: i64) {
    token.access_token = Some(refreshed.access_token);
    token.expiry_date = refreshed.expires_in.map(|secs| now_ms + secs * 1000);
    if let Some(refresh) = refreshed.refresh_token.filter(|t| !t.trim().is_empty()) {
        token.refresh_token = Some(refresh);
    }
    if refreshed.scope.is_some() {
        token.scope = refreshed.scope;
    }
    if refreshed.token_type.is_some() {
        token.token_type = refreshed.token_type;
    }
}

fn persist_token(path: &Path, token: &StoredToken) -> Result<(), ParabotError> {
    std::fs::write(path, serde_json::to_string_pretty(token)?)?;
    Ok(())
}
