use crate::error::ParabotError;
use parabot_remote::auth::SecretSource;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

fn default_data_dir() -> String {
    ".".into()
}
fn default_db_file_name() -> String {
    "parabot.sqlite".into()
}
fn default_credentials_path() -> String {
    "credentials.json".into()
}
fn default_token_path() -> String {
    "token.json".into()
}
fn default_timezone() -> String {
    "America/Sao_Paulo".into()
}
fn default_notify_cron() -> String {
    "0 0 9 * * *".into()
}
fn default_sync_cron() -> String {
    "0 */30 * * * *".into()
}
fn default_celebration_media() -> Vec<String> {
    vec![
        "https://media.giphy.com/media/l0MYt5jPR6QX5pnqM/giphy.gif".into(),
        "https://media.giphy.com/media/1BXa2alBjrCXC/giphy.gif".into(),
    ]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord_token: String,
    /// Application (client) id. Informational; commands are registered through the gateway.
    #[serde(default)]
    pub application_id: Option<String>,
    /// Pins the remote database object and skips the name search.
    #[serde(default)]
    pub drive_file_id: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_db_file_name")]
    pub db_file_name: String,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
    /// Inline client secret JSON; wins over `credentials_path`.
    #[serde(default)]
    pub credentials_json: Option<String>,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    /// Inline token JSON; wins over `token_path`. Refreshed tokens are kept in memory only.
    #[serde(default)]
    pub token_json: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_notify_cron")]
    pub notify_cron: String,
    #[serde(default = "default_sync_cron")]
    pub sync_cron: String,
    #[serde(default = "default_celebration_media")]
    pub celebration_media: Vec<String>,
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            discord_token: String::new(),
            application_id: None,
            drive_file_id: None,
            data_dir: default_data_dir(),
            db_file_name: default_db_file_name(),
            credentials_path: default_credentials_path(),
            credentials_json: None,
            token_path: default_token_path(),
            token_json: None,
            timezone: default_timezone(),
            notify_cron: default_notify_cron(),
            sync_cron: default_sync_cron(),
            celebration_media: default_celebration_media(),
            log_dir: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.db_file_name)
    }

    pub fn credentials_source(&self) -> SecretSource {
        match &self.credentials_json {
            Some(raw) => SecretSource::Inline(raw.clone()),
            None => SecretSource::File(PathBuf::from(&self.credentials_path)),
        }
    }

    pub fn token_source(&self) -> SecretSource {
        match &self.token_json {
            Some(raw) => SecretSource::Inline(raw.clone()),
            None => SecretSource::File(PathBuf::from(&self.token_path)),
        }
    }

    pub fn tz(&self) -> Result<chrono_tz::Tz, ParabotError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ParabotError::Config(format!("Invalid timezone: {}", self.timezone)))
    }

    pub fn notify_schedule(&self) -> Result<cron::Schedule, ParabotError> {
        parse_cron("notify_cron", &self.notify_cron)
    }

    pub fn sync_schedule(&self) -> Result<cron::Schedule, ParabotError> {
        parse_cron("sync_cron", &self.sync_cron)
    }

    pub fn resolve_config_path() -> Result<Option<PathBuf>, ParabotError> {
        if let Ok(custom) = std::env::var("PARABOT_CONFIG") {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(ParabotError::Config(format!(
                "PARABOT_CONFIG points to non-existent file: {custom}"
            )));
        }

        for candidate in ["./parabot.config.yaml", "./parabot.config.yml"] {
            if std::path::Path::new(candidate).exists() {
                return Ok(Some(PathBuf::from(candidate)));
            }
        }
        Ok(None)
    }

    /// Load everything the bot needs; a Discord token is mandatory.
    pub fn load() -> Result<Self, ParabotError> {
        let config = Self::load_without_bot()?;
        if config.discord_token.trim().is_empty() {
            return Err(ParabotError::Config(
                "discord_token is required (set DISCORD_TOKEN)".into(),
            ));
        }
        Ok(config)
    }

    /// Load for commands that only talk to the remote store.
    pub fn load_without_bot() -> Result<Self, ParabotError> {
        let _ = dotenvy::dotenv();

        let mut config = match Self::resolve_config_path()? {
            Some(path) => {
                let path_str = path.to_string_lossy().to_string();
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    ParabotError::Config(format!("Failed to read {path_str}: {e}"))
                })?;
                serde_yaml::from_str(&content).map_err(|e| {
                    ParabotError::Config(format!("Failed to parse {path_str}: {e}"))
                })?
            }
            None => Config::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.post_deserialize()?;
        Ok(config)
    }

    /// Environment wins over the YAML file for every key that has a variable.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| non_empty(lookup(key));
        if let Some(v) = get("DISCORD_TOKEN") {
            self.discord_token = v;
        }
        if let Some(v) = get("CLIENT_ID") {
            self.application_id = Some(v);
        }
        if let Some(v) = get("DRIVE_FILE_ID") {
            self.drive_file_id = Some(v);
        }
        if let Some(v) = get("PARABOT_DATA_DIR") {
            self.data_dir = v;
        }
        if let Some(v) = get("CREDENTIALS_JSON") {
            self.credentials_json = Some(v);
        }
        if let Some(v) = get("TOKEN_JSON") {
            self.token_json = Some(v);
        }
        if let Some(v) = get("PARABOT_TIMEZONE") {
            self.timezone = v;
        }
        if let Some(v) = get("PARABOT_LOG_DIR") {
            self.log_dir = Some(v);
        }
    }

    /// Apply post-deserialization normalization and validation.
    pub(crate) fn post_deserialize(&mut self) -> Result<(), ParabotError> {
        self.discord_token = self.discord_token.trim().to_string();
        self.application_id = non_empty(self.application_id.take()).map(|v| v.trim().into());
        self.drive_file_id = non_empty(self.drive_file_id.take()).map(|v| v.trim().into());
        self.credentials_json = non_empty(self.credentials_json.take());
        self.token_json = non_empty(self.token_json.take());
        self.log_dir = non_empty(self.log_dir.take());

        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
        }
        if self.db_file_name.trim().is_empty() {
            self.db_file_name = default_db_file_name();
        }
        if self.credentials_path.trim().is_empty() {
            self.credentials_path = default_credentials_path();
        }
        if self.token_path.trim().is_empty() {
            self.token_path = default_token_path();
        }

        self.tz()?;
        self.notify_schedule()?;
        self.sync_schedule()?;

        self.celebration_media.retain(|url| !url.trim().is_empty());
        if self.celebration_media.is_empty() {
            return Err(ParabotError::Config(
                "celebration_media must contain at least one URL".into(),
            ));
        }
        Ok(())
    }
}

fn parse_cron(key: &str, expr: &str) -> Result<cron::Schedule, ParabotError> {
    cron::Schedule::from_str(expr)
        .map_err(|e| ParabotError::Config(format!("Invalid {key} '{expr}': {e}")))
}
