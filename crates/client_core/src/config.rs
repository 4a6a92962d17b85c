use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use media_transport::{NoTokenProvider, SharedSecretTokenProvider, TokenProvider};
use serde::Deserialize;
use storage::{
    HostedMessageStore, HostedStoreConfig, MessageStore, SqliteMessageStore,
    DEFAULT_MESSAGES_TABLE,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::chat::DEFAULT_HISTORY_LIMIT;

pub const DEFAULT_CONFIG_FILE: &str = "sneak.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_id: String,
    pub default_channel: String,
    pub display_name: String,
    pub token_secret: Option<String>,
    pub token_ttl_seconds: i64,
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub store_table: String,
    pub database_url: Option<String>,
    pub history_limit: u32,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            default_channel: "test".into(),
            display_name: "guest".into(),
            token_secret: None,
            token_ttl_seconds: 3600,
            store_url: None,
            store_key: None,
            store_table: DEFAULT_MESSAGES_TABLE.into(),
            database_url: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            log_filter: "info".into(),
        }
    }
}

/// Reads `path` (or `sneak.toml` when present) and applies environment overrides.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

pub fn load_settings_with(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings, ConfigError> {
    let mut settings = match path {
        Some(path) => read_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            read_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => Settings::default(),
    };

    let lookup = |keys: &[&str]| env_value(&env, keys);

    if let Some(v) = lookup(&["VITE_AGORA_APP_ID", "SNEAK__APP_ID"]) {
        settings.app_id = v;
    }
    if let Some(v) = lookup(&["SNEAK__DEFAULT_CHANNEL"]) {
        settings.default_channel = v;
    }
    if let Some(v) = lookup(&["SNEAK__DISPLAY_NAME"]) {
        settings.display_name = v;
    }
    if let Some(v) = lookup(&["SNEAK__TOKEN_SECRET"]) {
        settings.token_secret = Some(v);
    }
    if let Some(v) = lookup(&["SNEAK__TOKEN_TTL_SECONDS"]) {
        settings.token_ttl_seconds = parse_number("SNEAK__TOKEN_TTL_SECONDS", v)?;
    }
    if let Some(v) = lookup(&["VITE_SUPABASE_URL", "SNEAK__STORE_URL"]) {
        settings.store_url = Some(v);
    }
    if let Some(v) = lookup(&["VITE_SUPABASE_KEY", "SNEAK__STORE_KEY"]) {
        settings.store_key = Some(v);
    }
    if let Some(v) = lookup(&["SNEAK__STORE_TABLE"]) {
        settings.store_table = v;
    }
    if let Some(v) = lookup(&["DATABASE_URL", "SNEAK__DATABASE_URL"]) {
        settings.database_url = Some(v);
    }
    if let Some(v) = lookup(&["SNEAK__HISTORY_LIMIT"]) {
        settings.history_limit = parse_number("SNEAK__HISTORY_LIMIT", v)?;
    }
    if let Some(v) = lookup(&["SNEAK__LOG"]) {
        settings.log_filter = v;
    }

    Ok(settings)
}

/// Last non-blank value wins, so `SNEAK__*` names override the legacy ones.
fn env_value(env: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| env(key))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .last()
}

fn read_file(path: &Path) -> Result<Settings, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone)]
pub enum StoreBackend {
    Hosted(HostedStoreConfig),
    Sqlite(String),
    Disabled,
}

impl Settings {
    pub fn store_backend(&self) -> Result<StoreBackend, ConfigError> {
        match (non_blank(&self.store_url), non_blank(&self.store_key)) {
            (Some(url), Some(key)) => {
                let config = HostedStoreConfig::new(url, key)
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "store_url",
                        value: url.to_string(),
                    })?
                    .with_table(self.store_table.clone());
                return Ok(StoreBackend::Hosted(config));
            }
            (Some(_), None) | (None, Some(_)) => {
                warn!("config: store_url and store_key must both be set; ignoring hosted store");
            }
            (None, None) => {}
        }
        Ok(match non_blank(&self.database_url) {
            Some(url) => StoreBackend::Sqlite(url.to_string()),
            None => StoreBackend::Disabled,
        })
    }

    pub fn token_provider(&self) -> Arc<dyn TokenProvider> {
        match non_blank(&self.token_secret) {
            Some(secret) => Arc::new(SharedSecretTokenProvider {
                app_id: self.app_id.clone(),
                secret: secret.to_string(),
                ttl_seconds: self.token_ttl_seconds,
            }),
            None => Arc::new(NoTokenProvider),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hosted(config) => write!(f, "hosted {} (table {})", config.base_url, config.table),
            Self::Sqlite(url) => write!(f, "sqlite {url}"),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

impl StoreBackend {
    pub async fn open(self) -> anyhow::Result<Option<Arc<dyn MessageStore>>> {
        let store: Arc<dyn MessageStore> = match self {
            Self::Hosted(config) => {
                info!(url = %config.base_url, table = %config.table, "config: using hosted message store");
                Arc::new(HostedMessageStore::new(config)?)
            }
            Self::Sqlite(url) => {
                info!(%url, "config: using sqlite message store");
                Arc::new(SqliteMessageStore::new(&url).await?)
            }
            Self::Disabled => {
                warn!("config: no message store configured; chat is disabled");
                return Ok(None);
            }
        };
        Ok(Some(store))
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
