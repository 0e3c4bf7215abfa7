//! Service configuration.
//!
//! Loaded from a TOML file; a missing file yields defaults. Selected values
//! can be supplied through environment variables instead.

use std::path::{Path, PathBuf};

use followup_core::{Error, SchedulerConfig};
use followup_gmail::{DEFAULT_API_BASE, DEFAULT_TOKEN_URL, GmailConfig};
use serde::Deserialize;

/// Default log filter when neither `RUST_LOG` nor `[log] level` is set.
pub const DEFAULT_LOG_FILTER: &str = "followup=info,followup_core=info,followup_gmail=info";

/// Environment variable overriding `mail.client_id`.
pub const ENV_CLIENT_ID: &str = "FOLLOWUP_CLIENT_ID";
/// Environment variable overriding `mail.client_secret`.
pub const ENV_CLIENT_SECRET: &str = "FOLLOWUP_CLIENT_SECRET";
/// Environment variable supplying the refresh token when the file has none.
pub const ENV_REFRESH_TOKEN: &str = "FOLLOWUP_REFRESH_TOKEN";
/// Environment variable overriding `storage.database_path`.
pub const ENV_DATABASE: &str = "FOLLOWUP_DATABASE";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mail account credentials and endpoints.
    pub mail: MailConfig,
    /// Reminder storage.
    pub storage: StorageConfig,
    /// Trigger schedules.
    pub scheduler: SchedulerConfig,
    /// Logging.
    pub log: LogConfig,
}

/// `[mail]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// `OAuth2` client ID.
    pub client_id: String,
    /// `OAuth2` client secret.
    pub client_secret: String,
    /// Refresh token. Usually kept in the keyring instead.
    pub refresh_token: Option<String>,
    /// Gmail API base override.
    pub api_base: Option<String>,
    /// Token endpoint override.
    pub token_url: Option<String>,
}

impl MailConfig {
    /// Builds the Gmail client settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the client ID or secret is missing.
    pub fn gmail_config(&self, refresh_token: String) -> Result<GmailConfig, Error> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config(format!(
                "mail.client_id is not set (or set {ENV_CLIENT_ID})"
            )));
        }
        if self.client_secret.trim().is_empty() {
            return Err(Error::Config(format!(
                "mail.client_secret is not set (or set {ENV_CLIENT_SECRET})"
            )));
        }

        Ok(
            GmailConfig::new(&self.client_id, &self.client_secret, refresh_token)
                .with_api_base(self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE))
                .with_token_url(self.token_url.as_deref().unwrap_or(DEFAULT_TOKEN_URL)),
        )
    }
}

/// Where reminders are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// `SQLite` database file.
    #[default]
    Sqlite,
    /// Process memory; lost on exit.
    Memory,
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend.
    pub backend: StorageBackend,
    /// Database file for the `sqlite` backend.
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    /// The configured database path, or `followup/reminders.db` under the
    /// platform data directory.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("followup")
                .join("reminders.db")
        })
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(client_id) = lookup(ENV_CLIENT_ID) {
            self.mail.client_id = client_id;
        }
        if let Some(client_secret) = lookup(ENV_CLIENT_SECRET) {
            self.mail.client_secret = client_secret;
        }
        if self.mail.refresh_token.is_none() {
            self.mail.refresh_token = lookup(ENV_REFRESH_TOKEN);
        }
        if let Some(path) = lookup(ENV_DATABASE) {
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from the given file.
    File,
    /// The file does not exist; defaults were used.
    Defaults,
}

/// Loads configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist. Nothing is logged
/// here: this runs before logging is initialised, so the caller reports
/// the returned [`ConfigSource`].
///
/// # Errors
///
/// Returns [`Error::Config`] if the file cannot be read or parsed.
pub fn load(path: &Path) -> Result<(Config, ConfigSource), Error> {
    if !path.exists() {
        return Ok((Config::default(), ConfigSource::Defaults));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok((config, ConfigSource::File))
}
