use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    sources::oauth::Credentials,
    tracker::{Mode, PollSettings, UnknownMode},
};

pub const DEFAULT_PAGE_LIMIT: u32 = 25;
pub const DEFAULT_PAGE_SIZE: u32 = 200;
pub const DEFAULT_MODE: &str = "rt";
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Config as read from file or command line. Every field is optional here,
/// missing ones are filled from the next layer or defaults.
#[derive(Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub access_token: Option<String>,
    pub access_token_secret: Option<String>,
    /// Monitored accounts, screen names or numeric ids
    #[serde(default)]
    pub accounts: Vec<String>,
    pub page_limit: Option<u32>,
    pub page_size: Option<u32>,
    pub mode: Option<String>,
    /// Seconds between poll cycles
    pub interval: Option<u64>,
}

#[derive(Debug)]
pub struct Config {
    pub credentials: Credentials,
    pub accounts: Vec<String>,
    pub poll: PollSettings,
    pub interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required setting {0} (set it in config or environment)")]
    Missing(&'static str),
    #[error("no accounts to monitor")]
    NoAccounts,
    #[error(transparent)]
    Mode(#[from] UnknownMode),
}

impl PartialConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Ok(toml::from_str(&String::from_utf8_lossy(&bytes))?)
    }

    /// Values of `self` take precedence over `other`.
    pub fn or(self, other: PartialConfig) -> PartialConfig {
        PartialConfig {
            consumer_key: self.consumer_key.or(other.consumer_key),
            consumer_secret: self.consumer_secret.or(other.consumer_secret),
            access_token: self.access_token.or(other.access_token),
            access_token_secret: self.access_token_secret.or(other.access_token_secret),
            accounts: if self.accounts.is_empty() {
                other.accounts
            } else {
                self.accounts
            },
            page_limit: self.page_limit.or(other.page_limit),
            page_size: self.page_size.or(other.page_size),
            mode: self.mode.or(other.mode),
            interval: self.interval.or(other.interval),
        }
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value.filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(name))
}

impl TryFrom<PartialConfig> for Config {
    type Error = ConfigError;

    fn try_from(cfg: PartialConfig) -> Result<Self, Self::Error> {
        let credentials = Credentials {
            consumer_key: required(cfg.consumer_key, "TWITTER_CONSUMER_KEY")?,
            consumer_secret: required(cfg.consumer_secret, "TWITTER_CONSUMER_SECRET")?,
            access_token: required(cfg.access_token, "TWITTER_ACCESS_TOKEN")?,
            access_token_secret: required(cfg.access_token_secret, "TWITTER_ACCESS_TOKEN_SECRET")?,
        };

        let accounts: Vec<String> = cfg
            .accounts
            .into_iter()
            .map(|a| a.trim().trim_start_matches('@').to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }

        let mode: Mode = cfg.mode.as_deref().unwrap_or(DEFAULT_MODE).parse()?;

        Ok(Config {
            credentials,
            accounts,
            poll: PollSettings {
                page_limit: cfg.page_limit.unwrap_or(DEFAULT_PAGE_LIMIT),
                page_size: cfg.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
                mode,
            },
            interval: Duration::from_secs(cfg.interval.unwrap_or(DEFAULT_INTERVAL_SECS)),
        })
    }
}
