// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Config and subscriptions files
//!
//! Both are JSON with camelCase keys and are generated with defaults the
//! first time they are looked for.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::subscribe::{DEFAULT_POLL_INTERVAL, Subscription};

/// Overrides the location of the config file
pub const CONFIG_FILE_ENV: &str = "PODDY_CONFIG_FILE";
/// Overrides the location of the subscriptions file
pub const SUBSCRIPTIONS_FILE_ENV: &str = "PODDY_SUBSCRIPTIONS_FILE";

const CONFIG_DIR: &str = ".config/poddy";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_shownotes: Option<bool>,
}

impl Config {
    /// What gets written when no config file exists yet
    pub fn initial(home: &Path) -> Self {
        Self {
            download_directory: Some(home.join("Podcasts")),
            include_shownotes: Some(true),
        }
    }

    pub fn include_shownotes(&self) -> bool {
        self.include_shownotes.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_shownotes: Option<bool>,
    /// Seconds between checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
}

impl SubscriptionConfig {
    /// Turn the entries into subscriptions
    ///
    /// Entries without `includeShownotes` use `default_shownotes`.
    pub fn to_subscriptions(&self, default_shownotes: bool) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .map(|entry| Subscription {
                url: entry.url.clone(),
                interval: entry
                    .interval
                    .map(poll_interval)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
                include_shownotes: entry.include_shownotes.unwrap_or(default_shownotes),
            })
            .collect()
    }
}

/// Poll interval from a number of seconds, at least one second
pub fn poll_interval(seconds: u64) -> Duration {
    Duration::from_secs(seconds.max(1))
}

pub fn home_dir() -> Result<PathBuf, ConfigError> {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::NoHomeDirectory)
}

/// Location of the config file, honouring `PODDY_CONFIG_FILE`
pub fn config_path(home: &Path) -> PathBuf {
    file_location(CONFIG_FILE_ENV, home, "config.json")
}

/// Location of the subscriptions file, honouring `PODDY_SUBSCRIPTIONS_FILE`
pub fn subscriptions_path(home: &Path) -> PathBuf {
    file_location(SUBSCRIPTIONS_FILE_ENV, home, "subscriptions.json")
}

fn file_location(variable: &str, home: &Path, file_name: &str) -> PathBuf {
    match env::var_os(variable) {
        Some(path) if !path.is_empty() => {
            info!(variable, path = ?path, "Using file location from environment");
            PathBuf::from(path)
        }
        _ => home.join(CONFIG_DIR).join(file_name),
    }
}

/// Read the config file at `path`, generating it if missing
///
/// A freshly generated config also gets its download directory created.
pub fn load_config(path: &Path, home: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!(path = %path.display(), "Configuration file not found, generating one");
        let initial = Config::initial(home);
        write_json(path, &initial)?;
        if let Some(directory) = &initial.download_directory {
            std::fs::create_dir_all(directory).map_err(|e| ConfigError::Io {
                path: directory.clone(),
                source: e,
            })?;
        }
    }
    read_json(path)
}

/// Read the subscriptions file at `path`, generating an empty one if missing
pub fn load_subscriptions(path: &Path) -> Result<SubscriptionConfig, ConfigError> {
    if !path.exists() {
        info!(path = %path.display(), "Subscriptions file not found, generating one");
        write_json(path, &SubscriptionConfig::default())?;
    }
    read_json(path)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let io_error = |e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let content = serde_json::to_string_pretty(value).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    std::fs::write(path, content).map_err(io_error)
}
