//! Agenda configuration.
//!
//! Loaded from `~/.config/agenda/config.toml` (or an explicit path) with
//! `AGENDA_*` environment variables layered on top, e.g.
//! `AGENDA_CALDAV__PASSWORD`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::classify::DEFAULT_VOLUNTEERS_PREFIX;
use crate::error::{AgendaError, AgendaResult};

static DEFAULT_STORE_PATH: &str = "~/.local/share/agenda";

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_volunteers_prefix() -> String {
    DEFAULT_VOLUNTEERS_PREFIX.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgendaConfig {
    pub caldav: CalDavConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Tag prefix that marks a volunteers-required count (`vol:3`)
    #[serde(default = "default_volunteers_prefix")]
    pub volunteers_tag_prefix: String,

    /// Email -> user identifier, used by the static identity resolver
    #[serde(default)]
    pub identities: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalDavConfig {
    /// URL of the calendar collection
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Filesystem,
    #[default]
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Directory for the filesystem store, database file for sqlite
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    /// The configured path with `~` expanded.
    pub fn expanded_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.path.to_string_lossy()).into_owned();
        let path = PathBuf::from(full_path_str);

        match self.backend {
            StoreBackend::Sqlite if path.extension().is_none() => path.join("agenda.db"),
            _ => path,
        }
    }
}

impl AgendaConfig {
    pub fn config_path() -> AgendaResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AgendaError::Config("Could not determine config directory".into()))?
            .join("agenda");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default location.
    pub fn load() -> AgendaResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> AgendaResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("AGENDA").separator("__"))
            .build()
            .map_err(|e| AgendaError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AgendaError::Config(e.to_string()))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> AgendaResult<Self> {
        toml::from_str(content).map_err(|e| AgendaError::Config(e.to_string()))
    }
}
