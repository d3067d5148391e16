use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::{Connection, ConnectionConfig};
use crate::history::DEFAULT_HISTORY_SIZE;

pub const DEFAULT_PREVIEW_LIMIT: usize = 50;

/// `autoConnectTo` accepts a single name or an ordered list of names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AutoConnectTo {
    One(String),
    Many(Vec<String>),
}

impl Default for AutoConnectTo {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl AutoConnectTo {
    /// Configured names in order, blanks and repeats dropped.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let raw: Vec<&str> = match self {
            Self::One(name) => vec![name.as_str()],
            Self::Many(names) => names.iter().map(String::as_str).collect(),
        };

        let mut names = Vec::with_capacity(raw.len());
        for name in raw.into_iter().map(str::trim) {
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DefaultExportType {
    #[default]
    Prompt,
    Csv,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub auto_connect_to: AutoConnectTo,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_true")]
    pub show_statusbar: bool,
    #[serde(default)]
    pub default_export_type: DefaultExportType,
    #[serde(default)]
    pub disable_release_notifications: bool,
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    #[serde(default)]
    pub telemetry: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connections: Vec::new(),
            auto_connect_to: AutoConnectTo::default(),
            history_size: DEFAULT_HISTORY_SIZE,
            show_statusbar: true,
            default_export_type: DefaultExportType::Prompt,
            disable_release_notifications: false,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            telemetry: false,
        }
    }
}

impl Settings {
    /// Fresh connection records for every configured entry, in configured order.
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .cloned()
            .map(Connection::from)
            .collect()
    }
}

fn default_history_size() -> usize {
    DEFAULT_HISTORY_SIZE
}

fn default_preview_limit() -> usize {
    DEFAULT_PREVIEW_LIMIT
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Read-only view over `settings.toml`; writing settings belongs to the host.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl FileSettingsStore {
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = read_settings(&path)?;
        Ok(Self { path, settings })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Re-reads the file. On failure the previously loaded settings stay in place.
    pub fn reload(&mut self) -> Result<&Settings, SettingsError> {
        self.settings = read_settings(&self.path)?;
        Ok(&self.settings)
    }
}

fn read_settings(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if raw.trim().is_empty() {
        return Ok(Settings::default());
    }

    toml::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn default_config_dir() -> Result<PathBuf, SettingsError> {
    if let Some(custom) = env::var_os("QTOOLS_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("qtools"))
}
