use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::Host;
use crate::settings::Settings;
use crate::telemetry::unix_timestamp_millis;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastRunRecord {
    #[serde(default)]
    pub last_notified_version: Option<String>,
    #[serde(default)]
    pub notified_at_unix_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum LastRunError {
    #[error("failed to read last-run file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse last-run file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize last-run record: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write last-run file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileLastRunStore {
    path: PathBuf,
    record: LastRunRecord,
}

impl FileLastRunStore {
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, LastRunError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                record: LastRunRecord::default(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| LastRunError::Read {
            path: path.clone(),
            source,
        })?;
        let record = if raw.trim().is_empty() {
            LastRunRecord::default()
        } else {
            toml::from_str(&raw).map_err(|source| LastRunError::Parse {
                path: path.clone(),
                source,
            })?
        };

        Ok(Self { path, record })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn record(&self) -> &LastRunRecord {
        &self.record
    }

    pub fn mark_notified(&mut self, version: &str) {
        self.record.last_notified_version = Some(version.to_string());
        self.record.notified_at_unix_ms = u64::try_from(unix_timestamp_millis()).ok();
    }

    pub fn persist(&self) -> Result<(), LastRunError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| LastRunError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(&self.record)
            .map_err(|source| LastRunError::Serialize { source })?;
        fs::write(&self.path, rendered).map_err(|source| LastRunError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Tells the user about a new version once. Returns whether a message was shown.
pub fn announce_release(
    store: &mut FileLastRunStore,
    settings: &Settings,
    host: &dyn Host,
    version: &str,
) -> Result<bool, LastRunError> {
    if settings.disable_release_notifications
        || store.record().last_notified_version.as_deref() == Some(version)
    {
        return Ok(false);
    }

    host.show_info(&format!("qtools updated to v{version}"));
    store.mark_notified(version);
    store.persist()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{announce_release, FileLastRunStore};
    use crate::host::testing::RecordingHost;
    use crate::settings::Settings;

    #[test]
    fn announces_each_version_once_and_persists_record() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("last_run.toml");
        let host = RecordingHost::default();
        let settings = Settings::default();

        let mut store = FileLastRunStore::load_from_path(&path).expect("failed to load");
        assert!(announce_release(&mut store, &settings, &host, "0.2.0").expect("announce"));
        assert!(!announce_release(&mut store, &settings, &host, "0.2.0").expect("announce"));
        assert_eq!(host.infos().len(), 1);

        let reloaded = FileLastRunStore::load_from_path(&path).expect("failed to reload");
        assert_eq!(
            reloaded.record().last_notified_version.as_deref(),
            Some("0.2.0")
        );
        assert!(reloaded.record().notified_at_unix_ms.is_some());
    }

    #[test]
    fn disabled_notifications_stay_silent() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let host = RecordingHost::default();
        let settings = Settings {
            disable_release_notifications: true,
            ..Settings::default()
        };

        let mut store = FileLastRunStore::load_from_path(temp_dir.path().join("last_run.toml"))
            .expect("failed to load");
        assert!(!announce_release(&mut store, &settings, &host, "0.2.0").expect("announce"));
        assert!(host.infos().is_empty());
        assert!(store.record().last_notified_version.is_none());
    }
}
