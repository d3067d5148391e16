use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub timestamp_unix_ms: u128,
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl TelemetryEvent {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            timestamp_unix_ms: unix_timestamp_millis(),
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[must_use]
pub fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

pub trait Telemetry: Send + Sync {
    /// Best effort; implementations log their own failures.
    fn record(&self, event: TelemetryEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record(&self, event: TelemetryEvent) {
        tracing::trace!(event = %event.name, "telemetry disabled");
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid telemetry path `{0}`")]
    InvalidPath(PathBuf),
    #[error("failed to create telemetry directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize telemetry event: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append telemetry event at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Appends one JSON line per event.
#[derive(Debug, Clone)]
pub struct FileTelemetry {
    path: PathBuf,
}

impl FileTelemetry {
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| TelemetryError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|source| TelemetryError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;

        let rendered = serde_json::to_string(event)
            .map_err(|source| TelemetryError::Serialize { source })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| TelemetryError::Write {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{rendered}").map_err(|source| TelemetryError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl Telemetry for FileTelemetry {
    fn record(&self, event: TelemetryEvent) {
        if let Err(error) = self.append(&event) {
            tracing::warn!(event = %event.name, %error, "failed to record telemetry event");
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{unix_timestamp_millis, FileTelemetry, Telemetry, TelemetryEvent};

    #[test]
    fn appends_json_lines_to_file() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("nested").join("telemetry.ndjson");
        let telemetry = FileTelemetry::from_path(&path);

        let first = TelemetryEvent::new("cmd.selectConnection");
        let second = TelemetryEvent::new("cmd.executeQuery").with("dialect", "postgres");
        telemetry.record(first.clone());
        telemetry.record(second.clone());

        let content = std::fs::read_to_string(path).expect("failed to read telemetry file");
        let mut lines = content.lines();

        let first_loaded: TelemetryEvent =
            serde_json::from_str(lines.next().expect("missing first line"))
                .expect("failed to parse first line");
        assert_eq!(first_loaded, first);

        let second_loaded: TelemetryEvent =
            serde_json::from_str(lines.next().expect("missing second line"))
                .expect("failed to parse second line");
        assert_eq!(second_loaded.properties["dialect"], "postgres");

        assert!(lines.next().is_none(), "unexpected extra lines in telemetry file");
    }

    #[test]
    fn timestamp_uses_unix_epoch_millis() {
        assert!(unix_timestamp_millis() > 0);
    }
}
