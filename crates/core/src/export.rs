use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::rpc::ResultSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes `result` to `path` and returns the number of rows exported.
pub fn export_result_set(
    path: &Path,
    result: &ResultSet,
    format: ExportFormat,
) -> Result<usize, ExportError> {
    let content = match format {
        ExportFormat::Csv => render_csv(result),
        ExportFormat::Json => render_json(result)?,
    };

    fs::write(path, content).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(result.results.len())
}

fn render_csv(result: &ResultSet) -> String {
    let mut content = result
        .cols
        .iter()
        .map(|header| csv_escape(header))
        .collect::<Vec<_>>()
        .join(",");
    content.push('\n');

    for row in &result.results {
        let line = result
            .cols
            .iter()
            .map(|column| csv_escape(&cell_text(row.get(column))))
            .collect::<Vec<_>>()
            .join(",");
        content.push_str(&line);
        content.push('\n');
    }
    content
}

fn render_json(result: &ResultSet) -> Result<String, ExportError> {
    let records = result
        .results
        .iter()
        .map(|row| {
            let mut object = Map::with_capacity(result.cols.len());
            for column in &result.cols {
                object.insert(column.clone(), row.get(column).cloned().unwrap_or(Value::Null));
            }
            Value::Object(object)
        })
        .collect::<Vec<_>>();

    Ok(serde_json::to_string_pretty(&records)?)
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
