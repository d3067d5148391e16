use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a configured connection, derived from name, server and database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn derive(name: &str, server: &str, database: Option<&str>) -> Self {
        Self(format!("{name}|{server}|{}", database.unwrap_or_default()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    /// Whatever the settings entry carries is sent as-is.
    #[default]
    Settings,
    Prompt,
    Keyring,
}

/// A connection entry as written in `settings.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub name: String,
    pub dialect: String,
    pub server: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_source: PasswordSource,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        dialect: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            dialect: dialect.into(),
            server: server.into(),
            port: None,
            database: None,
            username: None,
            password: None,
            password_source: PasswordSource::Settings,
        }
    }
}

/// Connection descriptor exchanged with the backend.
///
/// `is_connected` is only ever what the backend last reported. Equality compares ids.
#[derive(Debug, Clone, Serialize, Deserialize, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub name: String,
    pub dialect: String,
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default)]
    pub is_connected: bool,
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl From<ConnectionConfig> for Connection {
    fn from(config: ConnectionConfig) -> Self {
        Self {
            id: ConnectionId::derive(&config.name, &config.server, config.database.as_deref()),
            name: config.name,
            dialect: config.dialect,
            server: config.server,
            port: config.port,
            database: config.database,
            username: config.username,
            password: config.password,
            password_source: config.password_source,
            is_connected: false,
        }
    }
}

impl Connection {
    #[must_use]
    pub fn requires_password(&self) -> bool {
        !matches!(self.password_source, PasswordSource::Settings)
    }

    /// `server:port/database`, for pickers and logs.
    #[must_use]
    pub fn target(&self) -> String {
        let mut target = self.server.clone();
        if let Some(port) = self.port {
            target.push_str(&format!(":{port}"));
        }
        if let Some(database) = &self.database {
            target.push('/');
            target.push_str(database);
        }
        target
    }

    #[must_use]
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.name == name_or_id || self.id.as_str() == name_or_id
    }
}
