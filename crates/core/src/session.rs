//! Connection session coordinator.
//!
//! Owns the single active connection and drives every transition through the
//! backend gateway. Methods take `&mut self`, so transitions on one session
//! are serialized by the borrow checker; hosts that dispatch commands in
//! parallel must put the session behind a mutex.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{json, Value};
use thiserror::Error;

use crate::bookmarks::FileBookmarksStore;
use crate::connection::{Connection, ConnectionId};
use crate::credentials::{CredentialResolver, PasswordOutcome};
use crate::explorer::ExplorerTree;
use crate::history::QueryHistory;
use crate::host::{Host, PickItem, PickRequest, StatusIndicator};
use crate::rpc::{BackendCommand, GatewayError, ResultSet, RpcGateway, ServerPush};
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoActiveConnection,
    Connecting(Connection),
    Active(Connection),
    Disconnecting(Connection),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoConnectReport {
    pub connected: Vec<ConnectionId>,
    pub failed: Vec<(ConnectionId, String)>,
    pub missing: Vec<String>,
    pub active: Option<ConnectionId>,
}

pub struct Session {
    gateway: RpcGateway,
    host: Arc<dyn Host>,
    credentials: CredentialResolver,
    settings: Settings,
    connections: Vec<Connection>,
    active: Option<Connection>,
    history: QueryHistory,
    bookmarks: FileBookmarksStore,
    explorer: ExplorerTree,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.active.as_ref().map(|c| &c.id))
            .field("connections", &self.connections.len())
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub fn new(
        gateway: RpcGateway,
        host: Arc<dyn Host>,
        credentials: CredentialResolver,
        bookmarks: FileBookmarksStore,
    ) -> Self {
        let settings = Settings::default();
        Self {
            gateway,
            host,
            credentials,
            history: QueryHistory::new(settings.history_size),
            settings,
            connections: Vec::new(),
            active: None,
            bookmarks,
            explorer: ExplorerTree::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        match &self.active {
            Some(connection) => SessionState::Active(connection.clone()),
            None => SessionState::NoActiveConnection,
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<&Connection> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    #[must_use]
    pub fn find_connection(&self, name_or_id: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|connection| connection.matches(name_or_id))
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    #[must_use]
    pub fn history(&self) -> &QueryHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut QueryHistory {
        &mut self.history
    }

    #[must_use]
    pub fn bookmarks(&self) -> &FileBookmarksStore {
        &self.bookmarks
    }

    pub fn bookmarks_mut(&mut self) -> &mut FileBookmarksStore {
        &mut self.bookmarks
    }

    #[must_use]
    pub fn explorer(&self) -> &ExplorerTree {
        &self.explorer
    }

    /// Applies new settings (startup or reload) and runs auto-connect.
    pub async fn reload(&mut self, settings: Settings) -> AutoConnectReport {
        tracing::info!(
            connections = settings.connections.len(),
            history_size = settings.history_size,
            "applying settings"
        );
        self.history.resize(settings.history_size);
        self.connections = settings.connections();
        self.settings = settings;
        self.explorer.replace_connections(&self.connections);

        if let Some(active) = self.active.clone() {
            let still_configured = self
                .connections
                .iter()
                .find(|connection| connection.id == active.id)
                .cloned();
            match still_configured {
                Some(mut configured) => {
                    configured.is_connected = active.is_connected;
                    self.active = Some(configured);
                }
                None => {
                    tracing::info!(connection = %active.id, "active connection removed from settings");
                    self.set_active(None);
                }
            }
        }

        self.host.refresh_explorer(&self.explorer);
        self.publish_status(&self.state());
        self.auto_connect().await
    }

    /// Connects every `autoConnectTo` candidate. Secondary candidates run
    /// concurrently and are all awaited; only the first listed one becomes active.
    pub async fn auto_connect(&mut self) -> AutoConnectReport {
        let mut report = AutoConnectReport::default();
        let mut candidates: Vec<Connection> = Vec::new();
        for name in self.settings.auto_connect_to.names() {
            match self.connections.iter().find(|connection| connection.name == name) {
                Some(connection) => candidates.push(connection.clone()),
                None => {
                    tracing::warn!(connection = name, "auto-connect target is not configured");
                    report.missing.push(name.to_string());
                }
            }
        }

        let Some((primary, secondary)) = candidates.split_first() else {
            return report;
        };
        tracing::info!(
            primary = %primary.name,
            secondary = secondary.len(),
            "auto-connecting"
        );

        let outcomes = join_all(secondary.iter().map(|candidate| self.open(candidate))).await;
        for (candidate, outcome) in secondary.iter().zip(outcomes) {
            match outcome {
                Ok(Some(opened)) => {
                    self.explorer.mark_connected(&opened);
                    report.connected.push(opened.id);
                }
                Ok(None) => {
                    tracing::info!(connection = %candidate.id, "auto-connect skipped by user");
                }
                Err(error) => {
                    self.report_auto_connect_failure(candidate, &error);
                    report.failed.push((candidate.id.clone(), error.to_string()));
                }
            }
        }
        self.host.refresh_explorer(&self.explorer);

        match self.connect(primary.clone()).await {
            Ok(Some(opened)) => {
                report.connected.push(opened.id.clone());
                report.active = Some(opened.id);
            }
            Ok(None) => {
                tracing::info!(connection = %primary.id, "auto-connect skipped by user");
            }
            Err(error) => {
                self.report_auto_connect_failure(primary, &error);
                report.failed.push((primary.id.clone(), error.to_string()));
            }
        }

        report
    }

    fn report_auto_connect_failure(&self, connection: &Connection, error: &SessionError) {
        tracing::warn!(connection = %connection.id, %error, "auto-connect failed");
        self.host.show_error(
            &format!("Failed to auto-connect to {}: {error}", connection.name),
            true,
        );
    }

    /// Picks a connection (unless one is given) and makes it active.
    /// `Ok(None)` means the user dismissed the picker or the password prompt.
    pub async fn select_connection(
        &mut self,
        preselected: Option<Connection>,
    ) -> Result<Option<Connection>, SessionError> {
        let chosen = match preselected {
            Some(connection) => Some(connection),
            None => self.pick_connection().await,
        };
        let Some(chosen) = chosen else {
            return Ok(None);
        };
        self.connect(chosen).await
    }

    pub async fn connect(
        &mut self,
        connection: Connection,
    ) -> Result<Option<Connection>, SessionError> {
        let previous = self.state();
        self.publish_status(&SessionState::Connecting(connection.clone()));

        match self.open(&connection).await {
            Ok(Some(opened)) => {
                self.explorer.mark_connected(&opened);
                self.host.refresh_explorer(&self.explorer);
                self.set_active(Some(opened.clone()));
                Ok(Some(opened))
            }
            Ok(None) => {
                self.publish_status(&previous);
                Ok(None)
            }
            Err(error) => {
                tracing::error!(connection = %connection.id, %error, "connect failed");
                self.publish_status(&previous);
                Err(error)
            }
        }
    }

    /// Closes `target`, or the active connection, or one the user picks among open ones.
    /// Returns whether anything was closed.
    pub async fn disconnect(&mut self, target: Option<Connection>) -> Result<bool, SessionError> {
        let target = match target.or_else(|| self.active.clone()) {
            Some(target) => target,
            None => match self.pick_open_connection().await {
                Some(target) => target,
                None => return Ok(false),
            },
        };

        let previous = self.state();
        self.publish_status(&SessionState::Disconnecting(target.clone()));
        if let Err(error) = self.gateway.close_connection(&target).await {
            tracing::error!(connection = %target.id, %error, "disconnect failed");
            self.publish_status(&previous);
            return Err(error.into());
        }

        tracing::info!(connection = %target.id, "connection closed");
        self.explorer.mark_disconnected(&target.id);
        self.host.refresh_explorer(&self.explorer);
        if self.active.as_ref().is_some_and(|active| active.id == target.id) {
            self.set_active(None);
        } else {
            self.publish_status(&previous);
        }
        Ok(true)
    }

    /// The active connection, selecting one first when there is none.
    pub async fn ensure_connection(&mut self) -> Result<Option<Connection>, SessionError> {
        if let Some(active) = &self.active {
            return Ok(Some(active.clone()));
        }
        self.select_connection(None).await
    }

    /// Runs `query` on the active connection. Only successful queries reach history.
    pub async fn run_query(&mut self, query: &str) -> Result<Option<Vec<ResultSet>>, SessionError> {
        let Some(results) = self
            .run_on_active(BackendCommand::Query, vec![json!(query)])
            .await?
        else {
            return Ok(None);
        };

        if results.iter().any(|result| result.error) {
            tracing::warn!("query reported errors; not recorded in history");
        } else {
            self.history.add(query);
        }
        Ok(Some(results))
    }

    pub async fn show_records(&mut self, table: &str) -> Result<Option<Vec<ResultSet>>, SessionError> {
        let limit = self.settings.preview_limit;
        self.run_on_active(BackendCommand::ShowRecords, vec![json!(table), json!(limit)])
            .await
    }

    pub async fn describe_table(
        &mut self,
        table: &str,
    ) -> Result<Option<Vec<ResultSet>>, SessionError> {
        self.run_on_active(BackendCommand::DescribeTable, vec![json!(table)])
            .await
    }

    /// Table names for `connection`, fetched from the backend when not cached yet.
    pub async fn table_names(&mut self, connection: &Connection) -> Result<Vec<String>, SessionError> {
        let cached = self.explorer.table_names(&connection.id);
        if !cached.is_empty() {
            return Ok(cached);
        }

        let schema = self.gateway.tables_and_columns(connection).await?;
        self.explorer.set_schema(&connection.id, schema);
        self.host.refresh_explorer(&self.explorer);
        Ok(self.explorer.table_names(&connection.id))
    }

    /// Re-syncs connected flags with the backend and reloads tables of open connections.
    pub async fn refresh_explorer(&mut self) -> Result<(), SessionError> {
        let listed = self.gateway.list_connections().await?;
        self.explorer.sync_connected(&listed);

        if let Some(active) = self.active.clone() {
            let still_open = listed
                .iter()
                .any(|connection| connection.id == active.id && connection.is_connected);
            if !still_open {
                tracing::info!(connection = %active.id, "backend reports active connection closed");
                self.set_active(None);
            }
        }

        let open: Vec<Connection> = self.explorer.connected().into_iter().cloned().collect();
        for connection in open {
            let schema = self.gateway.tables_and_columns(&connection).await?;
            self.explorer.set_schema(&connection.id, schema);
        }
        self.host.refresh_explorer(&self.explorer);
        Ok(())
    }

    pub fn apply_push(&mut self, push: ServerPush) {
        match push {
            ServerPush::RefreshConnectionData(data) => {
                let pushed = data.conn.clone();
                self.explorer.apply(data);
                self.host.refresh_explorer(&self.explorer);

                if self.active.as_ref().is_some_and(|active| active.id == pushed.id) {
                    if pushed.is_connected {
                        self.set_active(Some(pushed));
                    } else {
                        tracing::info!(connection = %pushed.id, "active connection reported closed");
                        self.set_active(None);
                    }
                }
            }
        }
    }

    async fn run_on_active(
        &mut self,
        command: BackendCommand,
        args: Vec<Value>,
    ) -> Result<Option<Vec<ResultSet>>, SessionError> {
        let Some(connection) = self.ensure_connection().await? else {
            return Ok(None);
        };

        tracing::debug!(connection = %connection.id, ?command, "running backend command");
        let results = self.gateway.run_command(&connection, command, args).await?;
        self.host.show_results(&connection, &results);
        Ok(Some(results))
    }

    async fn open(&self, connection: &Connection) -> Result<Option<Connection>, SessionError> {
        let password = match self
            .credentials
            .resolve(&self.gateway, self.host.as_ref(), connection)
            .await
        {
            PasswordOutcome::Cancelled => return Ok(None),
            PasswordOutcome::NotRequired => None,
            PasswordOutcome::Resolved(password) => Some(password),
        };

        let opened = self.gateway.open_connection(connection, password).await?;
        tracing::info!(
            connection = %opened.id,
            connected = opened.is_connected,
            "connection opened"
        );
        Ok(Some(opened))
    }

    async fn pick_connection(&self) -> Option<Connection> {
        match self.connections.as_slice() {
            [] => {
                self.host.show_info("No connections configured");
                None
            }
            [only] => Some(only.clone()),
            all => {
                let items = all
                    .iter()
                    .map(|connection| {
                        let connected = self
                            .explorer
                            .node(&connection.id)
                            .is_some_and(crate::explorer::ConnectionNode::is_connected);
                        let detail = if connected {
                            format!("{} (connected)", connection.target())
                        } else {
                            connection.target()
                        };
                        PickItem::new(connection.name.clone()).with_detail(detail)
                    })
                    .collect();
                let index = self
                    .host
                    .pick(PickRequest {
                        title: "Select a connection".to_string(),
                        items,
                    })
                    .await?;
                all.get(index).cloned()
            }
        }
    }

    async fn pick_open_connection(&self) -> Option<Connection> {
        let open: Vec<Connection> = self.explorer.connected().into_iter().cloned().collect();
        if open.is_empty() {
            self.host.show_info("No open connections");
            return None;
        }

        let items = open
            .iter()
            .map(|connection| PickItem::new(connection.name.clone()).with_detail(connection.target()))
            .collect();
        let index = self
            .host
            .pick(PickRequest {
                title: "Close a connection".to_string(),
                items,
            })
            .await?;
        open.get(index).cloned()
    }

    /// History is scoped to one active connection and is cleared when it changes.
    fn set_active(&mut self, next: Option<Connection>) {
        let changed = self.active.as_ref().map(|c| &c.id) != next.as_ref().map(|c| &c.id);
        if changed {
            tracing::info!(
                from = ?self.active.as_ref().map(|c| c.id.as_str()),
                to = ?next.as_ref().map(|c| c.id.as_str()),
                "active connection changed"
            );
            self.history.clear();
        }
        self.active = next;
        self.publish_status(&self.state());
    }

    fn publish_status(&self, state: &SessionState) {
        if !self.settings.show_statusbar {
            self.host.hide_status();
            return;
        }

        let indicator = match state {
            SessionState::NoActiveConnection => StatusIndicator::disconnected(),
            SessionState::Connecting(connection) => StatusIndicator::busy("Connecting to", connection),
            SessionState::Active(connection) => StatusIndicator::active(connection),
            SessionState::Disconnecting(connection) => {
                StatusIndicator::busy("Disconnecting", connection)
            }
        };
        self.host.set_status(&indicator);
    }
}
