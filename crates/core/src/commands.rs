//! Command table and dispatcher.
//!
//! Every user-facing operation is declared once in [`COMMANDS`] and dispatched
//! through a `match`; nothing is discovered at runtime.

use std::sync::Arc;

use serde_json::Value;

use crate::connection::Connection;
use crate::error::{report_outcome, CommandError, InvocationOutcome};
use crate::export::{export_result_set, ExportFormat};
use crate::host::{require_non_empty, Host, InputRequest, PickItem, PickRequest};
use crate::rpc::ResultSet;
use crate::session::Session;
use crate::settings::DefaultExportType;
use crate::telemetry::{Telemetry, TelemetryEvent};

pub const COMMAND_NAMESPACE: &str = "qtools";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandId {
    SelectConnection,
    CloseConnection,
    ExecuteQuery,
    ExecuteFromInput,
    ShowRecords,
    DescribeTable,
    RunFromHistory,
    ClearHistory,
    BookmarkQuery,
    RunFromBookmarks,
    DeleteBookmark,
    ClearBookmarks,
    RefreshExplorer,
    SaveResults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDefinition {
    pub id: CommandId,
    pub name: &'static str,
    pub title: &'static str,
}

impl CommandDefinition {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{COMMAND_NAMESPACE}.{}", self.name)
    }
}

const COMMANDS: [CommandDefinition; 14] = [
    CommandId::SelectConnection.definition(),
    CommandId::CloseConnection.definition(),
    CommandId::ExecuteQuery.definition(),
    CommandId::ExecuteFromInput.definition(),
    CommandId::ShowRecords.definition(),
    CommandId::DescribeTable.definition(),
    CommandId::RunFromHistory.definition(),
    CommandId::ClearHistory.definition(),
    CommandId::BookmarkQuery.definition(),
    CommandId::RunFromBookmarks.definition(),
    CommandId::DeleteBookmark.definition(),
    CommandId::ClearBookmarks.definition(),
    CommandId::RefreshExplorer.definition(),
    CommandId::SaveResults.definition(),
];

impl CommandId {
    #[must_use]
    pub const fn definition(self) -> CommandDefinition {
        let (name, title) = match self {
            Self::SelectConnection => ("selectConnection", "Select connection"),
            Self::CloseConnection => ("closeConnection", "Close connection"),
            Self::ExecuteQuery => ("executeQuery", "Run query"),
            Self::ExecuteFromInput => ("executeFromInput", "Run query from input"),
            Self::ShowRecords => ("showRecords", "Show table records"),
            Self::DescribeTable => ("describeTable", "Describe table"),
            Self::RunFromHistory => ("runFromHistory", "Run from history"),
            Self::ClearHistory => ("clearHistory", "Clear history"),
            Self::BookmarkQuery => ("bookmarkQuery", "Bookmark query"),
            Self::RunFromBookmarks => ("runFromBookmarks", "Run bookmarked query"),
            Self::DeleteBookmark => ("deleteBookmark", "Delete bookmark"),
            Self::ClearBookmarks => ("clearBookmarks", "Clear bookmarks"),
            Self::RefreshExplorer => ("refreshExplorer", "Refresh explorer"),
            Self::SaveResults => ("saveResults", "Save results"),
        };
        CommandDefinition {
            id: self,
            name,
            title,
        }
    }
}

#[must_use]
pub fn all_commands() -> &'static [CommandDefinition] {
    &COMMANDS
}

/// Looks up `qtools.<name>`.
#[must_use]
pub fn find_command(qualified_name: &str) -> Option<CommandId> {
    let name = qualified_name
        .strip_prefix(COMMAND_NAMESPACE)?
        .strip_prefix('.')?;
    COMMANDS
        .iter()
        .find(|command| command.name == name)
        .map(|command| command.id)
}

/// Keeps one command registered with the host until dropped.
pub struct CommandHandle {
    host: Arc<dyn Host>,
    qualified_name: String,
}

impl CommandHandle {
    #[must_use]
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("qualified_name", &self.qualified_name)
            .finish_non_exhaustive()
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        tracing::debug!(command = %self.qualified_name, "unregistering command");
        self.host.unregister_command(&self.qualified_name);
    }
}

/// Positional command arguments as sent by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs(Vec<Value>);

impl CommandArgs {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The argument at `index`, treating JSON `null` as absent.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index).filter(|value| !value.is_null())
    }

    #[must_use]
    pub fn text(&self, index: usize) -> Option<String> {
        self.get(index)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    }

    #[must_use]
    pub fn number(&self, index: usize) -> Option<usize> {
        match self.get(index)? {
            Value::Number(number) => number.as_u64().and_then(|n| usize::try_from(n).ok()),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<Vec<Value>> for CommandArgs {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Wraps every invocation with a log line, a telemetry event and error translation.
pub struct CommandDispatcher {
    telemetry: Arc<dyn Telemetry>,
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher").finish_non_exhaustive()
    }
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(telemetry: Arc<dyn Telemetry>) -> Self {
        Self { telemetry }
    }

    /// Registers every command; the caller releases them by dropping the handles.
    #[must_use]
    pub fn register_all(&self, host: &Arc<dyn Host>) -> Vec<CommandHandle> {
        COMMANDS
            .iter()
            .map(|command| {
                let qualified_name = command.qualified_name();
                host.register_command(&qualified_name);
                CommandHandle {
                    host: Arc::clone(host),
                    qualified_name,
                }
            })
            .collect()
    }

    pub async fn invoke(
        &self,
        session: &mut Session,
        command: CommandId,
        args: CommandArgs,
    ) -> InvocationOutcome {
        let definition = command.definition();
        tracing::info!(command = definition.name, args = args.len(), "command triggered");

        let result = run_command(session, command, &args).await;
        let host = Arc::clone(session.host());
        let outcome = report_outcome(host.as_ref(), definition.name, result);
        self.telemetry.record(
            TelemetryEvent::new(format!("cmd.{}", definition.name))
                .with("outcome", outcome.as_str()),
        );
        outcome
    }

    pub async fn invoke_named(
        &self,
        session: &mut Session,
        qualified_name: &str,
        args: CommandArgs,
    ) -> InvocationOutcome {
        match find_command(qualified_name) {
            Some(command) => self.invoke(session, command, args).await,
            None => {
                let host = Arc::clone(session.host());
                report_outcome(
                    host.as_ref(),
                    qualified_name,
                    Err(CommandError::UnknownCommand(qualified_name.to_string())),
                )
            }
        }
    }
}

async fn run_command(
    session: &mut Session,
    command: CommandId,
    args: &CommandArgs,
) -> Result<(), CommandError> {
    match command {
        CommandId::SelectConnection => select_connection(session, args).await,
        CommandId::CloseConnection => close_connection(session, args).await,
        CommandId::ExecuteQuery => execute_query(session, args).await,
        CommandId::ExecuteFromInput => execute_from_input(session).await,
        CommandId::ShowRecords => show_records(session, args).await,
        CommandId::DescribeTable => describe_table(session, args).await,
        CommandId::RunFromHistory => run_from_history(session, args).await,
        CommandId::ClearHistory => {
            session.history_mut().clear();
            Ok(())
        }
        CommandId::BookmarkQuery => bookmark_query(session, args).await,
        CommandId::RunFromBookmarks => run_from_bookmarks(session, args).await,
        CommandId::DeleteBookmark => delete_bookmark(session, args).await,
        CommandId::ClearBookmarks => {
            session.bookmarks_mut().reset();
            session.bookmarks().persist()?;
            Ok(())
        }
        CommandId::RefreshExplorer => Ok(session.refresh_explorer().await?),
        CommandId::SaveResults => save_results(session, args).await,
    }
}

async fn select_connection(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let preselected = connection_arg(session, args, 0)?;
    session
        .select_connection(preselected)
        .await?
        .map(drop)
        .ok_or(CommandError::Cancelled)
}

async fn close_connection(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let target = connection_arg(session, args, 0)?;
    if session.disconnect(target).await? {
        Ok(())
    } else {
        Err(CommandError::Cancelled)
    }
}

async fn execute_query(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let Some(query) = args.text(0) else {
        return Err(CommandError::validation("No query to run"));
    };
    if let Some(connection) = connection_arg(session, args, 1)? {
        switch_to(session, connection).await?;
    }
    run_query(session, &query).await
}

async fn execute_from_input(session: &mut Session) -> Result<(), CommandError> {
    let host = Arc::clone(session.host());
    let query = prompt_required(
        host.as_ref(),
        InputRequest::new("Query to run").with_placeholder("SELECT ..."),
    )
    .await?;
    run_query(session, &query).await
}

async fn show_records(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let table = table_arg(session, args).await?;
    session
        .show_records(&table)
        .await?
        .map(drop)
        .ok_or(CommandError::Cancelled)
}

async fn describe_table(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let table = table_arg(session, args).await?;
    session
        .describe_table(&table)
        .await?
        .map(drop)
        .ok_or(CommandError::Cancelled)
}

async fn run_from_history(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let query = match args.text(0) {
        Some(query) => query,
        None => {
            let entries = session.history().all();
            if entries.is_empty() {
                return Err(CommandError::validation("No queries in history"));
            }
            let items = entries.iter().map(|query| PickItem::new(query.clone())).collect();
            let index = pick(session, "Run from history", items).await?;
            entries
                .get(index)
                .cloned()
                .ok_or(CommandError::Cancelled)?
        }
    };
    run_query(session, &query).await
}

async fn bookmark_query(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let host = Arc::clone(session.host());
    let query = match args.text(0) {
        Some(query) => query,
        None => prompt_required(host.as_ref(), InputRequest::new("Query to bookmark")).await?,
    };
    let name = match args.text(1) {
        Some(name) => name,
        None => {
            prompt_required(
                host.as_ref(),
                InputRequest::new("Bookmark name").with_placeholder("monthly report"),
            )
            .await?
        }
    };

    session.bookmarks_mut().set(name.clone(), query);
    session.bookmarks().persist()?;
    tracing::info!(bookmark = %name, "bookmark saved");
    Ok(())
}

async fn run_from_bookmarks(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let name = bookmark_name_arg(session, args, "Run bookmark").await?;
    let Some(query) = session.bookmarks().get(&name).map(str::to_string) else {
        return Err(CommandError::validation(format!("No bookmark named `{name}`")));
    };
    run_query(session, &query).await
}

async fn delete_bookmark(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let name = bookmark_name_arg(session, args, "Delete bookmark").await?;
    if session.bookmarks_mut().delete(&name) {
        session.bookmarks().persist()?;
        tracing::info!(bookmark = %name, "bookmark deleted");
    }
    Ok(())
}

async fn save_results(session: &mut Session, args: &CommandArgs) -> Result<(), CommandError> {
    let host = Arc::clone(session.host());
    let results = host
        .current_results()
        .filter(|results| !results.is_empty())
        .ok_or_else(|| CommandError::validation("No results to save"))?;

    let format = match args.text(0) {
        Some(raw) => ExportFormat::parse(&raw)
            .ok_or_else(|| CommandError::validation(format!("Unsupported export format `{raw}`")))?,
        None => match session.settings().default_export_type {
            DefaultExportType::Csv => ExportFormat::Csv,
            DefaultExportType::Json => ExportFormat::Json,
            DefaultExportType::Prompt => {
                let formats = [ExportFormat::Csv, ExportFormat::Json];
                let items = vec![PickItem::new("CSV"), PickItem::new("JSON")];
                let index = pick(session, "Save results as", items).await?;
                formats.get(index).copied().ok_or(CommandError::Cancelled)?
            }
        },
    };

    let result = select_result_set(session, &results, args.number(1)).await?;
    let path = host
        .save_location(format)
        .await
        .ok_or(CommandError::Cancelled)?;
    let rows = export_result_set(&path, result, format)?;
    tracing::info!(path = %path.display(), rows, "results exported");
    host.show_info(&format!("Saved {rows} rows to {}", path.display()));
    Ok(())
}

async fn select_result_set<'a>(
    session: &Session,
    results: &'a [ResultSet],
    requested: Option<usize>,
) -> Result<&'a ResultSet, CommandError> {
    if let Some(index) = requested {
        return results
            .get(index)
            .ok_or_else(|| CommandError::validation(format!("No result set at index {index}")));
    }
    if let [only] = results {
        return Ok(only);
    }

    let items = results
        .iter()
        .map(|result| {
            PickItem::new(result.query.clone()).with_detail(format!("{} rows", result.results.len()))
        })
        .collect();
    let index = pick(session, "Select a result set", items).await?;
    results.get(index).ok_or(CommandError::Cancelled)
}

/// Makes `connection` active unless it already is.
async fn switch_to(session: &mut Session, connection: Connection) -> Result<(), CommandError> {
    if session.active().is_some_and(|active| *active == connection) {
        return Ok(());
    }
    session
        .select_connection(Some(connection))
        .await?
        .map(drop)
        .ok_or(CommandError::Cancelled)
}

async fn run_query(session: &mut Session, query: &str) -> Result<(), CommandError> {
    session
        .run_query(query)
        .await?
        .map(drop)
        .ok_or(CommandError::Cancelled)
}

/// Accepts a connection object or a configured name/id.
fn connection_arg(
    session: &Session,
    args: &CommandArgs,
    index: usize,
) -> Result<Option<Connection>, CommandError> {
    match args.get(index) {
        None => Ok(None),
        Some(Value::String(name_or_id)) => session
            .find_connection(name_or_id)
            .cloned()
            .map(Some)
            .ok_or_else(|| CommandError::validation(format!("Unknown connection `{name_or_id}`"))),
        Some(value @ Value::Object(_)) => serde_json::from_value::<Connection>(value.clone())
            .map(Some)
            .map_err(|error| CommandError::validation(format!("Invalid connection argument: {error}"))),
        Some(other) => Err(CommandError::validation(format!(
            "Invalid connection argument: {other}"
        ))),
    }
}

/// A table name from the arguments, or one picked from the active connection's tables.
async fn table_arg(session: &mut Session, args: &CommandArgs) -> Result<String, CommandError> {
    if let Some(table) = args.text(0) {
        return Ok(table);
    }

    let connection = session
        .ensure_connection()
        .await?
        .ok_or(CommandError::Cancelled)?;
    let tables = session.table_names(&connection).await?;
    if tables.is_empty() {
        return Err(CommandError::validation(format!(
            "No tables found for {}",
            connection.name
        )));
    }

    let items = tables.iter().map(|table| PickItem::new(table.clone())).collect();
    let index = pick(session, "Select a table", items).await?;
    tables.get(index).cloned().ok_or(CommandError::Cancelled)
}

async fn bookmark_name_arg(
    session: &Session,
    args: &CommandArgs,
    title: &str,
) -> Result<String, CommandError> {
    if let Some(name) = args.text(0) {
        return Ok(name);
    }

    let bookmarks = session.bookmarks().all();
    if bookmarks.is_empty() {
        return Err(CommandError::validation("No bookmarks saved"));
    }
    let items = bookmarks
        .iter()
        .map(|bookmark| PickItem::new(bookmark.name.clone()).with_detail(bookmark.query.clone()))
        .collect();
    let index = pick(session, title, items).await?;
    bookmarks
        .get(index)
        .map(|bookmark| bookmark.name.clone())
        .ok_or(CommandError::Cancelled)
}

async fn pick(session: &Session, title: &str, items: Vec<PickItem>) -> Result<usize, CommandError> {
    session
        .host()
        .pick(PickRequest {
            title: title.to_string(),
            items,
        })
        .await
        .ok_or(CommandError::Cancelled)
}

async fn prompt_required(host: &dyn Host, request: InputRequest) -> Result<String, CommandError> {
    let request = request.validated_by(require_non_empty);
    loop {
        let answer = host
            .input(request.clone())
            .await
            .ok_or(CommandError::Cancelled)?;
        if request.check(&answer).is_none() {
            return Ok(answer);
        }
    }
}
