//! Typed request/response contracts with the backend process.
//!
//! The gateway serializes a request, hands it to the shared [`RpcChannel`] and
//! decodes the reply. Framing, request ids and transport live in the channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::connection::Connection;

/// Failure reported by the backend, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("backend rejected request: {0}")]
    Rejected(BackendError),
    #[error("backend channel closed")]
    Closed,
    #[error("backend channel i/o failed: {0}")]
    Io(String),
}

/// One long-lived request/response link to the backend process.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChannelError>;
}

/// A (request-shape, response-shape) pair addressed by method name.
pub trait RpcRequest {
    const METHOD: &'static str;
    type Params: Serialize + Send + Sync;
    type Response: DeserializeOwned;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BackendCommand {
    Query,
    ShowRecords,
    DescribeTable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub cols: Vec<String>,
    #[serde(default)]
    pub results: Vec<Map<String, Value>>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    #[serde(default)]
    pub is_view: bool,
    #[serde(default)]
    pub num_of_columns: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub table_name: String,
    pub column_name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default)]
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TablesAndColumns {
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenConnectionParams {
    pub conn: Connection,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCommandParams {
    pub conn: Connection,
    pub command: BackendCommand,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug)]
pub enum OpenConnection {}

impl RpcRequest for OpenConnection {
    const METHOD: &'static str = "connection/open";
    type Params = OpenConnectionParams;
    type Response = Connection;
}

#[derive(Debug)]
pub enum CloseConnection {}

impl RpcRequest for CloseConnection {
    const METHOD: &'static str = "connection/close";
    type Params = ConnectionParams;
    type Response = ();
}

#[derive(Debug)]
pub enum RunCommand {}

impl RpcRequest for RunCommand {
    const METHOD: &'static str = "connection/run-command";
    type Params = RunCommandParams;
    type Response = Vec<ResultSet>;
}

#[derive(Debug)]
pub enum GetTablesAndColumns {}

impl RpcRequest for GetTablesAndColumns {
    const METHOD: &'static str = "connection/tables-and-columns";
    type Params = ConnectionParams;
    type Response = TablesAndColumns;
}

#[derive(Debug)]
pub enum GetCachedPassword {}

impl RpcRequest for GetCachedPassword {
    const METHOD: &'static str = "connection/cached-password";
    type Params = ConnectionParams;
    type Response = Option<String>;
}

#[derive(Debug)]
pub enum ClientRequestConnections {}

impl RpcRequest for ClientRequestConnections {
    const METHOD: &'static str = "connection/list";
    type Params = ();
    type Response = Vec<Connection>;
}

pub const REFRESH_CONNECTION_DATA: &str = "connection/refresh-data";

/// Payload of the server-initiated tree refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConnectionData {
    pub conn: Connection,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone)]
pub enum ServerPush {
    RefreshConnectionData(RefreshConnectionData),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Backend(BackendError),
    #[error(transparent)]
    Channel(ChannelError),
    #[error("failed to encode `{method}` params: {source}")]
    Encode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode `{method}` payload: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<ChannelError> for GatewayError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Rejected(backend) => Self::Backend(backend),
            other => Self::Channel(other),
        }
    }
}

/// In-order request/response façade over the shared backend channel. No retries.
#[derive(Clone)]
pub struct RpcGateway {
    channel: Arc<dyn RpcChannel>,
}

impl std::fmt::Debug for RpcGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcGateway").finish_non_exhaustive()
    }
}

impl RpcGateway {
    #[must_use]
    pub fn new(channel: Arc<dyn RpcChannel>) -> Self {
        Self { channel }
    }

    pub async fn send<R: RpcRequest>(&self, params: &R::Params) -> Result<R::Response, GatewayError> {
        let params = serde_json::to_value(params).map_err(|source| GatewayError::Encode {
            method: R::METHOD,
            source,
        })?;

        tracing::debug!(method = R::METHOD, "sending backend request");
        let raw = self.channel.request(R::METHOD, params).await.map_err(|error| {
            tracing::debug!(method = R::METHOD, %error, "backend request failed");
            GatewayError::from(error)
        })?;

        serde_json::from_value(raw).map_err(|source| GatewayError::Decode {
            method: R::METHOD.to_string(),
            source,
        })
    }

    pub async fn open_connection(
        &self,
        conn: &Connection,
        password: Option<String>,
    ) -> Result<Connection, GatewayError> {
        self.send::<OpenConnection>(&OpenConnectionParams {
            conn: conn.clone(),
            password,
        })
        .await
    }

    pub async fn close_connection(&self, conn: &Connection) -> Result<(), GatewayError> {
        self.send::<CloseConnection>(&ConnectionParams { conn: conn.clone() })
            .await
    }

    pub async fn run_command(
        &self,
        conn: &Connection,
        command: BackendCommand,
        args: Vec<Value>,
    ) -> Result<Vec<ResultSet>, GatewayError> {
        self.send::<RunCommand>(&RunCommandParams {
            conn: conn.clone(),
            command,
            args,
        })
        .await
    }

    pub async fn tables_and_columns(
        &self,
        conn: &Connection,
    ) -> Result<TablesAndColumns, GatewayError> {
        self.send::<GetTablesAndColumns>(&ConnectionParams { conn: conn.clone() })
            .await
    }

    pub async fn cached_password(&self, conn: &Connection) -> Result<Option<String>, GatewayError> {
        self.send::<GetCachedPassword>(&ConnectionParams { conn: conn.clone() })
            .await
    }

    pub async fn list_connections(&self) -> Result<Vec<Connection>, GatewayError> {
        self.send::<ClientRequestConnections>(&()).await
    }
}

/// Decodes a server-initiated message. Unknown methods yield `Ok(None)`.
pub fn decode_push(method: &str, params: Option<Value>) -> Result<Option<ServerPush>, GatewayError> {
    match method {
        REFRESH_CONNECTION_DATA => {
            let payload = serde_json::from_value(params.unwrap_or(Value::Null)).map_err(
                |source| GatewayError::Decode {
                    method: method.to_string(),
                    source,
                },
            )?;
            Ok(Some(ServerPush::RefreshConnectionData(payload)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{BackendError, ChannelError, RpcChannel};
    use crate::connection::Connection;

    /// Scripted backend: connects succeed unless the connection name is listed as failing.
    #[derive(Debug, Default)]
    pub struct FakeChannel {
        pub calls: Mutex<Vec<(String, Value)>>,
        pub failing_connects: Mutex<Vec<String>>,
        pub connect_delays_ms: Mutex<HashMap<String, u64>>,
        pub cached_passwords: Mutex<HashMap<String, String>>,
        pub command_results: Mutex<Option<Result<Value, String>>>,
        pub tables: Mutex<Value>,
        pub listed: Mutex<Vec<Value>>,
        pub completed_connects: Mutex<Vec<String>>,
        /// Open requests currently in flight, and the most ever seen at once.
        pub opens_in_flight: Mutex<(usize, usize)>,
    }

    impl FakeChannel {
        pub fn fail_connect(&self, name: &str) {
            self.failing_connects
                .lock()
                .expect("lock")
                .push(name.to_string());
        }

        pub fn delay_connect(&self, name: &str, millis: u64) {
            self.connect_delays_ms
                .lock()
                .expect("lock")
                .insert(name.to_string(), millis);
        }

        pub fn cache_password(&self, name: &str, password: &str) {
            self.cached_passwords
                .lock()
                .expect("lock")
                .insert(name.to_string(), password.to_string());
        }

        pub fn set_command_result(&self, result: Result<Value, String>) {
            *self.command_results.lock().expect("lock") = Some(result);
        }

        pub fn methods(&self) -> Vec<String> {
            self.calls
                .lock()
                .expect("lock")
                .iter()
                .map(|(method, _)| method.clone())
                .collect()
        }

        pub fn count(&self, method: &str) -> usize {
            self.methods().iter().filter(|m| *m == method).count()
        }

        pub fn last_params(&self, method: &str) -> Option<Value> {
            self.calls
                .lock()
                .expect("lock")
                .iter()
                .rev()
                .find(|(m, _)| m == method)
                .map(|(_, params)| params.clone())
        }

        pub fn completed_connects(&self) -> Vec<String> {
            self.completed_connects.lock().expect("lock").clone()
        }

        pub fn peak_opens_in_flight(&self) -> usize {
            self.opens_in_flight.lock().expect("lock").1
        }
    }

    #[async_trait]
    impl RpcChannel for FakeChannel {
        async fn request(&self, method: &str, params: Value) -> Result<Value, ChannelError> {
            self.calls
                .lock()
                .expect("lock")
                .push((method.to_string(), params.clone()));
            let name = params["conn"]["name"].as_str().unwrap_or_default().to_string();

            match method {
                "connection/open" => {
                    {
                        let mut in_flight = self.opens_in_flight.lock().expect("lock");
                        in_flight.0 += 1;
                        in_flight.1 = in_flight.1.max(in_flight.0);
                    }
                    let delay = self
                        .connect_delays_ms
                        .lock()
                        .expect("lock")
                        .get(&name)
                        .copied();
                    if let Some(millis) = delay {
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                    }
                    self.opens_in_flight.lock().expect("lock").0 -= 1;
                    if self.failing_connects.lock().expect("lock").contains(&name) {
                        return Err(ChannelError::Rejected(BackendError::new(format!(
                            "could not reach {name}"
                        ))));
                    }
                    self.completed_connects.lock().expect("lock").push(name);
                    let mut conn: Connection =
                        serde_json::from_value(params["conn"].clone()).expect("conn payload");
                    conn.is_connected = true;
                    Ok(serde_json::to_value(conn).expect("conn json"))
                }
                "connection/close" => Ok(Value::Null),
                "connection/cached-password" => Ok(self
                    .cached_passwords
                    .lock()
                    .expect("lock")
                    .get(&name)
                    .map_or(Value::Null, |password| json!(password))),
                "connection/run-command" => {
                    match self.command_results.lock().expect("lock").clone() {
                        Some(Ok(value)) => Ok(value),
                        Some(Err(message)) => {
                            Err(ChannelError::Rejected(BackendError::new(message)))
                        }
                        None => Ok(json!([{
                            "query": params["args"][0],
                            "cols": ["id"],
                            "results": [{"id": 1}],
                        }])),
                    }
                }
                "connection/tables-and-columns" => {
                    let tables = self.tables.lock().expect("lock").clone();
                    if tables.is_null() {
                        Ok(json!({"tables": [], "columns": []}))
                    } else {
                        Ok(tables)
                    }
                }
                "connection/list" => Ok(Value::Array(self.listed.lock().expect("lock").clone())),
                other => Err(ChannelError::Rejected(BackendError::new(format!(
                    "unknown method {other}"
                )))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::testing::FakeChannel;
    use super::{decode_push, BackendCommand, GatewayError, RpcGateway, ServerPush};
    use crate::connection::{Connection, ConnectionConfig};

    fn connection(name: &str) -> Connection {
        Connection::from(ConnectionConfig::new(name, "postgres", "127.0.0.1"))
    }

    #[tokio::test]
    async fn open_connection_returns_backend_record() {
        let channel = Arc::new(FakeChannel::default());
        let gateway = RpcGateway::new(channel.clone());

        let opened = gateway
            .open_connection(&connection("local"), Some("secret".to_string()))
            .await
            .expect("open should succeed");

        assert!(opened.is_connected);
        let params = channel.last_params("connection/open").expect("open params");
        assert_eq!(params["password"], "secret");
        assert_eq!(params["conn"]["name"], "local");
    }

    #[tokio::test]
    async fn rejection_reason_is_passed_through_unchanged() {
        let channel = Arc::new(FakeChannel::default());
        channel.fail_connect("local");
        let gateway = RpcGateway::new(channel.clone());

        let err = gateway
            .open_connection(&connection("local"), None)
            .await
            .expect_err("open should fail");
        assert!(matches!(err, GatewayError::Backend(_)));
        assert_eq!(err.to_string(), "could not reach local");
        assert_eq!(channel.count("connection/open"), 1);
    }

    #[tokio::test]
    async fn run_command_sends_command_name_and_positional_args() {
        let channel = Arc::new(FakeChannel::default());
        let gateway = RpcGateway::new(channel.clone());

        let results = gateway
            .run_command(
                &connection("local"),
                BackendCommand::ShowRecords,
                vec![json!("users"), json!(50)],
            )
            .await
            .expect("command should succeed");

        assert_eq!(results.len(), 1);
        let params = channel
            .last_params("connection/run-command")
            .expect("command params");
        assert_eq!(params["command"], "showRecords");
        assert_eq!(params["args"], json!(["users", 50]));
    }

    #[tokio::test]
    async fn cached_password_null_decodes_to_none() {
        let channel = Arc::new(FakeChannel::default());
        let gateway = RpcGateway::new(channel);
        let cached = gateway
            .cached_password(&connection("local"))
            .await
            .expect("cache lookup should succeed");
        assert_eq!(cached, None);
    }

    #[tokio::test]
    async fn close_connection_accepts_null_reply() {
        let channel = Arc::new(FakeChannel::default());
        let gateway = RpcGateway::new(channel.clone());
        gateway
            .close_connection(&connection("local"))
            .await
            .expect("close should succeed");
        assert_eq!(channel.methods(), vec!["connection/close"]);
    }

    #[test]
    fn decodes_refresh_push_and_ignores_unknown_methods() {
        let mut conn = connection("local");
        conn.is_connected = true;
        let params = json!({
            "conn": conn,
            "tables": [{"name": "users"}],
            "columns": [{"tableName": "users", "columnName": "id", "type": "int"}],
        });

        let push = decode_push("connection/refresh-data", Some(params))
            .expect("push should decode")
            .expect("push should be recognised");
        let ServerPush::RefreshConnectionData(data) = push;
        assert!(data.conn.is_connected);
        assert_eq!(data.tables[0].name, "users");
        assert_eq!(data.columns[0].data_type, "int");

        assert!(decode_push("window/log", None)
            .expect("unknown push is not an error")
            .is_none());
    }
}
