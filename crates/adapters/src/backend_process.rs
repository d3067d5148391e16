//! Newline-delimited JSON-RPC 2.0 channel to the backend process.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use qtools_core::rpc::{BackendError, ChannelError, RpcChannel};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

const NOTIFICATION_BUFFER: usize = 64;

/// A server-initiated message without an id.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

type PendingRequest = oneshot::Sender<Result<Value, ChannelError>>;
/// `None` once the reader has hit end of input; no response can arrive after that.
type PendingRequests = Option<HashMap<u64, PendingRequest>>;
type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct StdioChannel {
    writer: Mutex<ChannelWriter>,
    pending: Arc<Mutex<PendingRequests>>,
    next_id: AtomicU64,
    reader_task: JoinHandle<()>,
}

impl std::fmt::Debug for StdioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioChannel")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StdioChannel {
    /// Starts reading `reader` in the background. Responses resolve pending
    /// requests by id; notifications go to the returned receiver.
    pub fn connect<R, W>(reader: R, writer: W) -> (Self, mpsc::Receiver<Notification>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Arc<Mutex<PendingRequests>> = Arc::new(Mutex::new(Some(HashMap::new())));
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&pending), notification_tx));

        (
            Self {
                writer: Mutex::new(Box::new(writer)),
                pending,
                next_id: AtomicU64::new(1),
                reader_task,
            },
            notification_rx,
        )
    }

    async fn write_line(&self, message: &Value) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(message)
            .map_err(|error| ChannelError::Io(format!("failed to encode request: {error}")))?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|error| ChannelError::Io(error.to_string()))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|error| ChannelError::Io(error.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|error| ChannelError::Io(error.to_string()))
    }
}

impl Drop for StdioChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[async_trait]
impl RpcChannel for StdioChannel {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(pending) => {
                pending.insert(id, tx);
            }
            None => return Err(ChannelError::Closed),
        }

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::trace!(id, method, "sending backend request");
        if let Err(error) = self.write_line(&message).await {
            if let Some(pending) = self.pending.lock().await.as_mut() {
                pending.remove(&id);
            }
            return Err(error);
        }

        rx.await.map_err(|_| ChannelError::Closed)?
    }
}

async fn read_loop<R>(
    reader: R,
    pending: Arc<Mutex<PendingRequests>>,
    notifications: mpsc::Sender<Notification>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%error, "backend read failed");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, line = %trimmed, "backend sent invalid JSON");
                continue;
            }
        };

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            let notification = Notification {
                method: method.to_string(),
                params: value.get("params").cloned(),
            };
            if notifications.send(notification).await.is_err() {
                tracing::debug!("notification receiver dropped");
            }
            continue;
        }

        let Some(id) = value.get("id").and_then(Value::as_u64) else {
            tracing::warn!(line = %trimmed, "backend response without numeric id");
            continue;
        };
        let result = match value.get("error") {
            Some(error) if !error.is_null() => {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown backend error");
                Err(ChannelError::Rejected(BackendError::new(message)))
            }
            _ => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };

        let sender = pending
            .lock()
            .await
            .as_mut()
            .and_then(|pending| pending.remove(&id));
        match sender {
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => tracing::warn!(id, "backend response without pending request"),
        }
    }

    tracing::info!("backend channel closed");
    let Some(remaining) = pending.lock().await.take() else {
        return;
    };
    for (_, sender) in remaining {
        let _ = sender.send(Err(ChannelError::Closed));
    }
}

#[derive(Debug, Error)]
pub enum BackendProcessError {
    #[error("failed to start backend `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("backend process has no {0} pipe")]
    MissingPipe(&'static str),
    #[error("failed to stop backend process: {source}")]
    Shutdown {
        #[source]
        source: std::io::Error,
    },
}

/// The spawned backend plus the channel over its stdin/stdout.
#[derive(Debug)]
pub struct BackendProcess {
    child: Child,
    channel: Arc<StdioChannel>,
}

impl BackendProcess {
    pub fn spawn(
        program: &str,
        args: &[String],
    ) -> Result<(Self, mpsc::Receiver<Notification>), BackendProcessError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(BackendProcessError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(BackendProcessError::MissingPipe("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "qtools::backend", "{line}");
                }
            });
        }

        tracing::info!(program, pid = ?child.id(), "backend process started");
        let (channel, notifications) = StdioChannel::connect(stdout, stdin);
        Ok((
            Self {
                child,
                channel: Arc::new(channel),
            },
            notifications,
        ))
    }

    #[must_use]
    pub fn channel(&self) -> Arc<StdioChannel> {
        Arc::clone(&self.channel)
    }

    pub async fn shutdown(mut self) -> Result<(), BackendProcessError> {
        self.child
            .kill()
            .await
            .map_err(|source| BackendProcessError::Shutdown { source })?;
        tracing::info!("backend process stopped");
        Ok(())
    }
}
