use thiserror::Error;

use crate::bookmarks::BookmarksError;
use crate::export::ExportError;
use crate::host::Host;
use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum CommandError {
    /// A picker or prompt was dismissed.
    #[error("cancelled by user")]
    Cancelled,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Bookmarks(#[from] BookmarksError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
}

impl CommandError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed,
    Cancelled,
    Failed,
}

impl InvocationOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Turns a command result into user feedback. Every command goes through here.
pub fn report_outcome(
    host: &dyn Host,
    command: &str,
    result: Result<(), CommandError>,
) -> InvocationOutcome {
    match result {
        Ok(()) => InvocationOutcome::Completed,
        Err(CommandError::Cancelled) => {
            tracing::debug!(command, "command cancelled");
            InvocationOutcome::Cancelled
        }
        Err(CommandError::Validation(message)) => {
            tracing::info!(command, %message, "command rejected input");
            host.show_error(&message, false);
            InvocationOutcome::Failed
        }
        Err(error) => {
            tracing::error!(command, %error, "command failed");
            host.show_error(&error.to_string(), true);
            InvocationOutcome::Failed
        }
    }
}
