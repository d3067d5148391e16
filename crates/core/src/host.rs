//! Surfaces the editor host provides: status indicator, results viewer,
//! explorer tree, notifications, pickers and input prompts.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::connection::Connection;
use crate::explorer::ExplorerTree;
use crate::export::ExportFormat;
use crate::rpc::ResultSet;

pub const DISCONNECTED_LABEL: &str = "Connect";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusIndicator {
    pub text: String,
    pub tooltip: String,
}

impl StatusIndicator {
    #[must_use]
    pub fn active(connection: &Connection) -> Self {
        Self {
            text: connection.name.clone(),
            tooltip: format!("Active connection: {}", connection.target()),
        }
    }

    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            text: DISCONNECTED_LABEL.to_string(),
            tooltip: "Select a connection".to_string(),
        }
    }

    #[must_use]
    pub fn busy(verb: &str, connection: &Connection) -> Self {
        Self {
            text: format!("{verb} {}...", connection.name),
            tooltip: connection.target(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickItem {
    pub label: String,
    pub detail: Option<String>,
}

impl PickItem {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickRequest {
    pub title: String,
    pub items: Vec<PickItem>,
}

/// Returns a message to show inline when the value is not acceptable.
pub type InputValidator = fn(&str) -> Option<&'static str>;

#[derive(Debug, Clone)]
pub struct InputRequest {
    pub prompt: String,
    pub placeholder: Option<String>,
    pub masked: bool,
    pub validate: Option<InputValidator>,
}

impl InputRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            placeholder: None,
            masked: false,
            validate: None,
        }
    }

    #[must_use]
    pub fn masked(mut self) -> Self {
        self.masked = true;
        self
    }

    #[must_use]
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    #[must_use]
    pub fn validated_by(mut self, validate: InputValidator) -> Self {
        self.validate = Some(validate);
        self
    }

    #[must_use]
    pub fn check(&self, value: &str) -> Option<&'static str> {
        self.validate.and_then(|validate| validate(value))
    }
}

#[must_use]
pub fn require_non_empty(value: &str) -> Option<&'static str> {
    value.is_empty().then_some("A value is required")
}

/// The editor side of the session. `pick` and `input` return `None` when dismissed.
#[async_trait]
pub trait Host: Send + Sync {
    fn register_command(&self, qualified_name: &str);
    fn unregister_command(&self, qualified_name: &str);

    fn set_status(&self, status: &StatusIndicator);
    fn hide_status(&self);

    fn show_results(&self, connection: &Connection, results: &[ResultSet]);
    fn current_results(&self) -> Option<Vec<ResultSet>>;
    fn refresh_explorer(&self, tree: &ExplorerTree);

    fn show_info(&self, message: &str);
    fn show_error(&self, message: &str, offer_logs: bool);

    async fn pick(&self, request: PickRequest) -> Option<usize>;
    async fn input(&self, request: InputRequest) -> Option<String>;
    async fn save_location(&self, format: ExportFormat) -> Option<PathBuf>;
}
