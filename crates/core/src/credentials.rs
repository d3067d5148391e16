use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::connection::{Connection, PasswordSource};
use crate::host::{Host, InputRequest};
use crate::rpc::RpcGateway;

/// Result of resolving a password for one connect attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordOutcome {
    NotRequired,
    Cancelled,
    Resolved(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct VaultError {
    message: String,
}

impl VaultError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Local secret storage consulted for `passwordSource = "keyring"` connections.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn load(&self, connection: &Connection) -> Result<Option<String>, VaultError>;
    async fn store(&self, connection: &Connection, password: &str) -> Result<(), VaultError>;
}

#[must_use]
pub fn validate_password(value: &str) -> Option<&'static str> {
    value.is_empty().then_some("Password cannot be empty")
}

#[derive(Clone, Default)]
pub struct CredentialResolver {
    vault: Option<Arc<dyn CredentialVault>>,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("has_vault", &self.vault.is_some())
            .finish()
    }
}

impl CredentialResolver {
    #[must_use]
    pub fn new(vault: Option<Arc<dyn CredentialVault>>) -> Self {
        Self { vault }
    }

    /// Backend cache first, then the vault for keyring connections, then the user.
    pub async fn resolve(
        &self,
        gateway: &RpcGateway,
        host: &dyn Host,
        connection: &Connection,
    ) -> PasswordOutcome {
        if !connection.requires_password() {
            return PasswordOutcome::NotRequired;
        }

        match gateway.cached_password(connection).await {
            Ok(Some(password)) if !password.is_empty() => {
                tracing::debug!(connection = %connection.id, "using backend cached password");
                return PasswordOutcome::Resolved(password);
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(connection = %connection.id, %error, "cached password lookup failed");
            }
        }

        let vault = self
            .vault
            .as_ref()
            .filter(|_| connection.password_source == PasswordSource::Keyring);

        if let Some(vault) = vault {
            match vault.load(connection).await {
                Ok(Some(password)) if !password.is_empty() => {
                    return PasswordOutcome::Resolved(password);
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(connection = %connection.id, %error, "keyring lookup failed");
                }
            }
        }

        let Some(password) = prompt_for_password(host, connection).await else {
            tracing::debug!(connection = %connection.id, "password prompt dismissed");
            return PasswordOutcome::Cancelled;
        };

        if let Some(vault) = vault {
            if let Err(error) = vault.store(connection, &password).await {
                tracing::warn!(connection = %connection.id, %error, "failed to store password in keyring");
            }
        }

        PasswordOutcome::Resolved(password)
    }
}

async fn prompt_for_password(host: &dyn Host, connection: &Connection) -> Option<String> {
    loop {
        let request = InputRequest::new(format!("{} password", connection.name))
            .with_placeholder(connection.target())
            .masked()
            .validated_by(validate_password);
        let answer = host.input(request).await?;
        if validate_password(&answer).is_none() {
            return Some(answer);
        }
    }
}
