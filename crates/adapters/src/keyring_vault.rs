use async_trait::async_trait;
use qtools_core::connection::Connection;
use qtools_core::credentials::{CredentialVault, VaultError};

pub const DEFAULT_KEYRING_SERVICE: &str = "qtools";

/// OS keyring, one entry per connection id under a shared service name.
#[derive(Debug, Clone)]
pub struct KeyringVault {
    service: String,
}

impl Default for KeyringVault {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE)
    }
}

impl KeyringVault {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

#[async_trait]
impl CredentialVault for KeyringVault {
    async fn load(&self, connection: &Connection) -> Result<Option<String>, VaultError> {
        let service = self.service.clone();
        let account = connection.id.to_string();
        tokio::task::spawn_blocking(move || load_password(&service, &account))
            .await
            .map_err(|error| VaultError::new(format!("keyring task failed: {error}")))?
    }

    async fn store(&self, connection: &Connection, password: &str) -> Result<(), VaultError> {
        if password.is_empty() {
            return Ok(());
        }
        let service = self.service.clone();
        let account = connection.id.to_string();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || store_password(&service, &account, &password))
            .await
            .map_err(|error| VaultError::new(format!("keyring task failed: {error}")))?
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_password(service: &str, account: &str) -> Result<Option<String>, VaultError> {
    let entry = keyring_entry(service, account)?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password).filter(|pw| !pw.is_empty())),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(error) => Err(VaultError::new(format!("keyring read failed: {error}"))),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_password(_service: &str, _account: &str) -> Result<Option<String>, VaultError> {
    Ok(None)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn store_password(service: &str, account: &str, password: &str) -> Result<(), VaultError> {
    keyring_entry(service, account)?
        .set_password(password)
        .map_err(|error| VaultError::new(format!("keyring write failed: {error}")))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn store_password(_service: &str, _account: &str, _password: &str) -> Result<(), VaultError> {
    Err(VaultError::new("no keyring available on this platform"))
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(service: &str, account: &str) -> Result<keyring::Entry, VaultError> {
    keyring::Entry::new(service, account)
        .map_err(|error| VaultError::new(format!("invalid keyring entry: {error}")))
}

#[cfg(test)]
mod tests {
    use super::{KeyringVault, DEFAULT_KEYRING_SERVICE};

    #[test]
    fn default_service_is_namespaced() {
        assert_eq!(KeyringVault::default().service(), DEFAULT_KEYRING_SERVICE);
        assert_eq!(KeyringVault::new("custom").service(), "custom");
    }
}
