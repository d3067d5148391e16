pub mod backend_process;
pub mod keyring_vault;

#[must_use]
pub fn adapter_name() -> &'static str {
    "qtools-adapters"
}
