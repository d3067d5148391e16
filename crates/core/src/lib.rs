pub mod bookmarks;
pub mod bounded_store;
pub mod commands;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod explorer;
pub mod export;
pub mod history;
pub mod host;
pub mod last_run;
pub mod rpc;
pub mod session;
pub mod settings;
pub mod telemetry;

#[must_use]
pub fn domain_name() -> &'static str {
    "qtools-core"
}

#[cfg(test)]
mod tests {
    use super::domain_name;

    #[test]
    fn domain_name_is_stable() {
        assert_eq!(domain_name(), "qtools-core");
    }
}
