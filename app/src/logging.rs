use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "QTOOLS_LOG";
pub const DEFAULT_FILTER: &str = "info";

/// Directives from `raw`, or the default filter when unset or invalid.
#[must_use]
pub fn env_filter(raw: Option<&str>) -> EnvFilter {
    raw.map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the stderr subscriber. Stdout is reserved for console output.
pub fn init() {
    let filter = env_filter(std::env::var(LOG_ENV).ok().as_deref());
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if let Err(error) = installed {
        eprintln!("failed to install logger: {error}");
    }
}
