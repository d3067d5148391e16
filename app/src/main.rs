mod console_host;
mod logging;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use qtools_adapters::backend_process::{BackendProcess, Notification};
use qtools_adapters::keyring_vault::KeyringVault;
use qtools_core::bookmarks::FileBookmarksStore;
use qtools_core::commands::{all_commands, CommandArgs, CommandDispatcher, COMMAND_NAMESPACE};
use qtools_core::credentials::{CredentialResolver, CredentialVault};
use qtools_core::host::Host;
use qtools_core::last_run::{announce_release, FileLastRunStore};
use qtools_core::rpc::{decode_push, RpcGateway};
use qtools_core::session::Session;
use qtools_core::settings::{default_config_dir, FileSettingsStore};
use qtools_core::telemetry::{FileTelemetry, NoopTelemetry, Telemetry};
use serde_json::Value;

use crate::console_host::ConsoleHost;

const DEFAULT_BACKEND: &str = "qtools-backend";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseOutcome {
    Options,
    HelpRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AppOptions {
    config_dir: Option<PathBuf>,
    backend_program: String,
    backend_args: Vec<String>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            config_dir: None,
            backend_program: DEFAULT_BACKEND.to_string(),
            backend_args: Vec::new(),
        }
    }
}

/// One line typed at the console.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleInput {
    Empty,
    Help,
    Quit,
    Reload,
    Command { name: String, args: CommandArgs },
    Invalid(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_args()?;
    logging::init();

    let config_dir = match options.config_dir {
        Some(dir) => dir,
        None => default_config_dir()?,
    };
    tracing::info!(config_dir = %config_dir.display(), "starting qtools");

    let mut settings_store = FileSettingsStore::load_from_path(config_dir.join("settings.toml"))?;
    let bookmarks = FileBookmarksStore::load_from_path(config_dir.join("bookmarks.toml"))?;
    let mut last_run = FileLastRunStore::load_from_path(config_dir.join("last_run.toml"))?;
    let telemetry: Arc<dyn Telemetry> = if settings_store.settings().telemetry {
        Arc::new(FileTelemetry::from_path(config_dir.join("telemetry.ndjson")))
    } else {
        Arc::new(NoopTelemetry)
    };

    let (backend, mut notifications) =
        BackendProcess::spawn(&options.backend_program, &options.backend_args)?;
    let console = Arc::new(ConsoleHost::new(std::env::current_dir()?));
    let host: Arc<dyn Host> = console.clone();
    let vault: Arc<dyn CredentialVault> = Arc::new(KeyringVault::default());

    let mut session = Session::new(
        RpcGateway::new(backend.channel()),
        Arc::clone(&host),
        CredentialResolver::new(Some(vault)),
        bookmarks,
    );
    let dispatcher = CommandDispatcher::new(telemetry);
    let handles = dispatcher.register_all(&host);

    if let Err(error) = announce_release(
        &mut last_run,
        settings_store.settings(),
        host.as_ref(),
        env!("CARGO_PKG_VERSION"),
    ) {
        tracing::warn!(%error, "failed to record release notification");
    }

    let report = session.reload(settings_store.settings().clone()).await;
    tracing::info!(
        connected = report.connected.len(),
        failed = report.failed.len(),
        commands = console.registered_commands().len(),
        "ready"
    );

    loop {
        tokio::select! {
            line = console.read_line() => {
                let Some(line) = line else {
                    break;
                };
                match parse_console_line(&line) {
                    ConsoleInput::Empty => {}
                    ConsoleInput::Help => print_help_commands(),
                    ConsoleInput::Quit => break,
                    ConsoleInput::Reload => match settings_store.reload() {
                        Ok(settings) => {
                            let settings = settings.clone();
                            session.reload(settings).await;
                        }
                        Err(error) => host.show_error(&error.to_string(), true),
                    },
                    ConsoleInput::Command { name, args } => {
                        dispatcher.invoke_named(&mut session, &name, args).await;
                    }
                    ConsoleInput::Invalid(message) => host.show_error(&message, false),
                }
            }
            notification = notifications.recv() => {
                let Some(notification) = notification else {
                    tracing::warn!("backend stopped sending messages");
                    break;
                };
                handle_notification(&mut session, notification);
            }
        }
    }

    drop(handles);
    backend.shutdown().await?;
    Ok(())
}

fn handle_notification(session: &mut Session, notification: Notification) {
    match decode_push(&notification.method, notification.params) {
        Ok(Some(push)) => session.apply_push(push),
        Ok(None) => {
            tracing::debug!(method = %notification.method, "ignoring backend notification");
        }
        Err(error) => tracing::warn!(%error, "invalid backend push"),
    }
}

/// `<command> [json array | text]`. Text after the name becomes a single string argument.
fn parse_console_line(line: &str) -> ConsoleInput {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleInput::Empty;
    }

    let (head, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(head, rest)| (head, rest.trim()));
    match head {
        "help" => return ConsoleInput::Help,
        "quit" | "exit" => return ConsoleInput::Quit,
        "reload" => return ConsoleInput::Reload,
        _ => {}
    }

    let name = if head.starts_with(&format!("{COMMAND_NAMESPACE}.")) {
        head.to_string()
    } else {
        format!("{COMMAND_NAMESPACE}.{head}")
    };

    let args = if rest.is_empty() {
        Vec::new()
    } else if rest.starts_with('[') {
        match serde_json::from_str::<Vec<Value>>(rest) {
            Ok(values) => values,
            Err(error) => return ConsoleInput::Invalid(format!("invalid arguments: {error}")),
        }
    } else {
        vec![Value::String(rest.to_string())]
    };

    ConsoleInput::Command {
        name,
        args: CommandArgs::new(args),
    }
}

fn print_help_commands() {
    for command in all_commands() {
        println!("{:<18} {}", command.name, command.title);
    }
    println!("{:<18} Re-read settings.toml", "reload");
    println!("{:<18} Exit", "quit");
}

fn parse_args() -> io::Result<AppOptions> {
    let mut options = AppOptions::default();
    let outcome = parse_args_from(std::env::args().skip(1), &mut options)?;
    if outcome == ParseOutcome::HelpRequested {
        print_help();
        std::process::exit(0);
    }
    Ok(options)
}

fn parse_args_from(
    args: impl IntoIterator<Item = String>,
    options: &mut AppOptions,
) -> io::Result<ParseOutcome> {
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--config-dir" => {
                options.config_dir = Some(PathBuf::from(next_value(&mut args, "--config-dir")?));
            }
            "--backend" => options.backend_program = next_value(&mut args, "--backend")?,
            "--backend-arg" => options
                .backend_args
                .push(next_value(&mut args, "--backend-arg")?),
            _ => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
        }
    }

    Ok(ParseOutcome::Options)
}

fn print_help() {
    println!("qtools-app");
    println!("Drive database connections through a backend process from the console.");
    println!();
    println!("Options:");
    println!("  --config-dir <dir>    Directory holding settings.toml (default: $QTOOLS_CONFIG_DIR or the platform config dir)");
    println!("  --backend <program>   Backend executable (default: {DEFAULT_BACKEND})");
    println!("  --backend-arg <arg>   Extra backend argument, repeatable");
    println!("  -h, --help            Show this help");
    println!();
    println!("Set QTOOLS_LOG to adjust log output (default: info).");
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}
