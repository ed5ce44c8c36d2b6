//! Platform Console - command line client for the large-model platform.
//!
//! Logs in against the platform backend, keeps the session on disk (or in
//! the OS keychain) and sends authenticated requests to any API path.
//! Expired access credentials are refreshed transparently.

use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use platform_console_core::api::{ApiError, Notifier};
use platform_console_core::{ApiClient, Config, Method, RequestDescriptor};
use serde_json::Value;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name prefix inside the configured log directory
const LOG_FILE_PREFIX: &str = "platform-console.log";

/// Large-model platform console client
#[derive(Parser)]
#[command(name = "platform-console")]
#[command(version, about = "Command line client for the large-model platform console")]
struct Cli {
    /// Override the backend server URL
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the platform-console CLI
#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        username: String,

        /// Read the password from stdin instead of prompting
        #[arg(long)]
        password_stdin: bool,
    },
    /// Log out and clear the stored session
    Logout,
    /// Show the stored session
    Status,
    /// Exchange the refresh credential for a new access credential
    Refresh,
    /// Send an authenticated request to an API path
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Resource path, e.g. /datasets/ or /training-center/models/3/
        path: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,

        /// Query parameter as key=value; may be repeated
        #[arg(long = "query", short = 'q', value_parser = parse_query_pair)]
        query: Vec<(String, String)>,
    },
}

/// Prints user-facing notifications to stderr.
struct CliNotifier;

impl Notifier for CliNotifier {
    fn error(&self, error: &ApiError) {
        match error.status() {
            Some(status) => eprintln!("Error ({}): {}", status, error.user_message()),
            None => eprintln!("Error: {}", error.user_message()),
        }
    }

    fn session_expired(&self) {
        eprintln!("Session expired. Run `platform-console login <username>` to sign in again.");
    }
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!(server = %config.server_url, "Platform console starting");

    let session = config.open_session()?;
    let client = ApiClient::with_notifier(&config, session, Arc::new(CliNotifier))?;

    match cli.command {
        Commands::Login {
            username,
            password_stdin,
        } => login(&client, &username, password_stdin).await,
        Commands::Logout => {
            client.logout().await?;
            println!("Logged out");
            Ok(())
        }
        Commands::Status => {
            status(&client, &config);
            Ok(())
        }
        Commands::Refresh => {
            client
                .force_refresh()
                .await
                .context("Failed to refresh credentials")?;
            println!("Access credential refreshed");
            Ok(())
        }
        Commands::Request {
            method,
            path,
            data,
            query,
        } => request(&client, &method, &path, data.as_deref(), query).await,
    }
}

async fn login(client: &ApiClient, username: &str, password_stdin: bool) -> Result<()> {
    let password = if password_stdin {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read password from stdin")?;
        buf.trim_end_matches(['\r', '\n']).to_string()
    } else {
        rpassword::prompt_password("Password: ").context("Failed to read password")?
    };

    client.login(username, &password).await?;

    let profile = client.session().user_profile();
    let display = profile
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or(username);
    println!("Logged in as {}", display);
    Ok(())
}

fn status(client: &ApiClient, config: &Config) {
    let session = client.session().snapshot();
    println!("Server:        {}{}", config.server_url, config.api_prefix);
    println!("Authenticated: {}", if session.access.is_some() { "yes" } else { "no" });
    println!("Refreshable:   {}", if session.refresh.is_some() { "yes" } else { "no" });
    if let Some(Value::String(name)) = session.user_profile.get("username") {
        println!("User:          {}", name);
    }
}

async fn request(
    client: &ApiClient,
    method: &str,
    path: &str,
    data: Option<&str>,
    query: Vec<(String, String)>,
) -> Result<()> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut descriptor = RequestDescriptor::new(method, path);
    if let Some(raw) = data {
        let body: Value = serde_json::from_str(raw).context("--data must be valid JSON")?;
        descriptor = descriptor.with_body(body);
    }
    descriptor.query = query;

    let response = client.execute(descriptor).await?;
    match response {
        Value::Null => {}
        Value::String(text) => println!("{}", text),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}
