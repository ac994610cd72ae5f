//! eventdesk - command-line access to the event portal API.
//!
//! Signs in against the portal's identity backend, keeps the session in the
//! configured credential store, and makes authenticated calls that survive
//! access token expiry.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use eventdesk_core::auth::{
    AuthManager, HttpIdentityBackend, SessionEvent, SessionStatus, SignOutReason, TokenStatus,
};
use eventdesk_core::{ApiClient, Config};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Set to `1` to also write logs to a daily file in the cache directory
const ENV_LOG_FILE: &str = "EVENTDESK_LOG_FILE";

const USAGE: &str = "\
Usage: eventdesk <command>

Commands:
  login [email]   Sign in and store the session
  status          Show the current session
  get <path>      Authenticated GET, prints the JSON body
  logout          End the session";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the log file on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = std::env::var(ENV_LOG_FILE)
        .ok()
        .filter(|v| v == "1")
        .and_then(|_| config.cache_dir().ok())
        .map(|dir| tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "eventdesk.log")));

    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn build_client(config: &Config) -> Result<ApiClient> {
    let backend = HttpIdentityBackend::new(&config.identity_base_url, config.request_timeout())
        .context("Failed to create identity backend client")?;
    let store = config.credential_store.open(config.cache_dir()?);
    let auth = AuthManager::new(Arc::new(backend), store, config.auth_settings());
    ApiClient::new(&config.api_base_url, config.request_timeout(), auth)
        .context("Failed to create API client")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()
        .context("Failed to load configuration")?
        .with_env_overrides();
    let _log_guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let api = build_client(&config)?;
    let timeout = config.request_timeout();
    let events = api.auth().subscribe();

    let result = match command.as_str() {
        "login" => login(&api, config, args.get(1).cloned()).await,
        "status" => {
            status(&api);
            Ok(())
        }
        "get" => match args.get(1) {
            Some(path) => get(&api, path).await,
            None => Err(anyhow::anyhow!("get needs a path\n\n{}", USAGE)),
        },
        "logout" => {
            if api.auth().logout().await {
                eprintln!("Signed out.");
            } else {
                eprintln!("Not signed in.");
            }
            Ok(())
        }
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => Err(anyhow::anyhow!("Unknown command: {}\n\n{}", other, USAGE)),
    };

    drain_session_events(&api, events, timeout).await;
    result
}

async fn login(api: &ApiClient, mut config: Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => {
            eprint!("Email: ");
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    if email.is_empty() {
        anyhow::bail!("An email address is required");
    }

    let password = rpassword::prompt_password(format!("Password for {}: ", email))?;
    api.auth()
        .sign_in(&email, &password)
        .await
        .context("Sign-in failed")?;
    info!("Signed in from CLI");

    config.last_email = Some(email.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    eprintln!("Signed in as {}.", email);
    Ok(())
}

fn status(api: &ApiClient) {
    match api.auth().status() {
        SessionStatus::SignedOut => println!("Not signed in."),
        SessionStatus::Active { expires_at, status } => {
            let state = match status {
                TokenStatus::Valid => "valid",
                TokenStatus::ExpiringSoon => "expiring soon (will refresh on next request)",
                TokenStatus::Expired => "expired (will refresh on next request)",
            };
            match expires_at {
                Some(at) => println!("Signed in. Access token {} - expires {}.", state, at.to_rfc3339()),
                None => println!("Signed in. Access token {}.", state),
            }
        }
    }
}

async fn get(api: &ApiClient, path: &str) -> Result<()> {
    let body: serde_json::Value = api
        .get_json(path)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Let a background refresh started by this run store its result before the
/// process exits, and stand in for the redirect to the sign-in screen.
async fn drain_session_events(
    api: &ApiClient,
    mut events: broadcast::Receiver<SessionEvent>,
    timeout: Duration,
) {
    let mut waiting = api.auth().coordinator().is_refreshing();
    loop {
        let event = if waiting {
            match tokio::time::timeout(timeout, events.recv()).await {
                Ok(Ok(event)) => event,
                _ => break,
            }
        } else {
            match events.try_recv() {
                Ok(event) => event,
                Err(_) => break,
            }
        };

        match event {
            SessionEvent::SignedOut(SignOutReason::RefreshFailed(reason)) => {
                eprintln!(
                    "Your session has ended ({}). Run `eventdesk login` to sign in again.",
                    reason
                );
                waiting = false;
            }
            SessionEvent::Refreshed | SessionEvent::SignedOut(_) => waiting = false,
            SessionEvent::SignedIn => {}
        }
    }
}
