//! consultdesk - a command-line client for consultant records.
//!
//! Signs in against the identity service, keeps the session across runs,
//! and lists, creates, edits and deletes consultant records.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use consultdesk_core::auth::open_store;
use consultdesk_core::{ApiError, AuthError, Config, Consultant, ConsultantClient, IdentityClient, SessionManager};

// ============================================================================
// Constants
// ============================================================================

const ENV_EMAIL: &str = "CONSULTDESK_EMAIL";
const ENV_PASSWORD: &str = "CONSULTDESK_PASSWORD";
const ENV_LOG_FILE: &str = "CONSULTDESK_LOG_FILE";

const LOG_FILE_PREFIX: &str = "consultdesk.log";

const USAGE: &str = "\
Usage: consultdesk <command> [args]

Commands:
  login [email]            Sign in (password is prompted, or read from CONSULTDESK_PASSWORD)
  logout                   Forget the stored session
  whoami                   Show the signed-in user and token lifetime
  token                    Print a valid access token
  list                     List consultants
  get <id>                 Show one consultant as JSON
  create <fields>          Create a consultant
  update <id> <fields>     Change fields of a consultant
  delete <id>              Delete a consultant

Fields:
  --first-name <s> --last-name <s> --email <s> --phone <s>
  --title <s> --rate <n> --available <true|false>";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; with CONSULTDESK_LOG_FILE=1 they are also written to a
/// daily rolling file in the cache directory. The returned guard flushes the
/// file writer on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_logging = std::env::var(ENV_LOG_FILE).is_ok_and(|v| v == "1");
    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) if file_logging => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        _ => (None, None),
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

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config ({e:#}), using defaults");
            Config::default()
        }
    }
    .with_env_overrides();

    let _guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{USAGE}");
        return Ok(());
    };
    let rest = &args[1..];

    let cache_dir = config.cache_dir()?;
    let store = open_store(config.session_backend, cache_dir);
    let identity = Arc::new(IdentityClient::new(&config)?);
    let session = SessionManager::start(identity.clone(), identity, store).await;
    debug!(authenticated = session.is_authenticated(), "Session ready");

    let result = run(command, rest, &config, &session).await;
    if let Err(e) = &result {
        if let Some(auth) = auth_failure(e) {
            bail!("{}", auth.user_message());
        }
    }
    result
}

/// Find a session failure, whether raised directly or through the API client
fn auth_failure(e: &anyhow::Error) -> Option<&AuthError> {
    e.downcast_ref::<AuthError>().or_else(|| match e.downcast_ref::<ApiError>() {
        Some(ApiError::Session(auth)) => Some(auth),
        _ => None,
    })
}

async fn run(command: &str, args: &[String], config: &Config, session: &SessionManager) -> Result<()> {
    match command {
        "login" => login(args, config, session).await,
        "logout" => {
            session.logout();
            println!("Logged out");
            Ok(())
        }
        "whoami" => {
            match session.session() {
                Some(s) => println!(
                    "{} (access token valid for {} more minutes)",
                    s.identifier,
                    s.minutes_until_expiry()
                ),
                None => println!("Not logged in"),
            }
            Ok(())
        }
        "token" => {
            println!("{}", session.get_valid_token().await?);
            Ok(())
        }
        "list" | "get" | "create" | "update" | "delete" => {
            let client = ConsultantClient::new(config.api_base_url.clone(), session.clone())?;
            records(command, args, &client).await
        }
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("Unknown command: {other}\n\n{USAGE}"),
    }
}

async fn login(args: &[String], config: &Config, session: &SessionManager) -> Result<()> {
    let email = match args.first() {
        Some(email) => email.clone(),
        None => match std::env::var(ENV_EMAIL).ok().or_else(|| config.last_identifier.clone()) {
            Some(email) => email,
            None => prompt("Email: ")?,
        },
    };
    if email.is_empty() {
        bail!("Email required");
    }

    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {email}: "))?,
    };

    session.login(&email, &password).await?;

    // Reload so environment overrides are not written to disk
    let mut stored = Config::load().unwrap_or_default();
    stored.last_identifier = Some(email.clone());
    if let Err(e) = stored.save() {
        warn!(error = %e, "Failed to save config");
    }

    info!("Login complete");
    println!("Logged in as {email}");
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

async fn records(command: &str, args: &[String], client: &ConsultantClient) -> Result<()> {
    match command {
        "list" => {
            let consultants = client.list().await.context("Failed to list consultants")?;
            if consultants.is_empty() {
                println!("No consultants");
            }
            for c in consultants {
                println!(
                    "{:<12} {:<28} {:<32} {:>10} {}",
                    c.id.as_deref().unwrap_or("-"),
                    c.full_name(),
                    c.email,
                    c.rate_display(),
                    if c.available { "available" } else { "" }
                );
            }
        }
        "get" => {
            let id = required_id(args)?;
            let consultant = client.get(id).await.context("Failed to fetch consultant")?;
            println!("{}", serde_json::to_string_pretty(&consultant)?);
        }
        "create" => {
            let mut consultant = Consultant::default();
            apply_fields(&mut consultant, args)?;
            if consultant.first_name.is_empty() || consultant.last_name.is_empty() || consultant.email.is_empty() {
                bail!("--first-name, --last-name and --email are required");
            }
            let created = client.create(&consultant).await.context("Failed to create consultant")?;
            println!("Created {}", created.id.as_deref().unwrap_or("consultant"));
        }
        "update" => {
            let id = required_id(args)?;
            let mut consultant = client.get(id).await.context("Failed to fetch consultant")?;
            apply_fields(&mut consultant, &args[1..])?;
            client.update(id, &consultant).await.context("Failed to update consultant")?;
            println!("Updated {id}");
        }
        "delete" => {
            let id = required_id(args)?;
            client.delete(id).await.context("Failed to delete consultant")?;
            println!("Deleted {id}");
        }
        other => bail!("Unknown command: {other}"),
    }
    Ok(())
}

fn required_id(args: &[String]) -> Result<&str> {
    match args.first() {
        Some(id) if !id.starts_with("--") => Ok(id),
        _ => bail!("A consultant id is required"),
    }
}

/// Apply `--field value` pairs to a record
fn apply_fields(consultant: &mut Consultant, args: &[String]) -> Result<()> {
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .with_context(|| format!("Missing value for {flag}"))?
            .clone();
        match flag.as_str() {
            "--first-name" => consultant.first_name = value,
            "--last-name" => consultant.last_name = value,
            "--email" => consultant.email = value,
            "--phone" => consultant.phone = Some(value).filter(|v| !v.is_empty()),
            "--title" => consultant.title = Some(value).filter(|v| !v.is_empty()),
            "--rate" => {
                consultant.hourly_rate = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().with_context(|| format!("Invalid rate: {value}"))?)
                }
            }
            "--available" => {
                consultant.available = value
                    .parse()
                    .with_context(|| format!("Invalid value for --available: {value}"))?
            }
            other => bail!("Unknown field: {other}"),
        }
    }
    Ok(())
}
