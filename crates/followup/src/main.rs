//! `followup` - email follow-up reminder service
//!
//! Watches a Gmail mailbox for messages tagged `[remind:1d,3w]` and sends
//! the sender follow-up notices on schedule.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod config;
mod credentials;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use followup_core::{
    FollowUpEngine, MemoryReminderStore, ReminderId, ReminderStore, ReminderUpdate, Scheduler,
    SqliteReminderRepository, directive,
};
use followup_gmail::GmailClient;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Config, ConfigSource, StorageBackend};

#[derive(Parser)]
#[command(
    name = "followup",
    version,
    about = "Follow-up reminders for emails tagged [remind:...]"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "followup.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted.
    Run,
    /// Scan recent messages for new reminders.
    Ingest {
        /// Maximum number of messages to inspect.
        #[arg(long)]
        max: Option<u32>,
    },
    /// Send every reminder that is due now.
    Dispatch,
    /// List all reminders.
    List,
    /// Show one reminder.
    Show {
        /// Reminder ID.
        id: String,
    },
    /// Update a reminder from a JSON object of fields.
    Update {
        /// Reminder ID.
        id: String,
        /// Fields to change, e.g. '{"reminderDates":["2024-03-01"]}'.
        json: String,
    },
    /// Delete a reminder.
    Delete {
        /// Reminder ID.
        id: String,
    },
    /// Send the next notice of a reminder now, ignoring its schedule.
    Send {
        /// Reminder ID.
        id: String,
    },
    /// Show how a subject line's directive would be read.
    Parse {
        /// Subject line.
        #[arg(trailing_var_arg = true, required = true)]
        subject: Vec<String>,
    },
    /// Manage the Gmail refresh token in the system keyring.
    Credentials {
        #[command(subcommand)]
        action: CredentialAction,
    },
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Store a refresh token (read from stdin when omitted).
    Set {
        /// The refresh token.
        token: Option<String>,
    },
    /// Remove the stored refresh token.
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (mut config, source) = match config::load(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            report_failure(&e.into());
            return ExitCode::FAILURE;
        }
    };
    config.apply_env(|name| std::env::var(name).ok());

    // Initialize logging; stdout is reserved for command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if source == ConfigSource::File {
        debug!(path = %cli.config.display(), "Loaded configuration");
    } else {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match execute(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_failure(&e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, config: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Parse { subject } => {
            let subject = subject.join(" ");
            print_json(&serde_json::json!({
                "subject": subject,
                "directive": directive::parse(&subject),
            }))
        }
        Commands::Credentials { action } => manage_credentials(action),
        Commands::Run => {
            let scheduler = Scheduler::new(build_engine(config).await?, config.scheduler.clone());
            scheduler.start().await?;
            info!("Follow-up service running, press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("Shutting down");
            scheduler.stop().await;
            Ok(())
        }
        Commands::Ingest { max } => {
            let scheduler = Scheduler::new(build_engine(config).await?, config.scheduler.clone());
            let created = scheduler.run_ingest_now(max).await?;
            print_json(&serde_json::json!({ "created": created }))
        }
        Commands::Dispatch => {
            let scheduler = Scheduler::new(build_engine(config).await?, config.scheduler.clone());
            let sent = scheduler.run_dispatch_now().await?;
            print_json(&serde_json::json!({ "sent": sent }))
        }
        Commands::List => print_json(&build_engine(config).await?.list_reminders().await?),
        Commands::Show { id } => {
            let engine = build_engine(config).await?;
            print_json(&engine.get_reminder(&ReminderId::from(id)).await?)
        }
        Commands::Update { id, json } => {
            let update: ReminderUpdate =
                serde_json::from_str(&json).context("update must be a JSON object of fields")?;
            let engine = build_engine(config).await?;
            print_json(&engine.update_reminder(&ReminderId::from(id), update).await?)
        }
        Commands::Delete { id } => {
            let engine = build_engine(config).await?;
            engine.delete_reminder(&ReminderId::from(id.as_str())).await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
        Commands::Send { id } => {
            let engine = build_engine(config).await?;
            print_json(&engine.force_send(&ReminderId::from(id)).await?)
        }
    }
}

/// Wires the Gmail client and the configured store into an engine.
///
/// Fails before touching the store if mail credentials are incomplete.
async fn build_engine(config: &Config) -> anyhow::Result<Arc<FollowUpEngine>> {
    let refresh_token = credentials::resolve_refresh_token(&config.mail)?;
    let gmail = GmailClient::new(config.mail.gmail_config(refresh_token)?)
        .map_err(|e| followup_core::Error::Config(e.to_string()))?;

    let store: Arc<dyn ReminderStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryReminderStore::new()),
        StorageBackend::Sqlite => {
            let path = config.storage.database_path();
            Arc::new(open_database(&path).await?)
        }
    };

    Ok(Arc::new(FollowUpEngine::new(Arc::new(gmail), store)))
}

async fn open_database(path: &Path) -> anyhow::Result<SqliteReminderRepository> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let path_str = path
        .to_str()
        .with_context(|| format!("database path is not valid UTF-8: {}", path.display()))?;

    info!(path = %path.display(), "Opening reminder database");
    Ok(SqliteReminderRepository::new(path_str).await?)
}

fn manage_credentials(action: CredentialAction) -> anyhow::Result<()> {
    match action {
        CredentialAction::Set { token } => {
            let token = match token {
                Some(token) => token,
                None => {
                    let mut line = String::new();
                    std::io::stdin()
                        .lock()
                        .read_line(&mut line)
                        .context("failed to read refresh token from stdin")?;
                    line
                }
            };
            let token = token.trim();
            if token.is_empty() {
                anyhow::bail!("refresh token is empty");
            }
            credentials::store_refresh_token(token)?;
            print_json(&serde_json::json!({ "stored": true }))
        }
        CredentialAction::Clear => {
            let removed = credentials::delete_refresh_token()?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Structured failure body: a message plus, where available, details.
fn failure_body(error: &anyhow::Error) -> serde_json::Value {
    let (message, details) = match error.downcast_ref::<followup_core::Error>() {
        Some(followup_core::Error::NotFound(id)) => {
            ("Reminder not found".to_string(), Some(id.to_string()))
        }
        Some(core) => (core.to_string(), core.details()),
        None => (
            error.to_string(),
            error.source().map(ToString::to_string),
        ),
    };

    serde_json::json!({ "error": message, "details": details })
}

fn report_failure(error: &anyhow::Error) {
    eprintln!("{}", failure_body(error));
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ingest_with_max() {
        let cli = Cli::try_parse_from(["followup", "ingest", "--max", "50"]).unwrap();
        assert!(matches!(cli.command, Commands::Ingest { max: Some(50) }));
        assert_eq!(cli.config, PathBuf::from("followup.toml"));
    }

    #[test]
    fn test_parse_subject_joins_words() {
        let cli =
            Cli::try_parse_from(["followup", "-c", "x.toml", "parse", "Q1", "[remind:1d]"]).unwrap();
        let Commands::Parse { subject } = cli.command else {
            panic!("expected parse command");
        };
        assert_eq!(subject.join(" "), "Q1 [remind:1d]");
    }

    #[test]
    fn test_not_found_failure_body() {
        let error = anyhow::Error::from(followup_core::Error::NotFound(ReminderId::from("r9")));
        let body = failure_body(&error);
        assert_eq!(body["error"], "Reminder not found");
        assert_eq!(body["details"], "r9");
    }

    #[test]
    fn test_config_failure_body() {
        let error = anyhow::Error::from(followup_core::Error::Config("bad cron".to_string()));
        let body = failure_body(&error);
        assert_eq!(body["error"], "Configuration error: bad cron");
        assert!(body["details"].is_null());
    }

    #[test]
    fn test_context_failure_body_has_details() {
        let error = serde_json::from_str::<ReminderUpdate>("[]")
            .context("update must be a JSON object of fields")
            .unwrap_err();
        let body = failure_body(&error);
        assert_eq!(body["error"], "update must be a JSON object of fields");
        assert!(body["details"].is_string());
    }

    #[tokio::test]
    async fn test_engine_requires_credentials() {
        let mut config = Config::default();
        config.mail.refresh_token = Some("refresh".to_string());
        config.storage.backend = StorageBackend::Memory;

        let error = build_engine(&config).await.err().unwrap();
        assert!(matches!(
            error.downcast_ref::<followup_core::Error>(),
            Some(followup_core::Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_engine_with_memory_store() {
        let mut config = Config::default();
        config.mail.client_id = "id".to_string();
        config.mail.client_secret = "secret".to_string();
        config.mail.refresh_token = Some("refresh".to_string());
        config.storage.backend = StorageBackend::Memory;

        let engine = build_engine(&config).await.unwrap();
        assert!(engine.list_reminders().await.unwrap().is_empty());
    }
}
