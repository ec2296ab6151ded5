use std::time::Duration;

use anyhow::{Result, Context};
use serde::Deserialize;

use crate::backoff::Backoff;

/// Subject line of the vendor's booking notification emails.
pub const DEFAULT_BOOKING_SUBJECT: &str = "New booking notification";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImapConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub booking_subject: String,
    pub idle_lifetime_secs: u64,
    pub health_check_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub backoff_max_attempt: u32,
    pub command_timeout_secs: u64,
    pub id_node: u16,
}

impl IngestConfig {
    pub fn idle_lifetime(&self) -> Duration {
        Duration::from_secs(self.idle_lifetime_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.backoff_base_secs),
            Duration::from_secs(self.backoff_max_secs),
            self.backoff_max_attempt,
        )
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            booking_subject: DEFAULT_BOOKING_SUBJECT.to_string(),
            idle_lifetime_secs: 25 * 60,
            health_check_secs: 5 * 60,
            backoff_base_secs: 2,
            backoff_max_secs: 5 * 60,
            backoff_max_attempt: 10,
            command_timeout_secs: 3 * 60,
            id_node: 1,
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            log::warn!("{} has an invalid value '{}', using the default", name, value);
            default
        }),
        Err(_) => default,
    }
}

/// Timing values where zero would disable a safeguard (or panic the
/// health tick).
fn nonzero_var_or(name: &str, default: u64) -> Result<u64> {
    let value = parsed_var_or(name, default);
    if value == 0 {
        anyhow::bail!("{} must be greater than zero", name);
    }
    Ok(value)
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} must be set", name))
}

impl Config {
    /// Loads the configuration from environment variables. The database
    /// password is only required when bookings are actually stored.
    pub fn new(dry_run: bool) -> Result<Self> {
        Self::check_required_env_vars(dry_run)?;

        let defaults = IngestConfig::default();

        Ok(Config {
            imap: ImapConfig {
                server: required_var("IMAP_SERVER")?,
                port: parsed_var_or("IMAP_PORT", 993),
                username: required_var("IMAP_USERNAME")?,
                password: required_var("IMAP_PASSWORD")?,
                mailbox: var_or("IMAP_MAILBOX", "INBOX"),
            },
            database: DatabaseConfig {
                host: var_or("DB_HOST", "localhost"),
                port: parsed_var_or("DB_PORT", 5432),
                database: var_or("DB_NAME", "hotel"),
                username: var_or("DB_USERNAME", "postgres"),
                password: var_or("DB_PASSWORD", ""),
            },
            ingest: IngestConfig {
                booking_subject: var_or("BOOKING_SUBJECT", &defaults.booking_subject),
                idle_lifetime_secs: nonzero_var_or("IDLE_LIFETIME_SECS", defaults.idle_lifetime_secs)?,
                health_check_secs: nonzero_var_or("HEALTH_CHECK_SECS", defaults.health_check_secs)?,
                backoff_base_secs: nonzero_var_or("BACKOFF_BASE_SECS", defaults.backoff_base_secs)?,
                backoff_max_secs: nonzero_var_or("BACKOFF_MAX_SECS", defaults.backoff_max_secs)?,
                backoff_max_attempt: parsed_var_or("BACKOFF_MAX_ATTEMPT", defaults.backoff_max_attempt),
                command_timeout_secs: nonzero_var_or("COMMAND_TIMEOUT_SECS", defaults.command_timeout_secs)?,
                id_node: parsed_var_or("ID_NODE", defaults.id_node),
            },
        })
    }

    fn check_required_env_vars(dry_run: bool) -> Result<()> {
        let mut required_vars = vec![
            "IMAP_SERVER",
            "IMAP_USERNAME",
            "IMAP_PASSWORD",
        ];
        if !dry_run {
            required_vars.push("DB_PASSWORD");
        }

        let missing_vars: Vec<&str> = required_vars
            .into_iter()
            .filter(|var| std::env::var(var).is_err())
            .collect();

        if !missing_vars.is_empty() {
            anyhow::bail!(
                "Missing environment variables: {}\n\
                 \n\
                 💡 Solutions:\n\
                 1. Create a .env file with your credentials:\n\
                    IMAP_SERVER=imap.example.com\n\
                    IMAP_USERNAME=reservations@example.com\n\
                    IMAP_PASSWORD=...\n\
                    DB_PASSWORD=...\n\
                 \n\
                 2. Or export the variables manually, or run with --dry-run\n\
                    to skip the database.",
                missing_vars.join(", ")
            );
        }

        Ok(())
    }
}
