//! Process configuration, read once at startup from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `AUTOGESTION_BIND` | `127.0.0.1:3000` |
//! | `DATABASE_URL` | built from `DB_HOST`, `DB_PORT`, `DB_USERNAME`, `DB_PASSWORD`, `DB_NAME` |
//! | `DB_MAX_CONNECTIONS` | `5` |
//! | `DB_RUN_MIGRATIONS` | `true` |
//! | `AUTOGESTION_APPROVED_STC` | `approved` |
//! | `AUTOGESTION_SESSION_TTL_HOURS` | `48` |

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{bail, Context};
use chrono::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_APPROVED_STC: &str = "approved";
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: SocketAddr,
    pub database_url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
    /// Enrollment `stc` value that counts as an approved prerequisite.
    pub approved_stc: String,
    pub session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = parse_or(&var, "AUTOGESTION_BIND", || {
            SocketAddr::from_str(DEFAULT_BIND).context("default bind address")
        })?;

        let database_url = match var("DATABASE_URL") {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                var("DB_USERNAME").unwrap_or_else(|| "postgres".to_string()),
                var("DB_PASSWORD").unwrap_or_else(|| "testpass".to_string()),
                var("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
                parse_or(&var, "DB_PORT", || Ok(5434u16))?,
                var("DB_NAME").unwrap_or_else(|| "autogestion".to_string()),
            ),
        };

        let max_connections = parse_or(&var, "DB_MAX_CONNECTIONS", || Ok(5u32))?;
        if max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be at least 1");
        }

        let run_migrations = match var("DB_RUN_MIGRATIONS") {
            None => true,
            Some(raw) => parse_flag(&raw)
                .with_context(|| format!("DB_RUN_MIGRATIONS has invalid value `{}`", raw))?,
        };

        let approved_stc = var("AUTOGESTION_APPROVED_STC")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_APPROVED_STC.to_string());

        let ttl_hours = parse_or(&var, "AUTOGESTION_SESSION_TTL_HOURS", || {
            Ok(DEFAULT_SESSION_TTL_HOURS)
        })?;
        if ttl_hours <= 0 {
            bail!("AUTOGESTION_SESSION_TTL_HOURS must be positive");
        }

        Ok(Self {
            bind,
            database_url,
            max_connections,
            run_migrations,
            approved_stc,
            session_ttl: Duration::hours(ttl_hours),
        })
    }
}

fn parse_or<T, V, D>(var: &V, key: &str, default: D) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
    D: FnOnce() -> anyhow::Result<T>,
{
    match var(key) {
        None => default(),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{} has invalid value `{}`: {}", key, raw, err)),
    }
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("expected a boolean"),
    }
}
