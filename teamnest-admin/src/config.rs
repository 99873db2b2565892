/// Configuration for the admin CLI
///
/// Loaded from environment variables, with a `.env` file picked up when
/// present.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 5)
/// - `DATABASE_MIN_CONNECTIONS`: idle connections kept open (default: 1)
/// - `DATABASE_CONNECT_TIMEOUT_SECONDS`: acquire timeout (default: 30)
/// - `TEAMNEST_DEFAULT_MEMBER_FIELD`: `name`, `full_name` or `email`; how
///   exports render members when the command line does not say (default: name)
/// - `RUST_LOG`: log filter (default: teamnest_admin=info,teamnest_shared=info)

use std::env;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use teamnest_shared::db::pool::DatabaseConfig as PoolConfig;
use teamnest_shared::transfer::MemberField;

/// Complete CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,

    /// Member rendering used by `export` unless overridden
    pub default_member_field: MemberField,
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    pub max_connections: u32,

    pub min_connections: u32,

    pub connect_timeout_seconds: u64,
}

impl DatabaseConfig {
    /// Pool settings for [`create_pool`](teamnest_shared::db::pool::create_pool)
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_seconds: self.connect_timeout_seconds,
            ..PoolConfig::default()
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {:?}", name, value)),
        Err(_) => Ok(default),
    }
}

fn parse_member_field(value: &str) -> anyhow::Result<MemberField> {
    MemberField::from_str(value).ok_or_else(|| {
        anyhow::anyhow!(
            "TEAMNEST_DEFAULT_MEMBER_FIELD must be one of name, full_name, email (got {:?})",
            value
        )
    })
}

impl Config {
    /// Loads configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or any variable has an
    /// unparseable value.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 5u32)?;
        let min_connections = parse_var("DATABASE_MIN_CONNECTIONS", 1u32)?;
        if min_connections > max_connections {
            anyhow::bail!(
                "DATABASE_MIN_CONNECTIONS ({}) exceeds DATABASE_MAX_CONNECTIONS ({})",
                min_connections,
                max_connections
            );
        }

        let default_member_field = match env::var("TEAMNEST_DEFAULT_MEMBER_FIELD") {
            Ok(value) => parse_member_field(&value)?,
            Err(_) => MemberField::default(),
        };

        Ok(Self {
            database: DatabaseConfig {
                url,
                max_connections,
                min_connections,
                connect_timeout_seconds: parse_var("DATABASE_CONNECT_TIMEOUT_SECONDS", 30u64)?,
            },
            default_member_field,
        })
    }
}
