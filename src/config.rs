//! Process settings resolved once from the environment.

use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow, ensure};
use log::{debug, info};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::store::{DEFAULT_CHUNK_SIZE, PoolSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// Full connection URL; wins over the discrete fields when present.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: String,
    pub pool: PoolSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub object_store_root: PathBuf,
    pub fetch_timeout: Duration,
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    pub chunk_size: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pool = PoolSettings {
            min_connections: try_load(&lookup, &["DB_POOL_MIN"], 1)?,
            max_connections: try_load(&lookup, &["DB_POOL_MAX"], 10)?,
            acquire_timeout: Duration::from_secs(try_load(
                &lookup,
                &["DB_ACQUIRE_TIMEOUT_SECS"],
                5,
            )?),
        };
        ensure!(
            pool.max_connections >= 1 && pool.min_connections <= pool.max_connections,
            "DB_POOL_MIN ({}) must not exceed DB_POOL_MAX ({}), and DB_POOL_MAX must be at least 1",
            pool.min_connections,
            pool.max_connections
        );

        let database = DatabaseSettings {
            url: first_set(&lookup, &["DATABASE_URL"]).filter(|url| !url.trim().is_empty()),
            host: try_load(&lookup, &["PGHOST", "DB_HOST"], "localhost".to_string())?,
            port: try_load(&lookup, &["PGPORT", "DB_PORT"], 5432)?,
            name: try_load(&lookup, &["PGDATABASE", "DB_NAME"], "mydb".to_string())?,
            user: try_load(&lookup, &["PGUSER", "DB_USER"], "postgres".to_string())?,
            password: first_set(&lookup, &["PGPASSWORD", "DB_PASSWORD"]).unwrap_or_default(),
            ssl_mode: try_load(&lookup, &["PGSSLMODE"], "prefer".to_string())?,
            pool,
        };

        let chunk_size: usize = try_load(&lookup, &["INSERT_CHUNK_SIZE"], DEFAULT_CHUNK_SIZE)?;
        ensure!(chunk_size >= 1, "INSERT_CHUNK_SIZE must be at least 1");

        Ok(Self {
            database,
            object_store_root: try_load(
                &lookup,
                &["OBJECT_STORE_ROOT"],
                PathBuf::from("./object-store"),
            )?,
            fetch_timeout: Duration::from_secs(try_load(&lookup, &["FETCH_TIMEOUT_SECS"], 60)?),
            redis_url: first_set(&lookup, &["REDIS_URL"]).filter(|url| !url.trim().is_empty()),
            cache_ttl: Duration::from_secs(try_load(&lookup, &["CACHE_TTL_SECS"], 300)?),
            chunk_size,
        })
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let db = &self.database;
        if let Some(url) = &db.url {
            return PgConnectOptions::from_str(url).context("Parsing DATABASE_URL");
        }
        let ssl_mode = PgSslMode::from_str(&db.ssl_mode)
            .map_err(|e| anyhow!("Invalid PGSSLMODE '{}': {e}", db.ssl_mode))?;
        Ok(PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .database(&db.name)
            .username(&db.user)
            .password(&db.password)
            .ssl_mode(ssl_mode))
    }
}

fn first_set<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter().find_map(|key| lookup(key))
}

fn try_load<F, T>(lookup: &F, keys: &[&str], default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    for key in keys {
        if let Some(raw) = lookup(key) {
            debug!("{key} set from environment");
            return raw
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid {key} value '{raw}': {e}"));
        }
    }
    info!("{} not set, using default", keys.join("|"));
    Ok(default)
}
