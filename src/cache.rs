//! Optional Redis cache for read-side lookups.
//!
//! A disabled cache always misses and never stores. Redis errors are logged
//! and treated the same way, so callers never branch on cache health.

use std::time::Duration;

use log::{debug, info, warn};
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone, Default)]
pub enum Cache {
    #[default]
    Disabled,
    Redis {
        connection: ConnectionManager,
        ttl: Duration,
    },
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cache::Disabled => f.write_str("Cache::Disabled"),
            Cache::Redis { ttl, .. } => write!(f, "Cache::Redis {{ ttl: {ttl:?} }}"),
        }
    }
}

impl Cache {
    /// Connects when a URL is configured; falls back to [`Cache::Disabled`]
    /// if Redis cannot be reached.
    pub async fn connect(redis_url: Option<&str>, ttl: Duration) -> Self {
        let Some(url) = redis_url else {
            debug!("REDIS_URL not set; cache disabled");
            return Cache::Disabled;
        };
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(CONNECT_TIMEOUT);
        let connection = match Client::open(url) {
            Ok(client) => client.get_connection_manager_with_config(config).await,
            Err(err) => Err(err),
        };
        match connection {
            Ok(connection) => {
                info!("Connected to Redis cache (ttl {}s)", ttl.as_secs());
                Cache::Redis { connection, ttl }
            }
            Err(err) => {
                warn!("Redis unavailable, continuing without cache: {err}");
                Cache::Disabled
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Cache::Redis { .. })
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let Cache::Redis { connection, .. } = self else {
            return None;
        };
        let mut connection = connection.clone();
        match connection.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Cache read for '{key}' failed: {err}");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) {
        let Cache::Redis { connection, ttl } = self else {
            return;
        };
        let mut connection = connection.clone();
        if let Err(err) = connection
            .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
        {
            warn!("Cache write for '{key}' failed: {err}");
        }
    }

    pub async fn delete(&self, key: &str) {
        let Cache::Redis { connection, .. } = self else {
            return;
        };
        let mut connection = connection.clone();
        if let Err(err) = connection.del::<_, ()>(key).await {
            warn!("Cache delete for '{key}' failed: {err}");
        }
    }
}
