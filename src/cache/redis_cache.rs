//! Redis-backed [`Cache`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::Cache;

// ---

/// Shares one multiplexed connection that reconnects on its own.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to `url` (`redis://[:password@]host:port[/db]`).
    pub async fn connect(url: &str) -> Result<Self> {
        // ---
        let client = redis::Client::open(url).context("Invalid REDIS_URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .with_context(|| format!("DEL {key} failed"))?;
        Ok(())
    }
}
