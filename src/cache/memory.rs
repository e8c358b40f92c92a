//! In-memory [`Cache`] that records what was deleted.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Cache;

// ---

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, String>,
    deleted: Vec<String>,
    fail_deletes: bool,
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().await.entries.insert(key.into(), value.into());
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.entries.contains_key(key)
    }

    /// Keys passed to `delete`, in call order.
    pub async fn deleted(&self) -> Vec<String> {
        self.inner.lock().await.deleted.clone()
    }

    pub async fn fail_deletes(&self, fail: bool) {
        self.inner.lock().await.fail_deletes = fail;
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_deletes {
            bail!("delete failure injected for {key}");
        }
        inner.entries.remove(key);
        inner.deleted.push(key.to_string());
        Ok(())
    }
}
