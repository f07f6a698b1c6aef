use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::FlashBackend;
use crate::errors::{BackendError, FlashMap};

/// In-process hash-map backend.
///
/// Behaves like the Redis adapter with `atomic_reads = false`: read-and-clear
/// goes through the two-command defaults. Commands can be made to fail once
/// with [`MemoryBackend::fail_next`], and every command issued is recorded.
/// For tests and local runs only: the command log is never truncated.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<HashMap<String, FlashMap>>,
    faults: Mutex<Vec<&'static str>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `op` command (e.g. `"HDEL"`) fail.
    pub async fn fail_next(&self, op: &'static str) {
        self.faults.lock().await.push(op);
    }

    /// Commands issued so far, in order.
    pub async fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().await.clone()
    }

    /// Number of session keys currently holding at least one field.
    pub async fn key_count(&self) -> usize {
        self.inner.read().await.len()
    }

    async fn enter(&self, op: &'static str) -> Result<(), BackendError> {
        self.calls.lock().await.push(op);
        let mut faults = self.faults.lock().await;
        if let Some(pos) = faults.iter().position(|f| *f == op) {
            faults.remove(pos);
            return Err(BackendError::new(op, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl FlashBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        self.enter("HSET").await?;
        let mut map = self.inner.write().await;
        map.entry(key.to_string()).or_default().insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        self.enter("HGET").await?;
        let map = self.inner.read().await;
        Ok(map.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<FlashMap, BackendError> {
        self.enter("HGETALL").await?;
        let map = self.inner.read().await;
        Ok(map.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, BackendError> {
        self.enter("HDEL").await?;
        let mut map = self.inner.write().await;
        let Some(hash) = map.get_mut(key) else { return Ok(false) };
        let existed = hash.remove(field).is_some();
        // Redis drops a hash once its last field is gone
        if hash.is_empty() {
            map.remove(key);
        }
        Ok(existed)
    }

    async fn del(&self, key: &str) -> Result<bool, BackendError> {
        self.enter("DEL").await?;
        let mut map = self.inner.write().await;
        Ok(map.remove(key).is_some())
    }
}
