//! Backend seam for flash storage.
//!
//! A backend is a networked hash map: one key per session, one field per
//! category. Each single command is assumed atomic; nothing is assumed about
//! sequences of commands.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;

use crate::errors::{BackendError, FlashMap};

pub use memory::MemoryBackend;
pub use redis_store::RedisBackend;

/// Result of a read-and-clear. `value` was read; `cleared` reports whether
/// the follow-up delete went through.
#[derive(Debug)]
pub struct Taken<T> {
    pub value: T,
    pub cleared: Result<(), BackendError>,
}

impl<T> Taken<T> {
    pub fn clean(value: T) -> Self {
        Self { value, cleared: Ok(()) }
    }
}

/// Hash-map operations the flash store relies on.
/// Implementations can be Redis-backed or in-process.
#[async_trait]
pub trait FlashBackend: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError>;
    async fn hgetall(&self, key: &str) -> Result<FlashMap, BackendError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, BackendError>;
    async fn del(&self, key: &str) -> Result<bool, BackendError>;

    /// Read one field and delete it.
    ///
    /// The default issues HGET then HDEL. A write landing between the two is
    /// destroyed by the delete.
    async fn take_field(&self, key: &str, field: &str) -> Result<Taken<Option<String>>, BackendError> {
        take_field_sequential(self, key, field).await
    }

    /// Read the whole hash and delete the key.
    ///
    /// Same race as `take_field`: writes between HGETALL and DEL are lost.
    async fn take_all(&self, key: &str) -> Result<Taken<FlashMap>, BackendError> {
        take_all_sequential(self, key).await
    }
}

/// HGET then HDEL, skipping the delete when the field is absent.
pub async fn take_field_sequential<B>(backend: &B, key: &str, field: &str) -> Result<Taken<Option<String>>, BackendError>
where
    B: FlashBackend + ?Sized,
{
    let value = backend.hget(key, field).await?;
    if value.is_none() {
        return Ok(Taken::clean(None));
    }
    let cleared = backend.hdel(key, field).await.map(|_| ());
    Ok(Taken { value, cleared })
}

/// HGETALL then DEL, skipping the delete when the hash is empty.
pub async fn take_all_sequential<B>(backend: &B, key: &str) -> Result<Taken<FlashMap>, BackendError>
where
    B: FlashBackend + ?Sized,
{
    let value = backend.hgetall(key).await?;
    if value.is_empty() {
        return Ok(Taken::clean(value));
    }
    let cleared = backend.del(key).await.map(|_| ());
    Ok(Taken { value, cleared })
}
