use std::{collections::HashMap, future::Future, time::Duration};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, RedisResult, Script};
use tracing::{info, warn};

use super::{take_all_sequential, take_field_sequential, FlashBackend, Taken};
use crate::errors::{BackendError, FlashMap};

const TAKE_FIELD_LUA: &str = r#"
local v = redis.call('HGET', KEYS[1], ARGV[1])
if v then redis.call('HDEL', KEYS[1], ARGV[1]) end
return v
"#;

const TAKE_ALL_LUA: &str = r#"
local v = redis.call('HGETALL', KEYS[1])
if #v > 0 then redis.call('DEL', KEYS[1]) end
return v
"#;

/// Settings for [`RedisBackend::connect`].
#[derive(Debug, Clone)]
pub struct RedisBackendOptions {
    pub url: String,
    pub timeout: Duration,
    pub ttl: Option<Duration>,
    pub atomic_reads: bool,
}

impl Default for RedisBackendOptions {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".into(),
            timeout: Duration::from_millis(2000),
            ttl: None,
            atomic_reads: true,
        }
    }
}

/// Redis-backed flash storage over a shared multiplexed connection.
///
/// With `atomic_reads` the read-and-clear operations run as Lua scripts, so no
/// write can land between the read and the delete. Every command is bounded
/// by `timeout`.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    timeout: Duration,
    ttl: Option<Duration>,
    atomic_reads: bool,
    take_field_script: Script,
    take_all_script: Script,
}

impl RedisBackend {
    pub async fn connect(opts: RedisBackendOptions) -> Result<Self, BackendError> {
        let client = redis::Client::open(opts.url.as_str()).map_err(|e| BackendError::new("CONNECT", e.to_string()))?;
        let conn = with_timeout("CONNECT", opts.timeout, ConnectionManager::new(client)).await?;
        info!(atomic_reads = opts.atomic_reads, ttl_secs = opts.ttl.map(|t| t.as_secs()), "redis flash backend connected");
        Ok(Self {
            conn,
            timeout: opts.timeout,
            ttl: opts.ttl,
            atomic_reads: opts.atomic_reads,
            take_field_script: Script::new(TAKE_FIELD_LUA),
            take_all_script: Script::new(TAKE_ALL_LUA),
        })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = RedisResult<T>> + Send,
    {
        with_timeout(op, self.timeout, fut).await
    }
}

/// Run one backend call under `timeout`, mapping both failure kinds to `BackendError`.
async fn with_timeout<T, F>(op: &'static str, timeout: Duration, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => {
            warn!(op, error = %e, "redis command failed");
            Err(BackendError::new(op, e.to_string()))
        }
        Err(_) => {
            warn!(op, timeout_ms = timeout.as_millis() as u64, "redis command timed out");
            Err(BackendError::timeout(op, timeout))
        }
    }
}

fn into_flash_map(raw: HashMap<String, String>) -> FlashMap {
    raw.into_iter().collect()
}

fn pairs_into_flash_map(flat: Vec<String>) -> FlashMap {
    let mut out = FlashMap::new();
    let mut it = flat.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        out.insert(k, v);
    }
    out
}

#[async_trait]
impl FlashBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        match self.ttl {
            Some(ttl) => {
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .hset(key, field, value)
                    .ignore()
                    .expire(key, ttl.as_secs() as i64)
                    .ignore();
                self.bounded("HSET", async move {
                    let r: RedisResult<()> = pipe.query_async(&mut conn).await;
                    r
                }).await
            }
            None => self.bounded("HSET", async move {
                let r: RedisResult<()> = conn.hset(key, field, value).await;
                r
            }).await,
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.conn.clone();
        self.bounded("HGET", async move {
            let r: RedisResult<Option<String>> = conn.hget(key, field).await;
            r
        }).await
    }

    async fn hgetall(&self, key: &str) -> Result<FlashMap, BackendError> {
        let mut conn = self.conn.clone();
        let raw = self
            .bounded("HGETALL", async move {
                let r: RedisResult<HashMap<String, String>> = conn.hgetall(key).await;
                r
            })
            .await?;
        Ok(into_flash_map(raw))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let n = self.bounded("HDEL", async move {
            let r: RedisResult<i64> = conn.hdel(key, field).await;
            r
        }).await?;
        Ok(n > 0)
    }

    async fn del(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let n = self.bounded("DEL", async move {
            let r: RedisResult<i64> = conn.del(key).await;
            r
        }).await?;
        Ok(n > 0)
    }

    async fn take_field(&self, key: &str, field: &str) -> Result<Taken<Option<String>>, BackendError> {
        if !self.atomic_reads {
            return take_field_sequential(self, key, field).await;
        }
        let mut conn = self.conn.clone();
        let mut invocation = self.take_field_script.key(key);
        invocation.arg(field);
        let value = self
            .bounded("EVAL take_field", async move {
                let r: RedisResult<Option<String>> = invocation.invoke_async(&mut conn).await;
                r
            })
            .await?;
        Ok(Taken::clean(value))
    }

    async fn take_all(&self, key: &str) -> Result<Taken<FlashMap>, BackendError> {
        if !self.atomic_reads {
            return take_all_sequential(self, key).await;
        }
        let mut conn = self.conn.clone();
        let invocation = self.take_all_script.key(key);
        let flat = self
            .bounded("EVAL take_all", async move {
                let r: RedisResult<Vec<String>> = invocation.invoke_async(&mut conn).await;
                r
            })
            .await?;
        Ok(Taken::clean(pairs_into_flash_map(flat)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_pairs_become_a_map() {
        let flat = vec!["info".to_string(), "a".to_string(), "error".to_string(), "b".to_string()];
        let map = pairs_into_flash_map(flat);
        assert_eq!(map.len(), 2);
        assert_eq!(map["info"], "a");
        assert_eq!(map["error"], "b");
    }

    #[tokio::test]
    async fn stalled_call_times_out() {
        let started = std::time::Instant::now();
        let err = with_timeout("HGET", Duration::from_millis(50), std::future::pending::<RedisResult<()>>())
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::new("HGET", "timed out after 50ms"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn call_error_keeps_op_label() {
        let failing = async { Err::<(), _>(redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"))) };
        let err = with_timeout("HDEL", Duration::from_secs(1), failing).await.unwrap_err();
        assert_eq!(err.op, "HDEL");
        assert!(err.reason.contains("connection reset"));
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_is_bounded() {
        // non-routable address: either the connect times out or the network refuses it outright
        let started = std::time::Instant::now();
        let res = RedisBackend::connect(RedisBackendOptions {
            url: "redis://10.255.255.1:6379".into(),
            timeout: Duration::from_millis(300),
            ..Default::default()
        })
        .await;
        let Err(err) = res else { panic!("connected to a non-routable address") };
        assert_eq!(err.op, "CONNECT");
        assert!(started.elapsed() < Duration::from_secs(5), "connect not bounded: {err}");
        if started.elapsed() >= Duration::from_millis(300) {
            assert_eq!(err.reason, "timed out after 300ms");
        }
    }

    #[test]
    fn dangling_field_is_dropped() {
        let map = pairs_into_flash_map(vec!["info".to_string()]);
        assert!(map.is_empty());
    }

    fn redis_url() -> Option<String> {
        let url = std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty());
        if url.is_none() {
            eprintln!("REDIS_URL missing; skip live redis test.");
        }
        url
    }

    async fn connect(atomic_reads: bool) -> Result<RedisBackend, anyhow::Error> {
        let url = redis_url().ok_or_else(|| anyhow::anyhow!("REDIS_URL missing"))?;
        Ok(RedisBackend::connect(RedisBackendOptions { url, atomic_reads, ..Default::default() }).await?)
    }

    #[tokio::test]
    async fn redis_take_field_scripted() -> Result<(), anyhow::Error> {
        if redis_url().is_none() { return Ok(()); }
        let b = connect(true).await?;
        let key = format!("flash-test:{}", uuid::Uuid::new_v4());

        b.hset(&key, "info", "hello").await?;
        let taken = b.take_field(&key, "info").await?;
        assert_eq!(taken.value.as_deref(), Some("hello"));
        assert!(taken.cleared.is_ok());
        assert_eq!(b.hget(&key, "info").await?, None);

        let taken = b.take_field(&key, "info").await?;
        assert!(taken.value.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn redis_take_all_both_modes() -> Result<(), anyhow::Error> {
        if redis_url().is_none() { return Ok(()); }
        for atomic in [true, false] {
            let b = connect(atomic).await?;
            let key = format!("flash-test:{}", uuid::Uuid::new_v4());

            b.hset(&key, "info", "a").await?;
            b.hset(&key, "error", "b").await?;
            let taken = b.take_all(&key).await?;
            assert_eq!(taken.value.len(), 2);
            assert!(taken.cleared.is_ok());
            assert!(b.hgetall(&key).await?.is_empty());
        }
        Ok(())
    }

    #[tokio::test]
    async fn redis_ttl_is_applied_on_set() -> Result<(), anyhow::Error> {
        let Some(url) = redis_url() else { return Ok(()) };
        let b = RedisBackend::connect(RedisBackendOptions {
            url: url.clone(),
            ttl: Some(Duration::from_secs(30)),
            ..Default::default()
        })
        .await?;
        let key = format!("flash-test:{}", uuid::Uuid::new_v4());
        b.hset(&key, "info", "a").await?;

        let client = redis::Client::open(url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let ttl: i64 = conn.ttl(&key).await?;
        assert!(ttl > 0 && ttl <= 30);
        b.del(&key).await?;
        Ok(())
    }
}
