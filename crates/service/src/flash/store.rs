use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::backend::FlashBackend;
use crate::errors::{FlashError, FlashMap, Recovered};
use crate::flash::format::format;
use crate::metrics;

#[derive(Debug, Clone, Default)]
pub struct FlashConfig {
    /// Prepended to every session id to form the backend key.
    pub key_prefix: String,
}

/// One call to the flash entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum FlashRequest {
    /// Store `template` under `category`, rendered with `args` when any are given.
    Queue { category: String, template: String, args: Vec<Value> },
    /// Take the message queued under `category`.
    Read { category: String },
    /// Take every queued message of the session.
    ReadAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashResponse {
    Queued,
    Message(String),
    All(FlashMap),
}

/// Session-scoped flash store.
///
/// A category holds one message; queueing again overwrites it. Reads clear
/// what they return. Nothing here locks: ordering between concurrent calls on
/// the same session is whatever the backend's per-command atomicity gives.
pub struct FlashStore {
    backend: Arc<dyn FlashBackend>,
    config: FlashConfig,
}

impl FlashStore {
    pub fn new(backend: Arc<dyn FlashBackend>, config: FlashConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn session_key(&self, session: &str) -> String {
        format!("{}{}", self.config.key_prefix, session)
    }

    /// Dispatch a [`FlashRequest`] to the matching operation.
    pub async fn flash(&self, session: &str, request: FlashRequest) -> Result<FlashResponse, FlashError> {
        match request {
            FlashRequest::Queue { category, template, args } => {
                self.queue_fmt(session, &category, &template, &args).await?;
                Ok(FlashResponse::Queued)
            }
            FlashRequest::Read { category } => self.read(session, &category).await.map(FlashResponse::Message),
            FlashRequest::ReadAll => self.read_all(session).await.map(FlashResponse::All),
        }
    }

    /// Queue `message` verbatim under `category`.
    #[instrument(skip(self, message), fields(backend = self.backend.name()))]
    pub async fn queue(&self, session: &str, category: &str, message: &str) -> Result<(), FlashError> {
        if category.is_empty() {
            return Err(FlashError::InvalidCategory);
        }
        let key = self.session_key(session);
        self.backend.hset(&key, category, message).await.map_err(|e| {
            metrics::FLASH_BACKEND_ERRORS_TOTAL.inc();
            warn!(error = %e, "flash queue failed");
            FlashError::from(e)
        })?;
        metrics::FLASH_QUEUED_TOTAL.inc();
        debug!("flash queued");
        Ok(())
    }

    /// Queue `template`, substituting `args` first when there are any.
    pub async fn queue_fmt(&self, session: &str, category: &str, template: &str, args: &[Value]) -> Result<(), FlashError> {
        if args.is_empty() {
            return self.queue(session, category, template).await;
        }
        let message = format(template, args);
        self.queue(session, category, &message).await
    }

    /// Take the message queued under `category`; `""` when there is none.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn read(&self, session: &str, category: &str) -> Result<String, FlashError> {
        if category.is_empty() {
            return Err(FlashError::InvalidCategory);
        }
        let key = self.session_key(session);
        let taken = self.backend.take_field(&key, category).await.map_err(|e| {
            metrics::FLASH_BACKEND_ERRORS_TOTAL.inc();
            warn!(error = %e, "flash read failed");
            FlashError::from(e)
        })?;
        metrics::FLASH_READ_TOTAL.inc();

        let message = taken.value.unwrap_or_default();
        if let Err(cause) = taken.cleared {
            metrics::FLASH_PARTIAL_CONSUMPTION_TOTAL.inc();
            error!(error = %cause, "flash read but not cleared; may be delivered again");
            return Err(FlashError::PartialConsumption {
                session: session.to_string(),
                category: Some(category.to_string()),
                recovered: Recovered::Message(message),
                cause,
            });
        }
        debug!(found = !message.is_empty(), "flash read");
        Ok(message)
    }

    /// Take every queued message of the session; empty when there are none.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn read_all(&self, session: &str) -> Result<FlashMap, FlashError> {
        let key = self.session_key(session);
        let taken = self.backend.take_all(&key).await.map_err(|e| {
            metrics::FLASH_BACKEND_ERRORS_TOTAL.inc();
            warn!(error = %e, "flash read_all failed");
            FlashError::from(e)
        })?;
        metrics::FLASH_READ_ALL_TOTAL.inc();

        if let Err(cause) = taken.cleared {
            metrics::FLASH_PARTIAL_CONSUMPTION_TOTAL.inc();
            error!(error = %cause, categories = taken.value.len(), "flash read_all but not cleared; may be delivered again");
            return Err(FlashError::PartialConsumption {
                session: session.to_string(),
                category: None,
                recovered: Recovered::All(taken.value),
                cause,
            });
        }
        debug!(categories = taken.value.len(), "flash read_all");
        Ok(taken.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn store() -> (Arc<MemoryBackend>, FlashStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = FlashStore::new(backend.clone(), FlashConfig::default());
        (backend, store)
    }

    #[tokio::test]
    async fn unwritten_category_reads_empty() -> Result<(), anyhow::Error> {
        let (_, store) = store();
        assert_eq!(store.read("s", "info").await?, "");
        store.queue("s", "error", "boom").await?;
        let all = store.read_all("s").await?;
        assert!(!all.contains_key("info"));
        assert_eq!(all.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn read_is_once() -> Result<(), anyhow::Error> {
        let (_, store) = store();
        store.queue("s", "info", "email sent").await?;
        assert_eq!(store.read("s", "info").await?, "email sent");
        assert_eq!(store.read("s", "info").await?, "");
        Ok(())
    }

    #[tokio::test]
    async fn read_all_drains_session() -> Result<(), anyhow::Error> {
        let (backend, store) = store();
        store.queue("s", "info", "a").await?;
        store.queue("s", "error", "b").await?;
        store.queue("other", "info", "c").await?;

        let all = store.read_all("s").await?;
        assert_eq!(all.len(), 2);
        assert_eq!(all["info"], "a");
        assert_eq!(all["error"], "b");
        assert!(store.read_all("s").await?.is_empty());
        // other sessions untouched
        assert_eq!(backend.key_count().await, 1);
        assert_eq!(store.read("other", "info").await?, "c");
        Ok(())
    }

    #[tokio::test]
    async fn queue_overwrites_then_read_all_sees_the_rest() -> Result<(), anyhow::Error> {
        let (_, store) = store();
        store.queue("sess1", "info", "email sent").await?;
        store.queue("sess1", "error", "delivery failed").await?;
        store.queue("sess1", "info", "email re-sent").await?;

        assert_eq!(store.read("sess1", "info").await?, "email re-sent");
        let all = store.read_all("sess1").await?;
        assert_eq!(all, FlashMap::from([("error".to_string(), "delivery failed".to_string())]));
        assert!(store.read_all("sess1").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn queue_fmt_renders_only_with_args() -> Result<(), anyhow::Error> {
        let (_, store) = store();
        store.queue_fmt("s", "info", "email has been sent to %s.", &[json!("alice")]).await?;
        assert_eq!(store.read("s", "info").await?, "email has been sent to alice.");

        store.queue_fmt("s", "info", "100%% literal %s", &[]).await?;
        assert_eq!(store.read("s", "info").await?, "100%% literal %s");
        Ok(())
    }

    #[tokio::test]
    async fn read_issues_get_then_delete() -> Result<(), anyhow::Error> {
        let (backend, store) = store();
        store.queue("s", "info", "x").await?;
        store.read("s", "info").await?;
        store.queue("s", "info", "y").await?;
        store.read_all("s").await?;
        assert_eq!(backend.calls().await, vec!["HSET", "HGET", "HDEL", "HSET", "HGETALL", "DEL"]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_queues_last_write_wins() -> Result<(), anyhow::Error> {
        let (_, store) = store();
        let store = Arc::new(store);

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.queue("s", "info", "first message").await })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.queue("s", "info", "second message").await })
        };
        a.await??;
        b.await??;

        let got = store.read("s", "info").await?;
        assert!(got == "first message" || got == "second message", "unexpected {got:?}");
        assert_eq!(store.read("s", "info").await?, "");
        Ok(())
    }

    #[tokio::test]
    async fn failed_delete_is_partial_and_redeliverable() -> Result<(), anyhow::Error> {
        let (backend, store) = store();
        store.queue("s", "info", "hello").await?;
        backend.fail_next("HDEL").await;

        let err = store.read("s", "info").await.unwrap_err();
        assert!(err.is_partial());
        assert_eq!(err.recovered(), Some(&Recovered::Message("hello".into())));
        match &err {
            FlashError::PartialConsumption { category, cause, .. } => {
                assert_eq!(category.as_deref(), Some("info"));
                assert_eq!(cause.op, "HDEL");
            }
            other => panic!("unexpected error {other:?}"),
        }

        // duplicate delivery on the next read
        assert_eq!(store.read("s", "info").await?, "hello");
        assert_eq!(store.read("s", "info").await?, "");
        Ok(())
    }

    #[tokio::test]
    async fn failed_key_delete_is_partial_for_read_all() -> Result<(), anyhow::Error> {
        let (backend, store) = store();
        store.queue("s", "info", "a").await?;
        backend.fail_next("DEL").await;

        match store.read_all("s").await {
            Err(FlashError::PartialConsumption { category: None, recovered: Recovered::All(map), .. }) => {
                assert_eq!(map["info"], "a");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(store.read_all("s").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn backend_failures_surface_unmodified() -> Result<(), anyhow::Error> {
        let (backend, store) = store();
        backend.fail_next("HSET").await;
        let err = store.queue("s", "info", "x").await.unwrap_err();
        assert!(matches!(err, FlashError::BackendUnavailable(ref e) if e.op == "HSET"));

        backend.fail_next("HGET").await;
        assert!(matches!(store.read("s", "info").await, Err(FlashError::BackendUnavailable(_))));

        backend.fail_next("HGETALL").await;
        assert!(matches!(store.read_all("s").await, Err(FlashError::BackendUnavailable(_))));
        Ok(())
    }

    #[tokio::test]
    async fn empty_category_is_rejected() {
        let (backend, store) = store();
        assert!(matches!(store.queue("s", "", "x").await, Err(FlashError::InvalidCategory)));
        assert!(matches!(store.read("s", "").await, Err(FlashError::InvalidCategory)));
        assert!(backend.calls().await.is_empty());
    }

    #[tokio::test]
    async fn key_prefix_scopes_backend_keys() -> Result<(), anyhow::Error> {
        let backend = Arc::new(MemoryBackend::new());
        let store = FlashStore::new(backend.clone(), FlashConfig { key_prefix: "flash:".into() });
        store.queue("abc", "info", "x").await?;
        assert_eq!(backend.hget("flash:abc", "info").await?, Some("x".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn flash_entry_point_dispatches() -> Result<(), anyhow::Error> {
        let (_, store) = store();
        let queued = store
            .flash("s", FlashRequest::Queue { category: "info".into(), template: "count: %d".into(), args: vec![json!(3)] })
            .await?;
        assert_eq!(queued, FlashResponse::Queued);

        let read = store.flash("s", FlashRequest::Read { category: "info".into() }).await?;
        assert_eq!(read, FlashResponse::Message("count: 3".into()));

        let all = store.flash("s", FlashRequest::ReadAll).await?;
        assert_eq!(all, FlashResponse::All(FlashMap::new()));
        Ok(())
    }
}
