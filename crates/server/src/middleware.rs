//! Request-scoped flash handle.
//!
//! `install_flash` resolves the session id (cookie first, then header) and
//! puts a [`Flash`] into the request extensions; handlers take it as an
//! extractor.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use configs::FlashOptions;
use serde_json::Value;
use service::{FlashError, FlashMap, FlashRequest, FlashResponse, FlashStore};
use tracing::debug;

use crate::errors::ApiError;

#[derive(Clone)]
pub struct FlashState {
    pub store: Arc<FlashStore>,
    pub options: Arc<FlashOptions>,
}

/// Flash store bound to the session of the current request.
#[derive(Clone)]
pub struct Flash {
    store: Arc<FlashStore>,
    session: String,
}

impl Flash {
    pub fn new(store: Arc<FlashStore>, session: impl Into<String>) -> Self {
        Self { store, session: session.into() }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub async fn queue(&self, category: &str, message: &str) -> Result<(), FlashError> {
        self.store.queue(&self.session, category, message).await
    }

    pub async fn queue_fmt(&self, category: &str, template: &str, args: &[Value]) -> Result<(), FlashError> {
        self.store.queue_fmt(&self.session, category, template, args).await
    }

    pub async fn read(&self, category: &str) -> Result<String, FlashError> {
        self.store.read(&self.session, category).await
    }

    pub async fn read_all(&self) -> Result<FlashMap, FlashError> {
        self.store.read_all(&self.session).await
    }

    pub async fn flash(&self, request: FlashRequest) -> Result<FlashResponse, FlashError> {
        self.store.flash(&self.session, request).await
    }
}

fn session_id(jar: &CookieJar, headers: &HeaderMap, options: &FlashOptions) -> Option<String> {
    let from_cookie = (!options.session_cookie.is_empty())
        .then(|| jar.get(&options.session_cookie))
        .flatten()
        .map(|c| c.value().to_string());
    let from_header = || {
        (!options.session_header.is_empty())
            .then(|| headers.get(options.session_header.as_str()))
            .flatten()
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    from_cookie.or_else(from_header).filter(|s| !s.trim().is_empty())
}

/// Middleware attaching a [`Flash`] to requests that carry a session id.
/// With `keep_existing`, a handle installed by an outer layer is left as is.
pub async fn install_flash(
    State(state): State<FlashState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    if state.options.keep_existing && req.extensions().get::<Flash>().is_some() {
        return next.run(req).await;
    }
    match session_id(&jar, req.headers(), &state.options) {
        Some(session) => {
            req.extensions_mut().insert(Flash::new(Arc::clone(&state.store), session));
        }
        None => debug!(path = %req.uri().path(), "no session id; flash not installed"),
    }
    next.run(req).await
}

#[async_trait]
impl<S> FromRequestParts<S> for Flash
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Flash>().cloned().ok_or_else(ApiError::missing_session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum_extra::extract::cookie::Cookie;

    #[test]
    fn cookie_wins_over_header() {
        let opts = FlashOptions::default();
        let jar = CookieJar::new().add(Cookie::new("sid", "from-cookie"));
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", HeaderValue::from_static("from-header"));
        assert_eq!(session_id(&jar, &headers, &opts).as_deref(), Some("from-cookie"));
        assert_eq!(session_id(&CookieJar::new(), &headers, &opts).as_deref(), Some("from-header"));
    }

    #[test]
    fn blank_or_missing_session_is_none() {
        let opts = FlashOptions::default();
        let mut headers = HeaderMap::new();
        assert_eq!(session_id(&CookieJar::new(), &headers, &opts), None);
        headers.insert("x-session-id", HeaderValue::from_static("  "));
        assert_eq!(session_id(&CookieJar::new(), &headers, &opts), None);
    }

    #[test]
    fn disabled_cookie_source_is_skipped() {
        let opts = FlashOptions { session_cookie: String::new(), ..FlashOptions::default() };
        let jar = CookieJar::new().add(Cookie::new("sid", "ignored"));
        assert_eq!(session_id(&jar, &HeaderMap::new(), &opts), None);
    }
}
