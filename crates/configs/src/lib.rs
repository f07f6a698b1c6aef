use anyhow::Result;
use serde::Deserialize;
use anyhow::anyhow;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub flash: FlashOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8080, worker_threads: Some(4) }
    }
}

/// Connection parameters for the flash backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Full `redis://` URL; takes precedence over host/port/db when set.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    /// Per-call timeout applied to every backend command.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub key_prefix: String,
    /// Expiry refreshed on every queue; `None` keeps entries until read.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Read-and-clear through server-side scripts instead of two commands.
    #[serde(default = "default_true")]
    pub atomic_reads: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            timeout_ms: default_timeout_ms(),
            key_prefix: String::new(),
            ttl_secs: None,
            atomic_reads: true,
        }
    }
}

/// Policy of the request-level flash middleware.
#[derive(Debug, Clone, Deserialize)]
pub struct FlashOptions {
    /// Leave a flash handle already installed on the request untouched.
    #[serde(default = "default_true", alias = "allow_replace")]
    pub keep_existing: bool,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default = "default_session_header")]
    pub session_header: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            keep_existing: true,
            session_cookie: default_session_cookie(),
            session_header: default_session_header(),
            log_format: default_log_format(),
        }
    }
}

fn default_redis_host() -> String { "localhost".into() }
fn default_redis_port() -> u16 { 6379 }
fn default_timeout_ms() -> u64 { 2000 }
fn default_true() -> bool { true }
fn default_session_cookie() -> String { "sid".into() }
fn default_session_header() -> String { "x-session-id".into() }
fn default_log_format() -> String { "compact".into() }

pub fn config_path() -> String {
    std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string())
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    /// Load from `CONFIG_PATH`, falling back to defaults when the file is absent.
    pub fn load_and_validate() -> Result<Self> {
        let path = config_path();
        let mut cfg = if std::path::Path::new(&path).exists() {
            load_from_file(&path)?
        } else {
            AppConfig::default()
        };
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        self.redis.normalize_from_env();
        self.redis.validate()?;
        self.flash.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be within 1..=65535"));
        }
        if let Some(w) = self.worker_threads {
            if w == 0 { self.worker_threads = Some(4); }
        } else {
            self.worker_threads = Some(4);
        }
        Ok(())
    }
}

impl RedisConfig {
    /// Fill connection settings from `REDIS_URL`, `REDIS_HOST` and `REDIS_PORT`.
    pub fn normalize_from_env(&mut self) {
        if self.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            self.url = std::env::var("REDIS_URL").ok().filter(|u| !u.trim().is_empty());
        }
        if let Ok(host) = std::env::var("REDIS_HOST") {
            if !host.trim().is_empty() { self.host = host; }
        }
        if let Some(port) = std::env::var("REDIS_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            self.port = port;
        }
        if self.host.trim().is_empty() {
            self.host = default_redis_host();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.url {
            let lower = url.to_lowercase();
            if !(lower.starts_with("redis://") || lower.starts_with("rediss://") || lower.starts_with("redis+unix://")) {
                return Err(anyhow!("redis.url must start with redis://, rediss:// or redis+unix://"));
            }
        }
        if self.port == 0 {
            return Err(anyhow!("redis.port must be within 1..=65535"));
        }
        if self.db < 0 {
            return Err(anyhow!("redis.db must be >= 0"));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow!("redis.timeout_ms must be a positive number of milliseconds"));
        }
        if self.ttl_secs == Some(0) {
            return Err(anyhow!("redis.ttl_secs must be >= 1 when set"));
        }
        Ok(())
    }

    /// `connection_url` with any password replaced by `***`, for logs.
    pub fn redacted_url(&self) -> String {
        let url = self.connection_url();
        let Some(scheme_end) = url.find("://").map(|i| i + 3) else { return url };
        let rest = &url[scheme_end..];
        let Some(at) = rest.rfind('@') else { return url };
        let userinfo = &rest[..at];
        match userinfo.find(':') {
            Some(colon) => format!("{}{}:***{}", &url[..scheme_end], &userinfo[..colon], &rest[at..]),
            None if !userinfo.is_empty() => format!("{}***{}", &url[..scheme_end], &rest[at..]),
            None => url,
        }
    }

    /// Connection URL derived from `url` or host/port/db.
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl FlashOptions {
    pub fn validate(&self) -> Result<()> {
        if self.session_cookie.trim().is_empty() && self.session_header.trim().is_empty() {
            return Err(anyhow!("flash.session_cookie and flash.session_header cannot both be empty"));
        }
        Ok(())
    }
}
