//! # Configuration Module
//!
//! This module handles configuration management with hot reloading capabilities.
//! It provides the configuration structures and the loading pipeline that turns a file on
//! disk into a validated [`GatewayConfig`].
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde, picked by file extension
//! - `$VAR` placeholders filled from the environment before parsing
//! - `GATEWAY_*` environment variable overrides
//! - Validation that reports every problem at once
//! - Hot reloading using file system watchers

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use url::Url;

use crate::caching::policy::{Cache, EndpointCache};
use crate::core::error::{GatewayError, GatewayResult};
use crate::modifier::{Modifier, ModifierAction, ModifierContext, ModifierScope, ModifierTarget};

/// Main gateway configuration structure
///
/// This structure represents the complete configuration for the gateway. Every section except
/// `endpoints` has defaults, so a minimal file only lists endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Watch the configuration file and rebuild the runtime when it changes
    #[serde(default)]
    pub hot_reload: bool,

    /// Where cached responses live
    #[serde(default)]
    pub store: StoreConfig,

    /// Global cache policy inherited by every endpoint cache
    #[serde(default)]
    pub cache: Option<Cache>,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl GatewayConfig {
    /// Read `path`; `.json` files are parsed as JSON, anything else as YAML
    pub async fn load<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        let expanded = substitute_env_vars(content, |name| std::env::var(name).ok());
        serde_yaml::from_str::<Self>(&expanded)?.finish()
    }

    pub fn from_json_str(content: &str) -> GatewayResult<Self> {
        let expanded = substitute_env_vars(content, |name| std::env::var(name).ok());
        serde_json::from_str::<Self>(&expanded)?.finish()
    }

    fn finish(mut self) -> GatewayResult<Self> {
        self.apply_env_overrides()?;
        self.validate()?;
        Ok(self)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>
    /// For example: GATEWAY_SERVER_PORT=8080
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server configuration overrides
        if let Some(addr) = lookup("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(port) = lookup("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {}", e)))?;
        }

        if let Some(size) = lookup("GATEWAY_SERVER_MAX_BODY_SIZE") {
            self.server.max_body_size = size.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_SERVER_MAX_BODY_SIZE: {}", e))
            })?;
        }

        // Timeout overrides
        if let Some(timeout) = lookup("GATEWAY_SERVER_DEFAULT_TIMEOUT") {
            self.server.default_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_SERVER_DEFAULT_TIMEOUT: {}", e))
            })?;
        }

        if let Some(period) = lookup("GATEWAY_SERVER_SHUTDOWN_GRACE_PERIOD") {
            self.server.shutdown_grace_period = humantime::parse_duration(&period).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_SERVER_SHUTDOWN_GRACE_PERIOD: {}", e))
            })?;
        }

        // Logging configuration overrides
        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Metrics configuration overrides
        if let Some(enabled) = lookup("GATEWAY_METRICS_ENABLED") {
            self.metrics.enabled = enabled
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_METRICS_ENABLED: {}", e)))?;
        }

        if let Some(addr) = lookup("GATEWAY_METRICS_BIND_ADDRESS") {
            self.metrics.bind_address = addr;
        }

        if let Some(enabled) = lookup("GATEWAY_HOT_RELOAD") {
            self.hot_reload = enabled
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_HOT_RELOAD: {}", e)))?;
        }

        // Store override switches to redis
        if let Some(url) = lookup("GATEWAY_REDIS_URL") {
            self.store = StoreConfig::Redis(RedisStoreConfig { url });
        }

        Ok(())
    }

    /// Comprehensive configuration validation with detailed error messages
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        // Validate server configuration
        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.port == 0 {
            errors.push("server port must be greater than 0".to_string());
        }

        if self.server.max_body_size == 0 {
            errors.push("max_body_size must be greater than 0".to_string());
        }

        validate_timeout("server default_timeout", Some(self.server.default_timeout), &mut errors);

        // Validate logging configuration
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            errors.push(format!("Invalid log level: {}", self.logging.level));
        }

        if !matches!(self.logging.format.as_str(), "json" | "text") {
            errors.push(format!(
                "Invalid log format '{}', expected json or text",
                self.logging.format
            ));
        }

        if self.metrics.enabled && self.metrics.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid metrics bind_address: {}",
                self.metrics.bind_address
            ));
        }

        // Validate store configuration
        match &self.store {
            StoreConfig::Memory(memory) => {
                if memory.cleanup_interval.is_zero() {
                    errors.push("memory store cleanup_interval must be greater than 0".to_string());
                }
                if memory.max_entries == Some(0) {
                    errors.push("memory store max_entries must be greater than 0".to_string());
                }
            }
            StoreConfig::Redis(redis) => match Url::parse(&redis.url) {
                Ok(url) if matches!(url.scheme(), "redis" | "rediss") => {}
                _ => errors.push(format!("Invalid redis url: {}", redis.url)),
            },
        }

        if let Some(cache) = &self.cache {
            validate_cache_lists(
                "cache",
                cache.only_if_methods(),
                cache.only_if_status_codes(),
                &mut errors,
            );
        }

        // Validate endpoints
        let mut routes = HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate(&mut errors);
            if !routes.insert((endpoint.method.to_uppercase(), endpoint.path.clone())) {
                errors.push(format!(
                    "Duplicate endpoint {} {}",
                    endpoint.method, endpoint.path
                ));
            }
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    pub port: u16,

    /// Deadline for a whole request when the endpoint sets none
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Maximum request body size
    pub max_body_size: usize,

    /// How long in-flight requests may keep a replaced runtime alive
    #[serde(with = "humantime_serde")]
    pub shutdown_grace_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            default_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
            shutdown_grace_period: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> GatewayResult<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid server address: {}", e)))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve a Prometheus scrape endpoint
    pub enabled: bool,

    pub bind_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Cache store selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreConfig {
    Memory(MemoryStoreConfig),
    Redis(RedisStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory(MemoryStoreConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Upper bound on stored entries; the oldest are evicted first
    pub max_entries: Option<usize>,

    /// Interval of the expired-entry sweep
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Connection url, `redis://[:password@]host:port[/db]`
    pub url: String,
}

/// One externally routable operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Route path, `:name` for a segment parameter and `*name` for a catch-all
    pub path: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Deadline for the whole pipeline, defaults to `server.default_timeout`
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Merge every backend body into one object keyed by backend name
    #[serde(default)]
    pub aggregate_responses: bool,

    /// Statuses counted as success; anything below 400 when unset
    #[serde(default)]
    pub acceptable_status_codes: Option<Vec<u16>>,

    #[serde(default)]
    pub cache: Option<EndpointCache>,

    pub backends: Vec<BackendConfig>,
}

impl EndpointConfig {
    fn validate(&self, errors: &mut Vec<String>) {
        let name = format!("endpoint {} {}", self.method, self.path);

        if !self.path.starts_with('/') {
            errors.push(format!("{}: path must start with '/'", name));
        }

        if parse_method(&self.method).is_none() {
            errors.push(format!("{}: invalid method", name));
        }

        validate_timeout(&format!("{} timeout", name), self.timeout, errors);

        if let Some(codes) = &self.acceptable_status_codes {
            if codes.iter().any(|code| !(100..=599).contains(code)) {
                errors.push(format!("{}: invalid acceptable_status_codes", name));
            }
        }

        if let Some(cache) = &self.cache {
            validate_cache_lists(
                &format!("{} cache", name),
                cache.only_if_methods(),
                cache.only_if_status_codes(),
                errors,
            );
        }

        if self.backends.is_empty() {
            errors.push(format!("{}: at least one backend is required", name));
        }

        let mut names = HashSet::new();
        for backend in &self.backends {
            if !names.insert(backend.name.as_str()) {
                errors.push(format!("{}: duplicate backend name '{}'", name, backend.name));
            }
            backend.validate(&name, errors);
        }
    }
}

/// One upstream call within an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Name used in logs and as the key of aggregated bodies
    pub name: String,

    /// Base urls; one is picked at random per call
    pub hosts: Vec<String>,

    /// Upstream path, may reference endpoint params as `:name`
    pub path: String,

    /// Upstream method, defaults to the endpoint method
    #[serde(default)]
    pub method: Option<String>,

    /// Stop the sequence when this backend fails
    #[serde(default)]
    pub required: bool,

    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub modifiers: ModifiersConfig,
}

impl BackendConfig {
    fn validate(&self, endpoint: &str, errors: &mut Vec<String>) {
        let name = format!("{} backend '{}'", endpoint, self.name);

        if self.name.trim().is_empty() {
            errors.push(format!("{}: name cannot be empty", endpoint));
        }

        if self.hosts.is_empty() {
            errors.push(format!("{}: at least one host is required", name));
        }

        for host in &self.hosts {
            match Url::parse(host) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                _ => errors.push(format!("{}: invalid host '{}'", name, host)),
            }
        }

        if !self.path.starts_with('/') {
            errors.push(format!("{}: path must start with '/'", name));
        }

        if let Some(method) = &self.method {
            if parse_method(method).is_none() {
                errors.push(format!("{}: invalid method '{}'", name, method));
            }
        }

        validate_timeout(&format!("{} timeout", name), self.timeout, errors);

        let modifiers = self
            .modifiers
            .request
            .iter()
            .map(|m| (ModifierContext::Request, m))
            .chain(self.modifiers.response.iter().map(|m| (ModifierContext::Response, m)));
        for (context, modifier) in modifiers {
            if let Err(e) = Modifier::new(context, modifier) {
                errors.push(format!("{}: {}", name, e));
            }
        }
    }
}

/// Modifiers of one backend, split by the half of the exchange they run on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifiersConfig {
    #[serde(default)]
    pub request: Vec<ModifierConfig>,

    #[serde(default)]
    pub response: Vec<ModifierConfig>,
}

/// A modifier as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierConfig {
    #[serde(default)]
    pub scope: ModifierScope,

    pub target: ModifierTarget,

    pub action: ModifierAction,

    /// Name or dot path addressed by the action; unused for status codes
    #[serde(default)]
    pub key: String,

    /// Literal or `#reference`; the new key for `RENAME`
    #[serde(default)]
    pub value: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Parse an HTTP method token, case-insensitively
pub fn parse_method(method: &str) -> Option<Method> {
    Method::from_bytes(method.trim().to_uppercase().as_bytes()).ok()
}

/// Longest accepted request or backend timeout
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

fn validate_timeout(label: &str, timeout: Option<Duration>, errors: &mut Vec<String>) {
    match timeout {
        Some(timeout) if timeout.is_zero() => {
            errors.push(format!("{} must be greater than 0", label));
        }
        Some(timeout) if timeout > MAX_TIMEOUT => errors.push(format!(
            "{} must not exceed {}",
            label,
            humantime::format_duration(MAX_TIMEOUT)
        )),
        _ => {}
    }
}

fn validate_cache_lists(
    name: &str,
    methods: Option<&[String]>,
    status_codes: Option<&[u16]>,
    errors: &mut Vec<String>,
) {
    for method in methods.unwrap_or_default() {
        if parse_method(method).is_none() {
            errors.push(format!("{}: invalid method '{}' in only_if_methods", name, method));
        }
    }
    for code in status_codes.unwrap_or_default() {
        if !(100..=599).contains(code) {
            errors.push(format!("{}: invalid status code {} in only_if_status_codes", name, code));
        }
    }
}

/// Replace `$NAME` words with the value of the variable; unknown or empty variables stay as
/// written
pub fn substitute_env_vars<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Ok(pattern) = Regex::new(r"\$(\w+)") else {
        return content.to_string();
    };
    pattern
        .replace_all(content, |caps: &Captures| {
            lookup(&caps[1])
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// A validated configuration published after the file changed
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    pub file_path: PathBuf,
    pub config: GatewayConfig,
    pub timestamp: std::time::Instant,
}

/// State shared between the manager and its watcher task
struct WatchedConfig {
    path: PathBuf,
    current: RwLock<GatewayConfig>,
    changes: broadcast::Sender<ConfigChangeEvent>,
}

impl WatchedConfig {
    /// Load the file again and publish it. `current` moves only on [`ConfigCommitter::commit`]
    async fn refresh(&self) -> GatewayResult<()> {
        let config = GatewayConfig::load(&self.path).await?;

        let event = ConfigChangeEvent {
            file_path: self.path.clone(),
            config,
            timestamp: std::time::Instant::now(),
        };
        if self.changes.send(event).is_err() {
            tracing::debug!("Configuration reloaded with no subscribers");
        }
        tracing::info!(path = %self.path.display(), "Configuration reloaded");
        Ok(())
    }
}

/// Marks a published configuration as the one in effect
#[derive(Clone)]
pub struct ConfigCommitter {
    shared: Arc<WatchedConfig>,
}

impl ConfigCommitter {
    pub async fn commit(&self, config: GatewayConfig) {
        *self.shared.current.write().await = config;
        tracing::debug!(path = %self.shared.path.display(), "Configuration committed");
    }
}

/// Owns the loaded configuration and, with `hot_reload`, watches its file.
///
/// Every successful reload is broadcast to [`ConfigManager::subscribe_to_changes`] receivers.
/// [`ConfigManager::get_config`] keeps returning the previous configuration until a
/// subscriber that applied the new one calls [`ConfigCommitter::commit`].
pub struct ConfigManager {
    shared: Arc<WatchedConfig>,
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigManager {
    pub async fn new<P: AsRef<Path>>(config_path: P) -> GatewayResult<Self> {
        let path = config_path.as_ref().to_path_buf();
        let config = GatewayConfig::load(&path).await?;
        let hot_reload = config.hot_reload;

        let shared = Arc::new(WatchedConfig {
            path,
            current: RwLock::new(config),
            changes: broadcast::channel(16).0,
        });

        let watcher = if hot_reload {
            Some(watch(Arc::clone(&shared))?)
        } else {
            None
        };

        Ok(Self {
            shared,
            _watcher: watcher,
        })
    }

    pub async fn get_config(&self) -> RwLockReadGuard<'_, GatewayConfig> {
        self.shared.current.read().await
    }

    pub fn config_path(&self) -> &Path {
        &self.shared.path
    }

    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.shared.changes.subscribe()
    }

    /// Reload the file now, independent of the watcher
    pub async fn reload_config(&self) -> GatewayResult<()> {
        self.shared.refresh().await
    }

    pub fn committer(&self) -> ConfigCommitter {
        ConfigCommitter {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Watch the directory of the configuration file and refresh on writes to the file
fn watch(shared: Arc<WatchedConfig>) -> GatewayResult<RecommendedWatcher> {
    let file_name = shared
        .path
        .file_name()
        .map(|name| name.to_owned())
        .ok_or_else(|| GatewayError::config("configuration path has no file name"))?;
    // editors often save through a rename, so the directory is watched
    let directory = match shared.path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = recommended_watcher(move |result: notify::Result<Event>| {
        if let Ok(event) = result {
            let _ = events_tx.send(event);
        }
    })
    .map_err(|e| GatewayError::config(format!("cannot create file watcher: {}", e)))?;
    watcher
        .watch(&directory, RecursiveMode::NonRecursive)
        .map_err(|e| {
            GatewayError::config(format!("cannot watch {}: {}", directory.display(), e))
        })?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let touches_config = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event
                    .paths
                    .iter()
                    .any(|path| path.file_name() == Some(file_name.as_os_str()));
            if !touches_config {
                continue;
            }

            // debounce the burst of events a single save produces
            tokio::time::sleep(Duration::from_millis(100)).await;
            while events.try_recv().is_ok() {}

            if let Err(e) = shared.refresh().await {
                tracing::error!(error = %e, "Configuration reload failed, keeping the current one");
            }
        }
    });

    tracing::info!(directory = %directory.display(), "Watching configuration for changes");
    Ok(watcher)
}
