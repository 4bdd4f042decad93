// Client configuration
//
// Options consumed by the dispatcher, built in code or loaded from the
// environment. Validation happens once, at dispatcher construction.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::environment::{Environment, StaticEnvironment};
use crate::error::{AnalyticsError, Result};
use crate::hooks::BeforeSendHook;
use crate::storage::{InMemoryStorage, Storage};
use crate::transport::RequestPreprocessor;

/// Protocol version segment used when none is configured
pub const DEFAULT_VERSION: &str = "v15";

/// HTTP timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Credential prefix identifying API keys (as opposed to user tokens)
pub const API_KEY_PREFIX: &str = "xx";

/// Options for an analytics client
#[derive(Clone)]
pub struct AnalyticsConfig {
    /// Collection endpoint, e.g. `https://analytics.example.com/rest`
    pub endpoint: String,

    /// Bearer token or API key
    pub token: Option<String>,

    /// Protocol version path segment
    pub version: String,

    /// Hooks run after the built-ins and before runtime-registered ones
    pub before_send_hooks: Vec<Arc<dyn BeforeSendHook>>,

    /// Rewrites every request before it is sent
    pub preprocessor: Option<Arc<dyn RequestPreprocessor>>,

    /// Persistence for visitor id and history
    pub storage: Arc<dyn Storage>,

    /// Location, referrer and other runtime facts
    pub environment: Arc<dyn Environment>,

    /// Allow the fire-and-forget transport
    pub beacon_enabled: bool,

    /// HTTP request timeout
    pub timeout: Duration,
}

impl AnalyticsConfig {
    /// Start a builder for `endpoint`
    pub fn builder(endpoint: impl Into<String>) -> AnalyticsConfigBuilder {
        AnalyticsConfigBuilder::new(endpoint)
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TRACKLINE_ENDPOINT`: collection endpoint (required)
    /// - `TRACKLINE_TOKEN`: bearer token or API key
    /// - `TRACKLINE_VERSION`: protocol version (default: v15)
    /// - `TRACKLINE_BEACON_ENABLED`: allow fire-and-forget delivery (default: true)
    /// - `TRACKLINE_TIMEOUT_SECS`: HTTP timeout in seconds (default: 30)
    pub fn from_env() -> Result<Self> {
        let endpoint = env::var("TRACKLINE_ENDPOINT")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AnalyticsError::config("TRACKLINE_ENDPOINT is not set"))?;

        let mut builder = AnalyticsConfigBuilder::new(endpoint);

        if let Ok(token) = env::var("TRACKLINE_TOKEN") {
            if !token.is_empty() {
                builder = builder.token(token);
            }
        }
        if let Ok(version) = env::var("TRACKLINE_VERSION") {
            if !version.is_empty() {
                builder = builder.version(version);
            }
        }

        let beacon_enabled = env::var("TRACKLINE_BEACON_ENABLED")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(true);

        let timeout = env::var("TRACKLINE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let config = builder.beacon_enabled(beacon_enabled).timeout(timeout).build();
        config.validate()?;
        Ok(config)
    }

    /// Check the options are usable
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(AnalyticsError::config("endpoint is required"));
        }
        let url = Url::parse(&self.endpoint).map_err(|e| {
            AnalyticsError::config(format!("invalid endpoint '{}': {}", self.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AnalyticsError::config(format!(
                "endpoint must be http(s), got '{}'",
                url.scheme()
            )));
        }
        if self.version.trim().is_empty() || self.version.contains('/') {
            return Err(AnalyticsError::config(format!(
                "invalid version segment '{}'",
                self.version
            )));
        }
        if self.timeout.is_zero() {
            return Err(AnalyticsError::config("timeout must be greater than zero"));
        }
        Ok(())
    }

    /// `{endpoint}/{version}` without a trailing slash
    pub fn base_url(&self) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), self.version)
    }

    /// Whether the credential is an API key
    pub fn uses_api_key(&self) -> bool {
        self.token
            .as_deref()
            .is_some_and(|t| t.starts_with(API_KEY_PREFIX))
    }
}

impl fmt::Debug for AnalyticsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyticsConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("version", &self.version)
            .field("before_send_hooks", &self.before_send_hooks.len())
            .field("preprocessor", &self.preprocessor.is_some())
            .field("beacon_enabled", &self.beacon_enabled)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for [`AnalyticsConfig`]
pub struct AnalyticsConfigBuilder {
    config: AnalyticsConfig,
}

impl AnalyticsConfigBuilder {
    /// Defaults: no token, version v15, in-memory storage, empty environment
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            config: AnalyticsConfig {
                endpoint: endpoint.into(),
                token: None,
                version: DEFAULT_VERSION.to_string(),
                before_send_hooks: Vec::new(),
                preprocessor: None,
                storage: Arc::new(InMemoryStorage::new()),
                environment: Arc::new(StaticEnvironment::new()),
                beacon_enabled: true,
                timeout: DEFAULT_TIMEOUT,
            },
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Append a configuration hook
    pub fn before_send_hook(mut self, hook: Arc<dyn BeforeSendHook>) -> Self {
        self.config.before_send_hooks.push(hook);
        self
    }

    pub fn preprocessor(mut self, preprocessor: Arc<dyn RequestPreprocessor>) -> Self {
        self.config.preprocessor = Some(preprocessor);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.config.environment = environment;
        self
    }

    pub fn beacon_enabled(mut self, enabled: bool) -> Self {
        self.config.beacon_enabled = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Finish without validating; the dispatcher validates on construction
    pub fn build(self) -> AnalyticsConfig {
        self.config
    }
}
