// Hook pipeline
//
// Hooks are uniform async transforms `(event_type, payload) -> payload`.
// Synchronous closures are adapted with `before_send_fn`. The pipeline awaits
// each hook before invoking the next, strictly in registration order.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::environment::Environment;
use crate::error::Result;
use crate::event_types::{is_legacy, VIEW};
use crate::history::{HistoryElement, HistoryStore};
use crate::payload::Payload;

// ============================================================================
// Hook traits
// ============================================================================

/// Transform applied to every outgoing payload before it is sent
#[async_trait]
pub trait BeforeSendHook: Send + Sync {
    /// Return the payload to continue with; errors abort the event
    async fn before_send(&self, event_type: &str, payload: Payload) -> Result<Payload>;

    /// Human-readable name for logging/debugging
    fn name(&self) -> &'static str {
        "BeforeSendHook"
    }
}

/// Observer notified after an event was delivered
#[async_trait]
pub trait AfterSendHook: Send + Sync {
    async fn after_send(&self, event_type: &str, payload: &Payload) -> Result<()>;

    fn name(&self) -> &'static str {
        "AfterSendHook"
    }
}

// ============================================================================
// Closure adapters
// ============================================================================

/// Before-send hook backed by a synchronous closure
pub struct FnBeforeSendHook<F>(F);

#[async_trait]
impl<F> BeforeSendHook for FnBeforeSendHook<F>
where
    F: Fn(&str, Payload) -> Result<Payload> + Send + Sync,
{
    async fn before_send(&self, event_type: &str, payload: Payload) -> Result<Payload> {
        (self.0)(event_type, payload)
    }

    fn name(&self) -> &'static str {
        "FnBeforeSendHook"
    }
}

/// After-send hook backed by a synchronous closure
pub struct FnAfterSendHook<F>(F);

#[async_trait]
impl<F> AfterSendHook for FnAfterSendHook<F>
where
    F: Fn(&str, &Payload) + Send + Sync,
{
    async fn after_send(&self, event_type: &str, payload: &Payload) -> Result<()> {
        (self.0)(event_type, payload);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FnAfterSendHook"
    }
}

/// Wrap a synchronous closure as a before-send hook
pub fn before_send_fn<F>(f: F) -> Arc<dyn BeforeSendHook>
where
    F: Fn(&str, Payload) -> Result<Payload> + Send + Sync + 'static,
{
    Arc::new(FnBeforeSendHook(f))
}

/// Wrap a synchronous closure as an after-send hook
pub fn after_send_fn<F>(f: F) -> Arc<dyn AfterSendHook>
where
    F: Fn(&str, &Payload) + Send + Sync + 'static,
{
    Arc::new(FnAfterSendHook(f))
}

// ============================================================================
// HookPipeline
// ============================================================================

/// Ordered list of before-send hooks
#[derive(Default)]
pub struct HookPipeline {
    hooks: RwLock<Vec<Arc<dyn BeforeSendHook>>>,
}

impl HookPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; it runs after every hook registered before it
    pub fn register(&self, hook: Arc<dyn BeforeSendHook>) {
        self.hooks.write().push(hook);
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    /// Check if no hooks are registered
    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Reduce the payload through every hook in order
    pub async fn run(&self, event_type: &str, payload: Payload) -> Result<Payload> {
        // Snapshot so no lock is held across an await
        let hooks: Vec<Arc<dyn BeforeSendHook>> = self.hooks.read().clone();
        let mut payload = payload;
        for hook in hooks {
            payload = hook.before_send(event_type, payload).await?;
        }
        Ok(payload)
    }
}

// ============================================================================
// Built-in hooks
// ============================================================================

/// Enriches `view` events with location, referrer and title and records the
/// viewed content in the page-view history
pub struct ViewEventEnhancer {
    environment: Arc<dyn Environment>,
    history: HistoryStore,
}

impl ViewEventEnhancer {
    pub fn new(environment: Arc<dyn Environment>, history: HistoryStore) -> Self {
        Self {
            environment,
            history,
        }
    }
}

#[async_trait]
impl BeforeSendHook for ViewEventEnhancer {
    async fn before_send(&self, event_type: &str, payload: Payload) -> Result<Payload> {
        if event_type != VIEW {
            return Ok(payload);
        }

        if let Some(Value::String(content)) = payload.get("contentIdValue") {
            if let Err(e) = self
                .history
                .add_element(HistoryElement::page_view(content.clone()))
                .await
            {
                warn!(error = %e, "Failed to record page view in history");
            }
        }

        let mut enriched = Payload::new();
        let defaults = [
            ("location", self.environment.location()),
            ("referrer", self.environment.referrer()),
            ("title", self.environment.title()),
        ];
        for (key, value) in defaults {
            if let Some(value) = value {
                enriched.insert(key.to_string(), Value::String(value));
            }
        }
        enriched.extend(payload);
        Ok(enriched)
    }

    fn name(&self) -> &'static str {
        "ViewEventEnhancer"
    }
}

/// Adds `language` and `userAgent` to legacy events that lack them
pub struct DefaultValuesHook {
    environment: Arc<dyn Environment>,
}

impl DefaultValuesHook {
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        Self { environment }
    }
}

#[async_trait]
impl BeforeSendHook for DefaultValuesHook {
    async fn before_send(&self, event_type: &str, mut payload: Payload) -> Result<Payload> {
        if !is_legacy(event_type) {
            return Ok(payload);
        }

        let defaults = [
            ("language", self.environment.language()),
            ("userAgent", self.environment.user_agent()),
        ];
        for (key, value) in defaults {
            if let Some(value) = value {
                payload
                    .entry(key.to_string())
                    .or_insert(Value::String(value));
            }
        }
        Ok(payload)
    }

    fn name(&self) -> &'static str {
        "DefaultValuesHook"
    }
}
