// Analytics context
//
// Owned command surface over one dispatcher: send events, keep persistent
// parameters, activate plugins and route "plugin:action" commands to them.
// Everything a context registers lives on its own dispatcher, so two
// contexts never share plugin state.

use async_trait::async_trait;
use futures::Future;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use trackline_core::{
    AnalyticsConfig, AnalyticsError, BeforeSendHook, EventDispatcher, PageViewIdentity, Payload,
    Result,
};

use crate::base::PluginBaseHook;
use crate::plugin::{Plugin, PluginRegistry};

/// Merges persistent parameters into every event; payload values win
struct ParamsHook {
    params: Arc<RwLock<Payload>>,
}

#[async_trait]
impl BeforeSendHook for ParamsHook {
    async fn before_send(&self, _event_type: &str, payload: Payload) -> Result<Payload> {
        let params = self.params.read().clone();
        if params.is_empty() {
            return Ok(payload);
        }
        let mut merged = params;
        merged.extend(payload);
        Ok(merged)
    }

    fn name(&self) -> &'static str {
        "ParamsHook"
    }
}

/// Active plugins in activation order
#[derive(Default)]
struct ActivePlugins {
    base_registered: bool,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ActivePlugins {
    fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.id() == id).cloned()
    }

    fn ids(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.id()).collect()
    }
}

/// Analytics client with plugins
///
/// # Example
///
/// ```no_run
/// # use serde_json::json;
/// # use trackline_core::AnalyticsConfig;
/// # use trackline_plugins::AnalyticsContext;
/// # async fn example() -> trackline_core::Result<()> {
/// let context = AnalyticsContext::new(AnalyticsConfig::from_env()?)?;
/// context.require("ec")?;
/// context.run("ec:addProduct", vec![json!({"id": "P-1", "price": 9.5})])?;
/// context.send("event", vec![json!("cart"), json!("add")]).await?;
/// # Ok(())
/// # }
/// ```
pub struct AnalyticsContext {
    dispatcher: Arc<EventDispatcher>,
    registry: PluginRegistry,
    identity: Arc<PageViewIdentity>,
    params: Arc<RwLock<Payload>>,
    active: Mutex<ActivePlugins>,
}

impl AnalyticsContext {
    /// Create a context sending over HTTP
    pub fn new(config: AnalyticsConfig) -> Result<Self> {
        Ok(Self::with_dispatcher(Arc::new(EventDispatcher::new(config)?)))
    }

    /// Create a context around an existing dispatcher
    pub fn with_dispatcher(dispatcher: Arc<EventDispatcher>) -> Self {
        let params = Arc::new(RwLock::new(Payload::new()));
        dispatcher.register_before_send_hook(Arc::new(ParamsHook {
            params: params.clone(),
        }));
        let identity = Arc::new(PageViewIdentity::new(dispatcher.environment()));

        Self {
            dispatcher,
            registry: PluginRegistry::with_builtins(),
            identity,
            params,
            active: Mutex::new(ActivePlugins::default()),
        }
    }

    /// Use `registry` to resolve plugin ids
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Send an event; see [`EventDispatcher::send_event`]
    pub fn send(
        &self,
        event_type: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Option<Value>>> + Send + '_ {
        self.dispatcher.send_event(event_type, args)
    }

    /// Set a parameter sent with every later event
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        debug!(key = %key, "Setting persistent analytics parameter");
        self.params.write().insert(key, value);
    }

    /// Set several persistent parameters at once
    pub fn set_all(&self, params: Payload) {
        self.params.write().extend(params);
    }

    /// Current persistent parameters
    pub fn params(&self) -> Payload {
        self.params.read().clone()
    }

    // ========================================================================
    // Plugins
    // ========================================================================

    /// Activate plugin `id`; requiring an active plugin returns it again
    pub fn require(&self, id: &str) -> Result<Arc<dyn Plugin>> {
        let mut active = self.active.lock();
        if let Some(plugin) = active.get(id) {
            return Ok(plugin);
        }

        let plugin = self.registry.create(id, self.dispatcher.environment())?;

        if !active.base_registered {
            self.dispatcher
                .register_before_send_hook(Arc::new(PluginBaseHook::new(
                    self.identity.clone(),
                    self.dispatcher.environment(),
                )));
            active.base_registered = true;
        }
        for (event_type, mapping) in plugin.event_mappings() {
            self.dispatcher.add_event_type_mapping(event_type, mapping);
        }
        self.dispatcher
            .register_before_send_hook(plugin.before_send_hook());

        info!(plugin = id, "Plugin activated");
        active.plugins.push(plugin.clone());
        Ok(plugin)
    }

    /// Active plugin `id`, if any
    pub fn plugin(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.active.lock().get(id)
    }

    /// Ids of the active plugins in activation order
    pub fn active_plugins(&self) -> Vec<&'static str> {
        self.active.lock().ids()
    }

    /// Run `action` on an active plugin
    pub fn call(&self, plugin_id: &str, action: &str, args: Vec<Value>) -> Result<()> {
        let plugin = {
            let active = self.active.lock();
            active
                .get(plugin_id)
                .ok_or_else(|| AnalyticsError::unknown("plugin", plugin_id, active.ids()))?
        };
        debug!(plugin = plugin_id, action = action, "Running plugin action");
        plugin.invoke(action, args)
    }

    /// Run a `"plugin:action"` command
    pub fn run(&self, command: &str, args: Vec<Value>) -> Result<()> {
        match command.split_once(':') {
            Some((plugin_id, action)) if !plugin_id.is_empty() && !action.is_empty() => {
                self.call(plugin_id, action, args)
            }
            _ => Err(AnalyticsError::unknown("command", command, self.commands())),
        }
    }

    /// Every `"plugin:action"` command the active plugins accept
    pub fn commands(&self) -> Vec<String> {
        self.active
            .lock()
            .plugins
            .iter()
            .flat_map(|p| p.actions().iter().map(move |a| format!("{}:{}", p.id(), a)))
            .collect()
    }

    /// Forget the visitor, history, page-view identity, parameters and plugin data
    pub async fn reset(&self) {
        self.dispatcher.clear().await;
        self.identity.reset();
        self.params.write().clear();
        let plugins = self.active.lock().plugins.clone();
        for plugin in plugins {
            plugin.clear();
        }
        info!("Analytics context reset");
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn identity(&self) -> &Arc<PageViewIdentity> {
        &self.identity
    }
}
