// Plugin abstraction
//
// A plugin accumulates domain data through named actions and folds it into
// outgoing events through a before-send hook. Plugins are created by id from
// an explicit registry of factories.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use trackline_core::{AnalyticsError, BeforeSendHook, Environment, EventTypeConfig, Payload, Result};

use crate::base::plugin_event_mappings;
use crate::ecommerce::{EcommercePlugin, ECOMMERCE_PLUGIN_ID};
use crate::service::{ServicePlugin, SERVICE_PLUGIN_ID};

/// Trait for plugins that enrich outgoing events with domain data.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use serde_json::json;
/// # use trackline_core::StaticEnvironment;
/// use trackline_plugins::{Plugin, PluginRegistry};
///
/// # fn example() -> trackline_core::Result<()> {
/// # let environment = Arc::new(StaticEnvironment::new());
/// let registry = PluginRegistry::with_builtins();
/// let ec = registry.create("ec", environment)?;
/// ec.invoke("addProduct", vec![json!({"id": "P-1", "price": 9.5})])?;
/// # Ok(())
/// # }
/// ```
pub trait Plugin: Send + Sync {
    /// Unique plugin identifier (e.g. "ec")
    fn id(&self) -> &'static str;

    /// Names accepted by [`Plugin::invoke`]
    fn actions(&self) -> &'static [&'static str];

    /// Run a named action with positional arguments
    fn invoke(&self, action: &str, args: Vec<Value>) -> Result<()>;

    /// Hook that folds this plugin's data into outgoing events
    fn before_send_hook(&self) -> Arc<dyn BeforeSendHook>;

    /// Event-type mappings the plugin sends through
    fn event_mappings(&self) -> Vec<(&'static str, EventTypeConfig)> {
        plugin_event_mappings()
    }

    /// Forget all accumulated data
    fn clear(&self);
}

/// Error for an action this plugin does not have
pub(crate) fn unknown_action(plugin: &dyn Plugin, action: &str) -> AnalyticsError {
    AnalyticsError::unknown(
        "action",
        format!("{}:{}", plugin.id(), action),
        plugin
            .actions()
            .iter()
            .map(|a| format!("{}:{}", plugin.id(), a)),
    )
}

/// Argument at `index` as an object
pub(crate) fn object_arg(args: &[Value], index: usize, command: &str) -> Result<Payload> {
    match args.get(index) {
        Some(Value::Object(map)) => Ok(map.clone()),
        None | Some(Value::Null) => Ok(Payload::new()),
        Some(other) => Err(AnalyticsError::invalid_argument(format!(
            "{} expects an object, got {}",
            command, other
        ))),
    }
}

/// Argument at `index` as a non-empty string
pub(crate) fn string_arg(args: &[Value], index: usize, command: &str) -> Result<String> {
    match args.get(index) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(AnalyticsError::invalid_argument(format!(
            "{} expects a string argument",
            command
        ))),
    }
}

// ============================================================================
// Plugin Registry
// ============================================================================

/// Creates a plugin instance for a context
pub type PluginFactory = Arc<dyn Fn(Arc<dyn Environment>) -> Arc<dyn Plugin> + Send + Sync>;

/// Registry of plugin factories keyed by id
#[derive(Clone)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the ecommerce and service plugins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ECOMMERCE_PLUGIN_ID, |_env| Arc::new(EcommercePlugin::new()));
        registry.register(SERVICE_PLUGIN_ID, |_env| Arc::new(ServicePlugin::new()));
        registry
    }

    /// Register (or replace) a plugin factory
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(Arc<dyn Environment>) -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
    }

    /// Check if a plugin is registered
    pub fn has(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered plugin ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Create a fresh instance of plugin `id`
    pub fn create(&self, id: &str, environment: Arc<dyn Environment>) -> Result<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| AnalyticsError::unknown("plugin", id, self.ids()))?;
        Ok(factory(environment))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trackline_core::StaticEnvironment;

    fn env() -> Arc<dyn Environment> {
        Arc::new(StaticEnvironment::new())
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.has("ec"));
        assert!(registry.has("svc"));
        assert_eq!(registry.ids(), vec!["ec".to_string(), "svc".to_string()]);
        assert_eq!(registry.create("ec", env()).unwrap().id(), "ec");
    }

    #[test]
    fn test_unknown_plugin_lists_alternatives() {
        let registry = PluginRegistry::with_builtins();
        let err = registry.create("crm", env()).err().unwrap();
        assert_eq!(err.to_string(), "Unknown plugin 'crm'. Valid values: ec, svc");
    }

    #[test]
    fn test_unknown_action_lists_plugin_actions() {
        let plugin = EcommercePlugin::new();
        let err = plugin.invoke("addProdct", vec![]).unwrap_err();
        match err {
            AnalyticsError::UnknownAction { kind, name, valid } => {
                assert_eq!(kind, "action");
                assert_eq!(name, "ec:addProdct");
                assert!(valid.contains(&"ec:addProduct".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_argument_helpers() {
        let args = vec![json!("detail"), json!({"id": "P-1"}), json!(3)];
        assert_eq!(string_arg(&args, 0, "ec:setAction").unwrap(), "detail");
        assert!(string_arg(&args, 1, "ec:setAction").is_err());
        assert_eq!(object_arg(&args, 1, "ec:addProduct").unwrap()["id"], json!("P-1"));
        assert!(object_arg(&args, 5, "ec:addProduct").unwrap().is_empty());
        assert!(matches!(
            object_arg(&args, 2, "ec:addProduct"),
            Err(AnalyticsError::InvalidArgument(_))
        ));
    }
}
