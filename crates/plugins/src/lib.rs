// Trackline plugins
//
// Domain plugins layered on the event pipeline through before-send hooks,
// and the AnalyticsContext that activates them.
//
// Key design decisions:
// - Plugins are created by id from an explicit registry of factories
// - One page-view identity per context, advanced by a single shared hook
// - Entity data is folded into the next interaction event and then cleared;
//   page views leave it in place

pub mod base;
pub mod context;
pub mod ecommerce;
pub mod plugin;
pub mod service;

pub use base::{default_context, plugin_event_mappings, PluginBaseHook, EVENT, EVENT_ARGS};
pub use context::AnalyticsContext;
pub use ecommerce::{EcommercePlugin, ECOMMERCE_PLUGIN_ID};
pub use plugin::{Plugin, PluginFactory, PluginRegistry};
pub use service::{ServicePlugin, SERVICE_PLUGIN_ID};
