// Event types and their wire mappings
//
// Caller-facing event types may be remapped to a different wire type and
// declare how their arguments and payload are processed. Plugins register
// mappings; an unmapped type is sent as-is under its own name.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Legacy wire types with their own dedicated endpoints
pub const SEARCH: &str = "search";
pub const CLICK: &str = "click";
pub const CUSTOM: &str = "custom";
pub const VIEW: &str = "view";

/// Wire type of measurement-protocol events
pub const COLLECT: &str = "collect";

/// Wire types predating the measurement protocol
pub const LEGACY_TYPES: [&str; 4] = [SEARCH, CLICK, CUSTOM, VIEW];

/// True for the four legacy wire types
pub fn is_legacy(wire_type: &str) -> bool {
    LEGACY_TYPES.contains(&wire_type)
}

/// Keys that survive empty-value removal for a given event type
pub fn keys_allowed_empty(event_type: &str) -> &'static [&'static str] {
    match event_type {
        SEARCH => &["queryText"],
        _ => &[],
    }
}

/// Processing configuration for one caller-facing event type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeConfig {
    /// Type placed in the URL and payload
    pub wire_type: String,

    /// Names matched against positional arguments
    pub positional_arg_names: Vec<String>,

    /// Inject the visitor id before hooks run
    pub add_visitor_id: bool,

    /// Translate keys to the measurement protocol
    pub uses_protocol_mapping: bool,
}

impl EventTypeConfig {
    /// Mapping to `wire_type` with no extra processing
    pub fn new(wire_type: impl Into<String>) -> Self {
        Self {
            wire_type: wire_type.into(),
            positional_arg_names: Vec::new(),
            add_visitor_id: false,
            uses_protocol_mapping: false,
        }
    }

    /// Mapping to the `collect` wire type with visitor id and protocol mapping
    pub fn collect(positional_arg_names: &[&str]) -> Self {
        Self::new(COLLECT)
            .with_positional_args(positional_arg_names)
            .with_visitor_id(true)
            .with_protocol_mapping(true)
    }

    /// Set the positional argument names
    pub fn with_positional_args(mut self, names: &[&str]) -> Self {
        self.positional_arg_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Enable or disable visitor id injection
    pub fn with_visitor_id(mut self, enabled: bool) -> Self {
        self.add_visitor_id = enabled;
        self
    }

    /// Enable or disable protocol mapping
    pub fn with_protocol_mapping(mut self, enabled: bool) -> Self {
        self.uses_protocol_mapping = enabled;
        self
    }
}

/// Registry of caller-facing type to wire configuration
#[derive(Debug, Default)]
pub struct EventTypeRegistry {
    mappings: RwLock<HashMap<String, EventTypeConfig>>,
}

impl EventTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the mapping for `event_type`
    pub fn insert(&self, event_type: impl Into<String>, config: EventTypeConfig) {
        self.mappings.write().insert(event_type.into(), config);
    }

    /// Configuration for `event_type`, defaulting to "send as-is"
    pub fn resolve(&self, event_type: &str) -> EventTypeConfig {
        self.mappings
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_else(|| EventTypeConfig::new(event_type))
    }

    /// Whether `event_type` has an explicit mapping
    pub fn contains(&self, event_type: &str) -> bool {
        self.mappings.read().contains_key(event_type)
    }

    /// Names of all mapped event types
    pub fn event_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mappings.read().keys().cloned().collect();
        names.sort();
        names
    }
}
