// Shared plugin plumbing
//
// Both plugins send through the same two caller-facing types (`pageview` and
// `event`) and attach the same page context. That part lives here and is
// registered once per context, ahead of the plugin hooks, so the page-view
// identity advances exactly once per event however many plugins are active.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use trackline_core::identity::is_page_view;
use trackline_core::{
    BeforeSendHook, Environment, EventTypeConfig, PageViewIdentity, Payload, Result,
    PAGE_VIEW_EVENT,
};

/// Caller-facing type of generic interaction events
pub const EVENT: &str = "event";

/// Positional arguments of `event`
pub const EVENT_ARGS: [&str; 4] = ["eventCategory", "eventAction", "eventLabel", "eventValue"];

/// Mappings every plugin registers
pub fn plugin_event_mappings() -> Vec<(&'static str, EventTypeConfig)> {
    vec![
        (PAGE_VIEW_EVENT, EventTypeConfig::collect(&["page"])),
        (EVENT, EventTypeConfig::collect(&EVENT_ARGS)),
    ]
}

/// True for the event types plugins enrich
pub fn is_plugin_event(event_type: &str) -> bool {
    event_type == PAGE_VIEW_EVENT || event_type == EVENT
}

/// Runtime facts attached to every plugin event
pub fn default_context(environment: &dyn Environment) -> Payload {
    let mut context = Payload::new();
    let facts = [
        ("title", environment.title()),
        ("encoding", environment.encoding()),
        ("screenResolution", environment.screen_resolution()),
        ("screenColor", environment.screen_color()),
        ("language", environment.language()),
        ("userAgent", environment.user_agent()),
    ];
    for (key, value) in facts {
        if let Some(value) = value {
            context.insert(key.to_string(), Value::String(value));
        }
    }
    context.insert(
        "time".to_string(),
        Value::from(Utc::now().timestamp_millis()),
    );
    context.insert("eventId".to_string(), Value::String(Uuid::now_v7().to_string()));
    context
}

/// Adds page-view identity and default context to plugin events
///
/// Values already in the payload win.
pub struct PluginBaseHook {
    identity: Arc<PageViewIdentity>,
    environment: Arc<dyn Environment>,
}

impl PluginBaseHook {
    pub fn new(identity: Arc<PageViewIdentity>, environment: Arc<dyn Environment>) -> Self {
        Self {
            identity,
            environment,
        }
    }
}

#[async_trait]
impl BeforeSendHook for PluginBaseHook {
    async fn before_send(&self, event_type: &str, payload: Payload) -> Result<Payload> {
        if !is_plugin_event(event_type) {
            return Ok(payload);
        }

        let page = payload.get("page").and_then(Value::as_str);
        let snapshot = self.identity.advance(event_type, page);

        let mut enriched = Payload::new();
        enriched.insert("hitType".to_string(), Value::from(event_type));
        enriched.insert(
            "pageViewId".to_string(),
            Value::String(snapshot.page_view_id),
        );
        if let Some(referrer) = snapshot.referrer {
            enriched.insert("referrer".to_string(), Value::String(referrer));
        }
        if let Some(location) = snapshot.location {
            enriched.insert("location".to_string(), Value::String(location));
        }
        enriched.extend(default_context(self.environment.as_ref()));
        enriched.extend(payload);
        Ok(enriched)
    }

    fn name(&self) -> &'static str {
        "PluginBaseHook"
    }
}

/// Whether plugin entity data is folded into (and cleared by) this event
///
/// Page views leave accumulated entities for the next event.
pub(crate) fn should_fold(event_type: &str) -> bool {
    is_plugin_event(event_type) && !is_page_view(event_type)
}
