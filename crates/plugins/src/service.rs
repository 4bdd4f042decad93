// Service plugin ("svc")
//
// Holds the support ticket and the last service action for the next
// interaction event.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use trackline_core::protocol::ticket_keys;
use trackline_core::{BeforeSendHook, Payload, Result};

use crate::base::should_fold;
use crate::plugin::{object_arg, string_arg, unknown_action, Plugin};

pub const SERVICE_PLUGIN_ID: &str = "svc";

const ACTIONS: &[&str] = &["setTicket", "setAction", "clear"];

#[derive(Debug, Default)]
struct ServiceData {
    ticket: Payload,
    action: Option<String>,
    action_data: Payload,
}

impl ServiceData {
    fn take_payload(&mut self) -> Payload {
        let mut payload = ticket_keys(&self.ticket);
        if let Some(action) = self.action.take() {
            payload.insert("svcAction".to_string(), Value::String(action));
            if !self.action_data.is_empty() {
                payload.insert(
                    "svcActionData".to_string(),
                    Value::Object(std::mem::take(&mut self.action_data)),
                );
            }
        }
        *self = Self::default();
        payload
    }
}

/// Service plugin
#[derive(Default)]
pub struct ServicePlugin {
    data: Arc<Mutex<ServiceData>>,
}

impl ServicePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current ticket
    pub fn set_ticket(&self, ticket: Payload) {
        self.data.lock().ticket = ticket;
    }

    pub fn set_action(&self, action: impl Into<String>, options: Payload) {
        let mut data = self.data.lock();
        data.action = Some(action.into());
        data.action_data = options;
    }

    pub fn has_ticket(&self) -> bool {
        !self.data.lock().ticket.is_empty()
    }
}

impl Plugin for ServicePlugin {
    fn id(&self) -> &'static str {
        SERVICE_PLUGIN_ID
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn invoke(&self, action: &str, args: Vec<Value>) -> Result<()> {
        match action {
            "setTicket" => self.set_ticket(object_arg(&args, 0, "svc:setTicket")?),
            "setAction" => {
                let name = string_arg(&args, 0, "svc:setAction")?;
                let options = object_arg(&args, 1, "svc:setAction")?;
                self.set_action(name, options);
            }
            "clear" => self.clear(),
            _ => return Err(unknown_action(self, action)),
        }
        Ok(())
    }

    fn before_send_hook(&self) -> Arc<dyn BeforeSendHook> {
        Arc::new(ServiceHook {
            data: self.data.clone(),
        })
    }

    fn clear(&self) {
        *self.data.lock() = ServiceData::default();
    }
}

struct ServiceHook {
    data: Arc<Mutex<ServiceData>>,
}

#[async_trait]
impl BeforeSendHook for ServiceHook {
    async fn before_send(&self, event_type: &str, payload: Payload) -> Result<Payload> {
        if !should_fold(event_type) {
            return Ok(payload);
        }
        let mut folded = self.data.lock().take_payload();
        folded.extend(payload);
        Ok(folded)
    }

    fn name(&self) -> &'static str {
        "ServiceHook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_ticket_and_action_fold_into_event() {
        let plugin = ServicePlugin::new();
        plugin
            .invoke(
                "setTicket",
                vec![json!({
                    "id": "T-42",
                    "subject": "Login fails",
                    "productId": "P-1",
                    "priority": "high"
                })],
            )
            .unwrap();
        plugin
            .invoke("setAction", vec![json!("ticket_create"), json!({"channel": "web"})])
            .unwrap();
        assert!(plugin.has_ticket());

        let payload = plugin
            .before_send_hook()
            .before_send("event", Payload::new())
            .await
            .unwrap();
        assert_eq!(payload["svc_ticket_id"], json!("T-42"));
        assert_eq!(payload["svc_ticket_subject"], json!("Login fails"));
        assert_eq!(payload["svc_ticket_product_id"], json!("P-1"));
        assert!(!payload.contains_key("priority"));
        assert_eq!(payload["svcAction"], json!("ticket_create"));
        assert_eq!(payload["svcActionData"], json!({"channel": "web"}));
        assert!(!plugin.has_ticket());
    }

    #[tokio::test]
    async fn test_page_view_keeps_ticket() {
        let plugin = ServicePlugin::new();
        plugin.set_ticket(json!({"id": "T-1"}).as_object().cloned().unwrap());

        let payload = plugin
            .before_send_hook()
            .before_send("pageview", Payload::new())
            .await
            .unwrap();
        assert!(payload.is_empty());
        assert!(plugin.has_ticket());
    }

    #[test]
    fn test_unknown_action() {
        let err = ServicePlugin::new().invoke("closeTicket", vec![]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown action 'svc:closeTicket'. Valid values: svc:clear, svc:setAction, svc:setTicket"
        );
    }
}
