// Ecommerce plugin ("ec")
//
// Accumulates products, impressions and a product action between events and
// folds them into the next non-page-view plugin event as positional keys
// (pr{N}.., il{N}pi{M}.., il{N}nm). Folding clears the accumulated data.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use trackline_core::payload::{convert_numeric, to_form_value};
use trackline_core::protocol::{impression_keys, list_name_key, product_keys};
use trackline_core::{BeforeSendHook, Payload, Result};

use crate::base::should_fold;
use crate::plugin::{object_arg, string_arg, unknown_action, Plugin};

pub const ECOMMERCE_PLUGIN_ID: &str = "ec";

const ACTIONS: &[&str] = &["addProduct", "addImpression", "setAction", "clear"];

/// Entity fields sent as numbers when they look numeric
const NUMERIC_FIELDS: [&str; 2] = ["position", "quantity"];

#[derive(Debug, Clone, Default, PartialEq)]
struct ImpressionList {
    name: String,
    impressions: Vec<Payload>,
}

#[derive(Debug, Default)]
struct EcommerceData {
    products: Vec<Payload>,
    impression_lists: Vec<ImpressionList>,
    action: Option<String>,
    action_data: Payload,
}

impl EcommerceData {
    fn add_product(&mut self, product: Payload) {
        self.products.push(coerce_numeric_fields(product));
    }

    fn add_impression(&mut self, mut impression: Payload) {
        let name = impression
            .remove("list")
            .map(|v| to_form_value(&v))
            .unwrap_or_default();
        let impression = coerce_numeric_fields(impression);

        match self.impression_lists.iter_mut().find(|l| l.name == name) {
            Some(list) => list.impressions.push(impression),
            None => self.impression_lists.push(ImpressionList {
                name,
                impressions: vec![impression],
            }),
        }
    }

    /// Positional payload for everything accumulated, then reset
    fn take_payload(&mut self) -> Payload {
        let mut payload = Payload::new();

        for (list_index, list) in self.impression_lists.iter().enumerate() {
            let list_number = list_index + 1;
            if !list.name.is_empty() {
                payload.insert(list_name_key(list_number), Value::String(list.name.clone()));
            }
            for (position, impression) in list.impressions.iter().enumerate() {
                payload.extend(impression_keys(impression, list_number, position + 1));
            }
        }

        for (index, product) in self.products.iter().enumerate() {
            payload.extend(product_keys(product, index + 1));
        }

        if let Some(action) = &self.action {
            payload.insert("action".to_string(), Value::String(action.clone()));
            payload.extend(self.action_data.clone());
        }

        *self = Self::default();
        payload
    }
}

fn coerce_numeric_fields(mut entity: Payload) -> Payload {
    for field in NUMERIC_FIELDS {
        if let Some(value) = entity.get_mut(field) {
            *value = convert_numeric(value.take());
        }
    }
    entity
}

/// Ecommerce plugin
#[derive(Default)]
pub struct EcommercePlugin {
    data: Arc<Mutex<EcommerceData>>,
}

impl EcommercePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a product for the next event
    pub fn add_product(&self, product: Payload) {
        self.data.lock().add_product(product);
    }

    /// Queue an impression; its `list` field names the list it belongs to
    pub fn add_impression(&self, impression: Payload) {
        self.data.lock().add_impression(impression);
    }

    /// Set the product action (e.g. "detail", "purchase") and its options
    pub fn set_action(&self, action: impl Into<String>, options: Payload) {
        let mut data = self.data.lock();
        data.action = Some(action.into());
        data.action_data = options;
    }

    /// Number of queued products
    pub fn product_count(&self) -> usize {
        self.data.lock().products.len()
    }

    /// Number of queued impressions across all lists
    pub fn impression_count(&self) -> usize {
        self.data
            .lock()
            .impression_lists
            .iter()
            .map(|l| l.impressions.len())
            .sum()
    }
}

impl Plugin for EcommercePlugin {
    fn id(&self) -> &'static str {
        ECOMMERCE_PLUGIN_ID
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn invoke(&self, action: &str, args: Vec<Value>) -> Result<()> {
        match action {
            "addProduct" => self.add_product(object_arg(&args, 0, "ec:addProduct")?),
            "addImpression" => self.add_impression(object_arg(&args, 0, "ec:addImpression")?),
            "setAction" => {
                let name = string_arg(&args, 0, "ec:setAction")?;
                let options = object_arg(&args, 1, "ec:setAction")?;
                self.set_action(name, options);
            }
            "clear" => self.clear(),
            _ => return Err(unknown_action(self, action)),
        }
        Ok(())
    }

    fn before_send_hook(&self) -> Arc<dyn BeforeSendHook> {
        Arc::new(EcommerceHook {
            data: self.data.clone(),
        })
    }

    fn clear(&self) {
        *self.data.lock() = EcommerceData::default();
    }
}

struct EcommerceHook {
    data: Arc<Mutex<EcommerceData>>,
}

#[async_trait]
impl BeforeSendHook for EcommerceHook {
    async fn before_send(&self, event_type: &str, payload: Payload) -> Result<Payload> {
        if !should_fold(event_type) {
            return Ok(payload);
        }
        let mut folded = self.data.lock().take_payload();
        folded.extend(payload);
        Ok(folded)
    }

    fn name(&self) -> &'static str {
        "EcommerceHook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_products_fold_into_event_and_clear() {
        let plugin = EcommercePlugin::new();
        plugin
            .invoke(
                "addProduct",
                vec![json!({"id": "C0V30", "name": "Kayak", "quantity": "2", "position": "1"})],
            )
            .unwrap();
        plugin
            .invoke("addProduct", vec![json!({"id": "P-2", "price": 12.5})])
            .unwrap();
        let hook = plugin.before_send_hook();

        let payload = hook
            .before_send("event", as_map(json!({"eventCategory": "cart"})))
            .await
            .unwrap();
        assert_eq!(payload["pr1id"], json!("C0V30"));
        assert_eq!(payload["pr1nm"], json!("Kayak"));
        assert_eq!(payload["pr1qt"], json!(2));
        assert_eq!(payload["pr1ps"], json!(1));
        assert_eq!(payload["pr2id"], json!("P-2"));
        assert_eq!(payload["pr2pr"], json!(12.5));
        assert_eq!(payload["eventCategory"], json!("cart"));
        assert_eq!(plugin.product_count(), 0);

        let next = hook.before_send("event", Payload::new()).await.unwrap();
        assert!(!next.contains_key("pr1id"));
    }

    #[tokio::test]
    async fn test_page_view_preserves_entities() {
        let plugin = EcommercePlugin::new();
        plugin.add_product(as_map(json!({"id": "C0V30"})));
        let hook = plugin.before_send_hook();

        let page_view = hook.before_send("pageview", Payload::new()).await.unwrap();
        assert!(!page_view.contains_key("pr1id"));
        assert_eq!(plugin.product_count(), 1);

        let event = hook.before_send("event", Payload::new()).await.unwrap();
        assert_eq!(event["pr1id"], json!("C0V30"));
    }

    #[tokio::test]
    async fn test_impressions_group_by_list_in_first_seen_order() {
        let plugin = EcommercePlugin::new();
        plugin.add_impression(as_map(json!({"id": "a", "list": "search results"})));
        plugin.add_impression(as_map(json!({"id": "b", "list": "related"})));
        plugin.add_impression(as_map(json!({"id": "c", "list": "search results", "position": "3"})));
        assert_eq!(plugin.impression_count(), 3);

        let payload = plugin
            .before_send_hook()
            .before_send("event", Payload::new())
            .await
            .unwrap();
        assert_eq!(payload["il1nm"], json!("search results"));
        assert_eq!(payload["il1pi1id"], json!("a"));
        assert_eq!(payload["il1pi2id"], json!("c"));
        assert_eq!(payload["il1pi2ps"], json!(3));
        assert_eq!(payload["il2nm"], json!("related"));
        assert_eq!(payload["il2pi1id"], json!("b"));
        assert!(!payload.contains_key("il1pi1list"));
    }

    #[tokio::test]
    async fn test_set_action_adds_action_fields() {
        let plugin = EcommercePlugin::new();
        plugin
            .invoke(
                "setAction",
                vec![json!("purchase"), json!({"id": "T-1", "revenue": 42})],
            )
            .unwrap();

        let payload = plugin
            .before_send_hook()
            .before_send("event", Payload::new())
            .await
            .unwrap();
        assert_eq!(payload["action"], json!("purchase"));
        assert_eq!(payload["id"], json!("T-1"));
        assert_eq!(payload["revenue"], json!(42));
    }

    #[tokio::test]
    async fn test_legacy_events_are_untouched() {
        let plugin = EcommercePlugin::new();
        plugin.add_product(as_map(json!({"id": "C0V30"})));
        let payload = plugin
            .before_send_hook()
            .before_send("search", Payload::new())
            .await
            .unwrap();
        assert!(payload.is_empty());
        assert_eq!(plugin.product_count(), 1);
    }

    #[test]
    fn test_clear_and_invalid_arguments() {
        let plugin = EcommercePlugin::new();
        plugin.add_product(as_map(json!({"id": "C0V30"})));
        plugin.invoke("clear", vec![]).unwrap();
        assert_eq!(plugin.product_count(), 0);

        assert!(plugin.invoke("addProduct", vec![json!("C0V30")]).is_err());
        assert!(plugin.invoke("setAction", vec![]).is_err());
    }
}
