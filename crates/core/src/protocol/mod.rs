// Measurement protocol mapping
//
// Pure translation from descriptive field names to the short,
// length-constrained key vocabulary of the collection endpoint.
// Used by the dispatcher for event types that opt into protocol mapping.

mod entities;
mod keys;

use serde_json::Value;
use tracing::debug;

use crate::payload::{Payload, CUSTOM_KEY};

pub use entities::{
    entity_custom_prefix, flatten_entity_custom, impression_keys, impression_prefix,
    is_entity_key, is_impression_key, is_list_name_key, is_product_key, list_name_key,
    product_keys, product_prefix, ticket_keys,
};
pub use keys::{
    BASE_KEYS, EXTENSION_KEYS, IMPRESSION_KEYS, PRODUCT_ACTION_KEYS, PRODUCT_KEYS,
    SERVICE_ACTION_KEYS, TICKET_KEYS, TRANSACTION_KEYS,
};

/// Short wire key for a top-level internal field name
pub fn short_key(key: &str) -> Option<&'static str> {
    keys::TOP_LEVEL_TABLES
        .iter()
        .find_map(|table| keys::lookup(table, key))
}

/// Translate every top-level key that has a short form.
///
/// Keys without a translation (already-short keys, entity keys, `custom`,
/// extension fields) are kept as they are.
pub fn convert_keys(payload: Payload) -> Payload {
    payload
        .into_iter()
        .map(|(key, value)| match short_key(&key) {
            Some(short) => (short.to_string(), value),
            None => (key, value),
        })
        .collect()
}

/// True when `key` is part of the wire vocabulary
pub fn is_known_key(key: &str) -> bool {
    key == CUSTOM_KEY
        || keys::TOP_LEVEL_TABLES
            .iter()
            .any(|table| table.iter().any(|(_, short)| *short == key))
        || TICKET_KEYS.iter().any(|(_, short)| *short == key)
        || EXTENSION_KEYS.contains(&key)
        || is_entity_key(key)
}

/// Drop keys outside the wire vocabulary
pub fn remove_unknown_keys(payload: Payload) -> Payload {
    payload
        .into_iter()
        .filter(|(key, _)| {
            let known = is_known_key(key);
            if !known {
                debug!(key = %key, "Dropping unknown analytics parameter");
            }
            known
        })
        .collect()
}

/// Splice `custom` and entity custom objects into the top level.
///
/// Custom entries are applied first and named fields layered over them, so a
/// named field always wins over a custom entry with the same key.
pub fn flatten_custom(payload: Payload) -> Payload {
    let mut custom_layer = Payload::new();
    let mut named = Payload::with_capacity(payload.len());

    for (key, value) in payload {
        if key == CUSTOM_KEY {
            if let Value::Object(fields) = value {
                custom_layer.extend(fields);
            }
        } else if let Some(prefix) = entity_custom_prefix(&key) {
            let prefix = prefix.to_string();
            custom_layer.extend(flatten_entity_custom(&prefix, value));
        } else {
            named.insert(key, value);
        }
    }

    custom_layer.extend(named);
    custom_layer
}
