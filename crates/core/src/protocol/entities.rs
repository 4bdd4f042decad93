// Positional keys for repeated entities
//
// Products:     pr{N}{key}          (N is 1-based)
// Impressions:  il{N}pi{M}{key}     (list N, impression M, both 1-based)
// List names:   il{N}nm
// Entity custom objects travel as pr{N}custom / il{N}pi{M}custom until the
// custom-flattening stage splices them into pr{N}{field}.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::keys::{lookup, IMPRESSION_KEYS, PRODUCT_KEYS, TICKET_KEYS};
use crate::payload::{Payload, CUSTOM_KEY};

static PRODUCT_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^pr[0-9]+(id|nm|br|ca|va|pr|qt|cc|ps|group|custom)$").expect("valid regex")
});

static IMPRESSION_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^il[0-9]+pi[0-9]+(id|nm|br|ca|va|ps|pr|group|custom)$").expect("valid regex")
});

static LIST_NAME_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^il[0-9]+nm$").expect("valid regex"));

static ENTITY_CUSTOM_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(pr[0-9]+|il[0-9]+pi[0-9]+)custom$").expect("valid regex"));

/// Prefix for the Nth product
pub fn product_prefix(index: usize) -> String {
    format!("pr{}", index)
}

/// Prefix for the Mth impression of the Nth list
pub fn impression_prefix(list_index: usize, position: usize) -> String {
    format!("il{}pi{}", list_index, position)
}

/// Key carrying the display name of the Nth list
pub fn list_name_key(list_index: usize) -> String {
    format!("il{}nm", list_index)
}

fn prefix_fields(prefix: &str, table: &[(&str, &'static str)], entity: &Payload) -> Payload {
    entity
        .iter()
        .map(|(key, value)| {
            let short = lookup(table, key).unwrap_or(key.as_str());
            (format!("{}{}", prefix, short), value.clone())
        })
        .collect()
}

/// Convert the Nth product (1-based) to positional wire keys
pub fn product_keys(product: &Payload, index: usize) -> Payload {
    prefix_fields(&product_prefix(index), PRODUCT_KEYS, product)
}

/// Convert the Mth impression of the Nth list to positional wire keys
pub fn impression_keys(impression: &Payload, list_index: usize, position: usize) -> Payload {
    prefix_fields(
        &impression_prefix(list_index, position),
        IMPRESSION_KEYS,
        impression,
    )
}

/// Convert a support ticket to `svc_ticket_*` keys; unknown fields are dropped
pub fn ticket_keys(ticket: &Payload) -> Payload {
    ticket
        .iter()
        .filter_map(|(key, value)| {
            lookup(TICKET_KEYS, key).map(|short| (short.to_string(), value.clone()))
        })
        .collect()
}

/// Product key recognized by prefix and suffix
pub fn is_product_key(key: &str) -> bool {
    PRODUCT_KEY.is_match(key)
}

/// Impression key recognized by prefix and suffix
pub fn is_impression_key(key: &str) -> bool {
    IMPRESSION_KEY.is_match(key)
}

/// Impression list name key
pub fn is_list_name_key(key: &str) -> bool {
    LIST_NAME_KEY.is_match(key)
}

/// Any entity-shaped key
pub fn is_entity_key(key: &str) -> bool {
    is_product_key(key) || is_impression_key(key) || is_list_name_key(key)
}

/// If `key` is an entity custom object key, return its entity prefix
pub fn entity_custom_prefix(key: &str) -> Option<&str> {
    ENTITY_CUSTOM_KEY
        .captures(key)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Flatten an entity custom object, keeping the entity prefix
pub fn flatten_entity_custom(prefix: &str, custom: Value) -> Payload {
    match custom {
        Value::Object(fields) => fields
            .into_iter()
            .map(|(key, value)| (format!("{}{}", prefix, key), value))
            .collect(),
        other => {
            let mut payload = Payload::new();
            payload.insert(format!("{}{}", prefix, CUSTOM_KEY), other);
            payload
        }
    }
}
