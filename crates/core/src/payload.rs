// Payload shaping helpers
//
// Stages of the send pipeline that only look at the payload itself:
// argument resolution, empty-value removal and field validation.

use serde_json::{Map, Value};

/// An event payload: ordered string keys to JSON values
pub type Payload = Map<String, Value>;

/// Key that may carry a nested object of caller-defined fields
pub const CUSTOM_KEY: &str = "custom";

/// String forms of `anonymizeIp` that mean "do not anonymize"
const FALSY_FLAG_VALUES: [&str; 7] = ["0", "false", "undefined", "null", "{}", "[]", ""];

/// Turn positional arguments into a payload.
///
/// With `names`, primitives are matched left-to-right until the first object,
/// whose keys are merged over what was matched; the object ends parsing.
/// Without names the first argument is the payload when it is an object.
pub fn resolve_payload(names: &[String], args: Vec<Value>) -> Payload {
    if names.is_empty() {
        return match args.into_iter().next() {
            Some(Value::Object(map)) => map,
            _ => Payload::new(),
        };
    }

    let mut payload = Payload::new();
    for (index, arg) in args.into_iter().enumerate() {
        match arg {
            Value::Object(map) => {
                for (key, value) in map {
                    payload.insert(key, value);
                }
                break;
            }
            // Arrays are not positional values either
            Value::Array(_) => break,
            primitive => {
                if let Some(name) = names.get(index) {
                    payload.insert(name.clone(), primitive);
                }
            }
        }
    }
    payload
}

/// True for the values the pipeline treats as "no value"
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Drop null and empty-string values, except for the allow-listed keys
pub fn remove_empty_values(payload: Payload, allowed_empty: &[&str]) -> Payload {
    payload
        .into_iter()
        .filter(|(key, value)| allowed_empty.contains(&key.as_str()) || !is_empty_value(value))
        .collect()
}

/// Coerce special-case fields to their canonical wire form.
///
/// `anonymizeIp` becomes `1` unless its string form is one of the falsy
/// representations, in which case it is removed.
pub fn validate_params(mut payload: Payload) -> Payload {
    if let Some(flag) = payload.remove("anonymizeIp") {
        let text = match &flag {
            Value::String(s) => s.to_lowercase(),
            Value::Null => "null".to_string(),
            other => other.to_string().to_lowercase(),
        };
        if !FALSY_FLAG_VALUES.contains(&text.as_str()) {
            payload.insert("anonymizeIp".to_string(), Value::from(1));
        }
    }
    payload
}

/// Convert numeric-looking strings to numbers; anything else passes through.
pub fn convert_numeric(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(int) = trimmed.parse::<i64>() {
                Value::from(int)
            } else if let Some(number) = trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .and_then(serde_json::Number::from_f64)
            {
                Value::Number(number)
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}

/// Insert `key` at the front of the payload; a value already present wins
pub fn prepend(payload: Payload, key: &str, value: Value) -> Payload {
    let mut result = Payload::with_capacity(payload.len() + 1);
    result.insert(key.to_string(), value);
    for (k, v) in payload {
        result.insert(k, v);
    }
    result
}

/// Flatten a scalar into its form-encoded string representation
pub fn to_form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn as_map(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resolve_without_names_uses_first_object() {
        let payload = resolve_payload(&[], vec![json!({"a": 1}), json!({"b": 2})]);
        assert_eq!(payload, as_map(json!({"a": 1})));

        let payload = resolve_payload(&[], vec![json!("text")]);
        assert!(payload.is_empty());

        assert!(resolve_payload(&[], vec![]).is_empty());
    }

    #[test]
    fn test_resolve_positional_arguments() {
        let payload = resolve_payload(
            &names(&["eventCategory", "eventAction", "eventLabel", "eventValue"]),
            vec![json!("cat"), json!("act"), json!("lbl"), json!(3)],
        );
        assert_eq!(
            payload,
            as_map(json!({
                "eventCategory": "cat",
                "eventAction": "act",
                "eventLabel": "lbl",
                "eventValue": 3
            }))
        );
    }

    #[test]
    fn test_resolve_object_overrides_positional_and_stops() {
        let payload = resolve_payload(
            &names(&["eventCategory", "eventAction", "eventLabel"]),
            vec![
                json!("cat"),
                json!({"eventCategory": "override", "extra": true}),
                json!("ignored"),
            ],
        );
        assert_eq!(
            payload,
            as_map(json!({"eventCategory": "override", "extra": true}))
        );
    }

    #[test]
    fn test_resolve_ignores_extra_primitives() {
        let payload = resolve_payload(&names(&["page"]), vec![json!("/home"), json!("extra")]);
        assert_eq!(payload, as_map(json!({"page": "/home"})));
    }

    #[test]
    fn test_remove_empty_values() {
        let payload = as_map(json!({
            "queryText": "",
            "a": null,
            "b": "",
            "c": 0,
            "d": false,
            "e": "value"
        }));

        let cleaned = remove_empty_values(payload.clone(), &[]);
        assert_eq!(cleaned, as_map(json!({"c": 0, "d": false, "e": "value"})));

        let cleaned = remove_empty_values(payload, &["queryText"]);
        assert_eq!(cleaned.get("queryText"), Some(&json!("")));
        assert!(!cleaned.contains_key("a"));
    }

    #[test]
    fn test_anonymize_ip_falsy_values_are_dropped() {
        for falsy in [
            json!("0"),
            json!("false"),
            json!("False"),
            json!(""),
            json!(null),
            json!("undefined"),
            json!(0),
            json!(false),
            json!({}),
            json!([]),
        ] {
            let payload = validate_params(as_map(json!({"anonymizeIp": falsy.clone()})));
            assert!(
                !payload.contains_key("anonymizeIp"),
                "{:?} should be dropped",
                falsy
            );
        }

        let payload = validate_params(Payload::new());
        assert!(!payload.contains_key("anonymizeIp"));
    }

    #[test]
    fn test_anonymize_ip_truthy_values_become_one() {
        for truthy in [json!("1"), json!("true"), json!(true), json!(1), json!("yes")] {
            let payload = validate_params(as_map(json!({"anonymizeIp": truthy})));
            assert_eq!(payload.get("anonymizeIp"), Some(&json!(1)));
        }
    }

    #[test]
    fn test_convert_numeric() {
        assert_eq!(convert_numeric(json!("2")), json!(2));
        assert_eq!(convert_numeric(json!(" 10 ")), json!(10));
        assert_eq!(convert_numeric(json!("1.5")), json!(1.5));
        assert_eq!(convert_numeric(json!("two")), json!("two"));
        assert_eq!(convert_numeric(json!("")), json!(""));
        assert_eq!(convert_numeric(json!(4)), json!(4));
    }

    #[test]
    fn test_prepend_puts_key_first() {
        let payload = prepend(as_map(json!({"a": 1})), "cid", json!("visitor"));
        let keys: Vec<&str> = payload.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["cid", "a"]);
    }

    #[test]
    fn test_prepend_keeps_caller_value() {
        let payload = as_map(json!({"a": 1, "cid": "explicit"}));
        let payload = prepend(payload, "cid", json!("generated"));
        let keys: Vec<&str> = payload.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["cid", "a"]);
        assert_eq!(payload.get("cid"), Some(&json!("explicit")));
    }
}
