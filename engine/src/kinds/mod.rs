//! Built-in kind adapters.
//!
//! Each adapter maps one CRM object type between its remote property bag and
//! local JSON data.

mod company;
mod contact;
mod deal;

pub use company::CompanyKind;
pub use contact::{ContactConfig, ContactKind};
pub use deal::{DealConfig, DealKind, DealStage};

use crate::RemoteProperties;
use serde_json::Value;

/// Remote string value of `name`, `""` when missing or null.
pub(crate) fn remote_str<'a>(props: &'a RemoteProperties, name: &str) -> &'a str {
    props.get(name).and_then(Option::as_deref).unwrap_or("")
}

/// Remote value of `name` as a JSON string, `null` when missing or empty.
pub(crate) fn remote_opt(props: &RemoteProperties, name: &str) -> Value {
    match remote_str(props, name) {
        "" => Value::Null,
        s => Value::String(s.to_string()),
    }
}

/// Local value in its remote string form. Null becomes `""`.
pub(crate) fn api_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A string list as one `;`-joined remote value.
pub(crate) fn api_list(value: &Value) -> String {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(";")
        })
        .unwrap_or_default()
}

/// Split a `;`-joined remote value into a JSON string list.
pub(crate) fn remote_list(props: &RemoteProperties, name: &str) -> Value {
    let items = remote_str(props, name)
        .split(';')
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
        .collect();
    Value::Array(items)
}

pub(crate) fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote(pairs: &[(&str, Option<&str>)]) -> RemoteProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(String::from)))
            .collect()
    }

    #[test]
    fn remote_values() {
        let props = remote(&[("a", Some("x")), ("b", None), ("c", Some(""))]);
        assert_eq!(remote_str(&props, "a"), "x");
        assert_eq!(remote_str(&props, "b"), "");
        assert_eq!(remote_str(&props, "missing"), "");
        assert_eq!(remote_opt(&props, "a"), json!("x"));
        assert_eq!(remote_opt(&props, "c"), Value::Null);
    }

    #[test]
    fn lists_join_with_semicolons() {
        let props = remote(&[("d", Some("a.com;b.com")), ("e", Some(""))]);
        assert_eq!(remote_list(&props, "d"), json!(["a.com", "b.com"]));
        assert_eq!(remote_list(&props, "e"), json!([]));
        assert_eq!(api_list(&json!(["a.com", "b.com"])), "a.com;b.com");
        assert_eq!(api_list(&Value::Null), "");
    }

    #[test]
    fn api_strings() {
        assert_eq!(api_string(&Value::Null), "");
        assert_eq!(api_string(&json!("x")), "x");
        assert_eq!(api_string(&json!(12.5)), "12.5");
        assert_eq!(api_string(&json!(true)), "true");
    }
}
