//! Engine-neutral value model.
//!
//! Both script engines lower their native values into [`GuestValue`] at the
//! host boundary, so the HTTP layer, the JSON helpers and result validation
//! only ever deal with one shape regardless of which engine produced it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::Result;

/// A value crossing the host/guest boundary.
///
/// Maps use `BTreeMap` so that serialized output is deterministic no matter
/// which engine produced the value.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestValue {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<GuestValue>),
    Map(BTreeMap<String, GuestValue>),
}

/// Indentation mode for [`GuestValue::encode_json`].
#[derive(Debug, Clone, PartialEq)]
pub enum JsonIndent {
    Compact,
    Spaces(usize),
    Custom(String),
}

impl GuestValue {
    pub fn string(s: impl Into<String>) -> Self {
        GuestValue::String(s.into())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, GuestValue::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GuestValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GuestValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, GuestValue>> {
        match self {
            GuestValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[GuestValue]> {
        match self {
            GuestValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Map lookup; `Nil` for missing keys or non-map receivers.
    pub fn get(&self, key: &str) -> &GuestValue {
        match self {
            GuestValue::Map(m) => m.get(key).unwrap_or(&GuestValue::Nil),
            _ => &GuestValue::Nil,
        }
    }

    /// Lenient scalar-to-string coercion used by result validation.
    ///
    /// Strings pass through, numbers and booleans are formatted, everything
    /// else yields `None`. Whole numbers print without a fractional part.
    pub fn coerce_string(&self) -> Option<String> {
        match self {
            GuestValue::String(s) => Some(s.clone()),
            GuestValue::Bool(b) => Some(b.to_string()),
            GuestValue::Number(n) => Some(format_number(*n)),
            _ => None,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => GuestValue::Nil,
            serde_json::Value::Bool(b) => GuestValue::Bool(b),
            serde_json::Value::Number(n) => GuestValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => GuestValue::String(s),
            serde_json::Value::Array(items) => {
                GuestValue::List(items.into_iter().map(GuestValue::from_json).collect())
            }
            serde_json::Value::Object(fields) => GuestValue::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, GuestValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            GuestValue::Nil => serde_json::Value::Null,
            GuestValue::Bool(b) => serde_json::Value::Bool(*b),
            GuestValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            GuestValue::String(s) => serde_json::Value::String(s.clone()),
            GuestValue::List(items) => {
                serde_json::Value::Array(items.iter().map(GuestValue::to_json).collect())
            }
            GuestValue::Map(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn decode_json(text: &str) -> Result<GuestValue> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(GuestValue::from_json(value))
    }

    pub fn encode_json(&self, indent: &JsonIndent) -> Result<String> {
        let json = self.to_json();
        let pad = match indent {
            JsonIndent::Compact => return Ok(serde_json::to_string(&json)?),
            JsonIndent::Spaces(n) => " ".repeat(*n),
            JsonIndent::Custom(s) => s.clone(),
        };
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        json.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let text = r#"{"name":"test","count":3,"tags":["a","b"],"meta":{"ok":true},"gone":null}"#;
        let value = GuestValue::decode_json(text).unwrap();
        assert_eq!(value.get("name").as_str(), Some("test"));
        assert_eq!(value.get("count").as_f64(), Some(3.0));
        assert_eq!(value.get("tags").as_list().unwrap().len(), 2);
        assert!(value.get("gone").is_nil());

        let encoded = value.encode_json(&JsonIndent::Compact).unwrap();
        let reparsed = GuestValue::decode_json(&encoded).unwrap();
        assert_eq!(value, reparsed);
    }

    #[test]
    fn test_empty_list_encodes_as_array() {
        let value = GuestValue::List(vec![]);
        assert_eq!(value.encode_json(&JsonIndent::Compact).unwrap(), "[]");
        // An empty container comes back as a map: engines cannot tell an
        // empty array apart from an empty object.
        let back = GuestValue::decode_json("{}").unwrap();
        assert_eq!(back, GuestValue::Map(BTreeMap::new()));
    }

    #[test]
    fn test_indent_modes() {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), GuestValue::Number(1.0));
        let value = GuestValue::Map(fields);

        assert_eq!(
            value.encode_json(&JsonIndent::Compact).unwrap(),
            r#"{"a":1.0}"#
        );
        let spaced = value.encode_json(&JsonIndent::Spaces(2)).unwrap();
        assert!(spaced.contains("\n  \"a\""));
        let custom = value.encode_json(&JsonIndent::Custom("\t".to_string())).unwrap();
        assert!(custom.contains("\n\t\"a\""));
    }

    #[test]
    fn test_coerce_string() {
        assert_eq!(GuestValue::Number(8.0).coerce_string().unwrap(), "8");
        assert_eq!(GuestValue::Number(8.5).coerce_string().unwrap(), "8.5");
        assert_eq!(GuestValue::Bool(true).coerce_string().unwrap(), "true");
        assert_eq!(GuestValue::string("x").coerce_string().unwrap(), "x");
        assert!(GuestValue::Nil.coerce_string().is_none());
        assert!(GuestValue::List(vec![]).coerce_string().is_none());
    }

    #[test]
    fn test_non_finite_numbers_encode_as_null() {
        let value = GuestValue::Number(f64::NAN);
        assert_eq!(value.encode_json(&JsonIndent::Compact).unwrap(), "null");
    }
}
