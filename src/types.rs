use serde::{Deserialize, Serialize};
use std::fmt;

/// A single raw value fetched from a lookup source.
///
/// Sources return whatever their backend hands back; the field schema decides
/// later how (and whether) each value becomes an indexed term.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TermValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl TermValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TermValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            TermValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            TermValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TermValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for TermValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermValue::Integer(i) => write!(f, "{}", i),
            TermValue::Float(v) => write!(f, "{}", v),
            TermValue::Bool(b) => write!(f, "{}", b),
            TermValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for TermValue {
    fn from(s: &str) -> Self {
        TermValue::Text(s.to_string())
    }
}

impl From<String> for TermValue {
    fn from(s: String) -> Self {
        TermValue::Text(s)
    }
}

impl From<i64> for TermValue {
    fn from(i: i64) -> Self {
        TermValue::Integer(i)
    }
}

/// Convert a JSON scalar into a term. Nulls, arrays and objects are not terms.
pub fn json_value_to_term_value(val: &serde_json::Value) -> Option<TermValue> {
    match val {
        serde_json::Value::String(s) => Some(TermValue::Text(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(TermValue::Integer(i))
            } else {
                n.as_f64().map(TermValue::Float)
            }
        }
        serde_json::Value::Bool(b) => Some(TermValue::Bool(*b)),
        serde_json::Value::Null
        | serde_json::Value::Array(_)
        | serde_json::Value::Object(_) => None,
    }
}

/// Identifies a fetch's content for the filter cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub const SEPARATOR: char = ',';

    pub fn new(key: impl Into<String>) -> Self {
        CacheKey(key.into())
    }

    /// Every term's textual form followed by [`Self::SEPARATOR`], in fetch
    /// order. Depends only on the content, never on where it came from.
    pub fn derive(terms: &[TermValue]) -> Self {
        let mut key = String::new();
        for term in terms {
            key.push_str(&term.to_string());
            key.push(Self::SEPARATOR);
        }
        CacheKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        CacheKey::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        CacheKey(s)
    }
}
