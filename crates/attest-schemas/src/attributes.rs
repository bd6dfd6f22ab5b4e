//! Canonical attribute sets.
//!
//! An [`AttributeSet`] is the normalized identity of an order's data: a set of
//! unique key/value pairs whose values have been coerced to strings. Order of
//! insertion never matters; two sets are equal only when every pair
//! corresponds exactly and both sets have the same size.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Cap on attribute pairs used when no configured value is supplied.
pub const DEFAULT_MAX_ATTRIBUTES: usize = 4;

/// Reasons a loosely-typed attribute record cannot become an [`AttributeSet`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributeError {
    #[error("attribute payload must be a JSON object")]
    NotAnObject,
    #[error("attribute set must not be empty")]
    Empty,
    #[error("attribute set has {count} pairs; at most {max} allowed")]
    TooMany { count: usize, max: usize },
    #[error("attribute key must not be empty")]
    EmptyKey,
    #[error("duplicate attribute key '{0}'")]
    DuplicateKey(String),
    #[error("attribute '{key}' has unsupported value type: {kind}")]
    UnsupportedValue { key: String, kind: &'static str },
    #[error("malformed attribute pair '{0}'; expected key=value")]
    MalformedPair(String),
}

/// Normalized key/value attribute set. Keys are unique and kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet(BTreeMap<String, String>);

impl AttributeSet {
    /// Coerce a JSON object into an attribute set.
    ///
    /// Strings are kept verbatim, numbers use their JSON text and booleans
    /// become `"true"`/`"false"`. Nulls, arrays and nested objects are
    /// rejected.
    pub fn from_json(value: &Value, max: usize) -> Result<Self, AttributeError> {
        let obj = value.as_object().ok_or(AttributeError::NotAnObject)?;

        let mut pairs = Vec::with_capacity(obj.len());
        for (k, v) in obj {
            let coerced = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => {
                    return Err(AttributeError::UnsupportedValue {
                        key: k.clone(),
                        kind: "null",
                    })
                }
                Value::Array(_) => {
                    return Err(AttributeError::UnsupportedValue {
                        key: k.clone(),
                        kind: "array",
                    })
                }
                Value::Object(_) => {
                    return Err(AttributeError::UnsupportedValue {
                        key: k.clone(),
                        kind: "object",
                    })
                }
            };
            pairs.push((k.clone(), coerced));
        }

        Self::from_pairs(pairs, max)
    }

    /// Build a set from explicit pairs. Keys are trimmed; a key that repeats
    /// after trimming is an error rather than a silent overwrite.
    pub fn from_pairs<I, K, V>(pairs: I, max: usize) -> Result<Self, AttributeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            let key = k.into().trim().to_string();
            if key.is_empty() {
                return Err(AttributeError::EmptyKey);
            }
            if map.contains_key(&key) {
                return Err(AttributeError::DuplicateKey(key));
            }
            map.insert(key, v.into());
        }

        if map.is_empty() {
            return Err(AttributeError::Empty);
        }
        if map.len() > max {
            return Err(AttributeError::TooMany {
                count: map.len(),
                max,
            });
        }

        Ok(Self(map))
    }

    /// Parse CLI-style `key=value` arguments. The first `=` splits the pair,
    /// so values may themselves contain `=`.
    pub fn parse_kv_args(args: &[String], max: usize) -> Result<Self, AttributeError> {
        let mut pairs = Vec::with_capacity(args.len());
        for raw in args {
            let (k, v) = raw
                .split_once('=')
                .ok_or_else(|| AttributeError::MalformedPair(raw.clone()))?;
            pairs.push((k.to_string(), v.to_string()));
        }
        Self::from_pairs(pairs, max)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// JSON object form (keys sorted).
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    /// Canonical JSON text: keys sorted, no whitespace.
    pub fn canonical_json(&self) -> String {
        // BTreeMap<String, String> serialization cannot fail.
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Lowercase hex SHA-256 of [`canonical_json`](Self::canonical_json).
    /// This is the storage identity used for uniqueness and index lookups.
    pub fn canonical_hash(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_json().as_bytes()))
    }
}
