//! Typed cache keys and invalidation patterns
//!
//! Keys render as `namespace:operation[:params-hash]`. Patterns decide which
//! keys an invalidation touches:
//!
//! - [`KeyPattern::Exact`] matches one key
//! - [`KeyPattern::Prefix`] matches every key starting with the prefix
//! - [`KeyPattern::Scope`] matches a key and every key nested under it
//!   (`scope` itself or anything starting with `scope:`)
//!
//! The textual form used in rule tables is `"name"` for an exact key and
//! `"name*"` for a prefix.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const SEPARATOR: char = ':';
const WILDCARD: char = '*';

/// A validated cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start building a key in `namespace`
    pub fn builder(namespace: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder::new(namespace)
    }

    /// Key for a call whose arguments are hashable
    pub fn for_args<A: Hash + ?Sized>(namespace: &str, operation: &str, args: &A) -> Result<Self> {
        validate_segment("namespace", namespace)?;
        validate_segment("operation", operation)?;
        Ok(CacheKey(format!(
            "{}{}{}{}{}",
            namespace,
            SEPARATOR,
            operation,
            SEPARATOR,
            hash_of(args)
        )))
    }

    /// Pattern covering every key in `namespace`
    pub fn namespace_scope(namespace: &str) -> Result<KeyPattern> {
        validate_segment("namespace", namespace)?;
        Ok(KeyPattern::Scope(namespace.to_string()))
    }

    /// Pattern covering `namespace:operation` and all its parameterized keys
    pub fn operation_scope(namespace: &str, operation: &str) -> Result<KeyPattern> {
        validate_segment("namespace", namespace)?;
        validate_segment("operation", operation)?;
        Ok(KeyPattern::Scope(format!("{}{}{}", namespace, SEPARATOR, operation)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Builder for [`CacheKey`]
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    operation: Option<String>,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            operation: None,
            params: Vec::new(),
        }
    }

    /// Set the operation (the read view) inside the namespace
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Add a parameter; parameter order does not affect the key
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Build the cache key
    pub fn build(mut self) -> Result<CacheKey> {
        validate_segment("namespace", &self.namespace)?;
        let mut key = self.namespace;

        if let Some(operation) = &self.operation {
            validate_segment("operation", operation)?;
            key.push(SEPARATOR);
            key.push_str(operation);
        } else if !self.params.is_empty() {
            return Err(CacheError::invalid("params require an operation"));
        }

        if !self.params.is_empty() {
            self.params.sort();
            key.push(SEPARATOR);
            key.push_str(&hash_of(&self.params));
        }

        Ok(CacheKey(key))
    }
}

/// Which keys an invalidation removes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeyPattern {
    Exact(String),
    Prefix(String),
    Scope(String),
}

impl KeyPattern {
    /// Parse the textual form (`"name"` or `"name*"`)
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(CacheError::invalid("pattern must not be empty"));
        }

        match pattern.find(WILDCARD) {
            None => Ok(KeyPattern::Exact(pattern.to_string())),
            Some(pos) if pos == pattern.len() - 1 => {
                let prefix = &pattern[..pos];
                if prefix.is_empty() {
                    return Err(CacheError::invalid(
                        "a bare '*' pattern would match every key; use clear() instead",
                    ));
                }
                Ok(KeyPattern::Prefix(prefix.to_string()))
            }
            Some(_) => Err(CacheError::invalid(format!(
                "'*' is only allowed at the end of a pattern: {}",
                pattern
            ))),
        }
    }

    /// Whether `key` is covered by this pattern
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(exact) => key == exact,
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::Scope(scope) => {
                key == scope
                    || (key.starts_with(scope.as_str())
                        && key[scope.len()..].starts_with(SEPARATOR))
            }
        }
    }

    /// The single key this pattern names, if it is exact
    pub fn as_exact(&self) -> Option<&str> {
        match self {
            KeyPattern::Exact(exact) => Some(exact),
            _ => None,
        }
    }
}

impl FromStr for KeyPattern {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        KeyPattern::parse(s)
    }
}

impl From<CacheKey> for KeyPattern {
    fn from(key: CacheKey) -> Self {
        KeyPattern::Exact(key.0)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(exact) => write!(f, "{}", exact),
            KeyPattern::Prefix(prefix) => write!(f, "{}{}", prefix, WILDCARD),
            KeyPattern::Scope(scope) => write!(f, "{}{}{}", scope, SEPARATOR, WILDCARD),
        }
    }
}

fn validate_segment(what: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(CacheError::invalid(format!("{} must not be empty", what)));
    }
    if segment.contains(SEPARATOR) || segment.contains(WILDCARD) {
        return Err(CacheError::invalid(format!(
            "{} must not contain '{}' or '{}': {}",
            what, SEPARATOR, WILDCARD, segment
        )));
    }
    Ok(())
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
