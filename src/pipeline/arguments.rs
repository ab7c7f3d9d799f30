use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Arguments exactly as the transport handed them over
///
/// Positional arguments usually come from path captures, named ones from
/// named captures. Nothing here has been decoded yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArguments {
    /// Positional raw values, in capture order
    #[serde(default)]
    pub positional: Vec<String>,

    /// Named raw values
    #[serde(default)]
    pub named: BTreeMap<String, String>,
}

impl RawArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positional(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// Decoded arguments shared by every stage of one dispatch
///
/// Decoding happens once per request; the executor hands the same
/// `Arguments` to `before`, the action, `after` and `after_finish`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl Arguments {
    /// Create an empty argument set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    ///
    /// # Example
    /// ```
    /// use gauntlet::pipeline::Arguments;
    /// use serde_json::json;
    ///
    /// let args = Arguments::new()
    ///     .with_positional(json!("42"))
    ///     .with_named("user", json!({"id": "123", "email": "user@example.com"}));
    ///
    /// assert_eq!(args.get(0), Some(&json!("42")));
    /// ```
    pub fn with_positional(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    /// Set a named argument
    pub fn with_named(mut self, name: impl Into<String>, value: Value) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    /// Positional argument by index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Named argument by name (top-level only)
    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named_arguments(&self) -> &BTreeMap<String, Value> {
        &self.named
    }

    /// Check if a named argument exists
    pub fn has(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
