//! Namespace placeholder substitution
//!
//! Test files, query templates and object templates refer to managed package
//! fields through a placeholder so that they work in any org.

use serde_json::{Map, Value};

/// Placeholder replaced by the org's namespace
pub const NAMESPACE_TOKEN: &str = "%vlocity_namespace%";

/// Rewrites the namespace placeholder in strings and JSON values
#[derive(Debug, Clone)]
pub struct NamespaceRewriter {
    namespace: String,
}

impl NamespaceRewriter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Substitute the placeholder in a string
    ///
    /// With an empty namespace the `__` separator is dropped as well.
    pub fn rewrite(&self, text: &str) -> String {
        if self.namespace.is_empty() {
            text.replace(&format!("{}__", NAMESPACE_TOKEN), "")
                .replace(NAMESPACE_TOKEN, "")
        } else {
            text.replace(NAMESPACE_TOKEN, &self.namespace)
        }
    }

    /// Substitute the placeholder in every key and string of a value
    pub fn rewrite_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.rewrite(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.rewrite_value(v)).collect()),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, v) in map {
                    out.insert(self.rewrite(key), self.rewrite_value(v));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Turn an org-specific name back into its placeholder form
    pub fn to_placeholder(&self, text: &str) -> String {
        if self.namespace.is_empty() {
            return text.to_string();
        }
        text.replace(
            &format!("{}__", self.namespace),
            &format!("{}__", NAMESPACE_TOKEN),
        )
    }
}
