//! Record store access
//!
//! The test runner never talks HTTP directly. Everything goes through the
//! [`RecordStore`] trait so that runs can be pointed at a live org
//! ([`RestRecordStore`]) or at an in-memory fake.

mod matching_keys;
mod namespace;
mod rest;

pub use matching_keys::MatchingKeyRegistry;
pub use namespace::{NamespaceRewriter, NAMESPACE_TOKEN};
pub use rest::RestRecordStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::Result;

/// Answer of a record query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Number of records matching the query
    pub total_size: u64,
    /// Whether all matching records were returned
    #[serde(default)]
    pub done: bool,
    /// Matching records
    #[serde(default)]
    pub records: Vec<Value>,
}

impl QueryResult {
    /// `Id` of the first returned record
    pub fn first_id(&self) -> Option<&str> {
        self.records.first().and_then(|r| r.get("Id")).and_then(Value::as_str)
    }
}

/// Operations the test runner needs from the org
///
/// Cart paths are relative to the cart resource, e.g. `/carts/{id}/items`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Execute a compiled query
    async fn query(&self, query: &str) -> Result<QueryResult>;

    /// Create a record and return its id
    async fn create(&self, sobject_type: &str, fields: &Map<String, Value>) -> Result<String>;

    /// Fetch a full record by id
    async fn retrieve(&self, sobject_type: &str, id: &str) -> Result<Value>;

    /// Delete records by id
    ///
    /// Records that are already deleted are not an error.
    async fn destroy(&self, sobject_type: &str, ids: &[String]) -> Result<()>;

    /// GET on the cart resource
    async fn cart_get(&self, path: &str) -> Result<Value>;

    /// POST on the cart resource
    async fn cart_post(&self, path: &str, body: &Value) -> Result<Value>;

    /// DELETE on the cart resource
    async fn cart_delete(&self, path: &str) -> Result<Value>;
}

/// Build a query string from its parts
pub fn build_soql(fields: &str, sobject_type: &str, filter: &str) -> String {
    if filter.is_empty() {
        format!("SELECT {} FROM {}", fields, sobject_type)
    } else {
        format!("SELECT {} FROM {} WHERE {}", fields, sobject_type, filter)
    }
}
