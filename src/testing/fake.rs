//! In-memory record store for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::context::{ExecutionState, RunContext};
use super::grouper::TestInstance;
use crate::common::{Error, Result};
use crate::store::{NamespaceRewriter, QueryResult, RecordStore};

/// Records every call; answers queries by substring match
#[derive(Default)]
pub struct FakeStore {
    queries: Mutex<Vec<(String, QueryResult)>>,
    records: Mutex<HashMap<String, Value>>,
    cart: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl FakeStore {
    /// Answer queries containing `needle` with `result`
    pub fn add_query(&self, needle: &str, result: QueryResult) {
        self.queries.lock().push((needle.to_string(), result));
    }

    /// Answer cart calls on `path` with `response`
    pub fn add_cart(&self, path: &str, response: Value) {
        self.cart.lock().insert(path.to_string(), response);
    }

    /// Make calls whose log line starts with `prefix` fail
    pub fn fail_on(&self, prefix: &str) {
        self.failing.lock().insert(prefix.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn log(&self, call: String) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .iter()
            .any(|prefix| call.starts_with(prefix.as_str()));
        self.calls.lock().push(call.clone());
        if failing {
            return Err(Error::record_store("fake", format!("refused {}", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn query(&self, query: &str) -> Result<QueryResult> {
        self.log(format!("query:{}", query))?;
        Ok(self
            .queries
            .lock()
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }

    async fn create(&self, sobject_type: &str, fields: &Map<String, Value>) -> Result<String> {
        self.log(format!("create:{}", sobject_type))?;
        let id = format!("{}-{}", sobject_type, self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut record = fields.clone();
        record.insert("Id".to_string(), json!(id));
        self.records.lock().insert(id.clone(), Value::Object(record));
        Ok(id)
    }

    async fn retrieve(&self, sobject_type: &str, id: &str) -> Result<Value> {
        self.log(format!("retrieve:{}/{}", sobject_type, id))?;
        self.records
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::record_store("retrieve", "NOT_FOUND"))
    }

    async fn destroy(&self, sobject_type: &str, ids: &[String]) -> Result<()> {
        self.log(format!("destroy:{}:{}", sobject_type, ids.join(",")))
    }

    async fn cart_get(&self, path: &str) -> Result<Value> {
        self.log(format!("cart_get:{}", path))?;
        Ok(self.cart.lock().get(path).cloned().unwrap_or(Value::Null))
    }

    async fn cart_post(&self, path: &str, body: &Value) -> Result<Value> {
        self.log(format!("cart_post:{}:{}", path, body))?;
        Ok(self.cart.lock().get(path).cloned().unwrap_or(Value::Null))
    }

    async fn cart_delete(&self, path: &str) -> Result<Value> {
        self.log(format!("cart_delete:{}", path))?;
        Ok(self.cart.lock().get(path).cloned().unwrap_or(json!({})))
    }
}

pub fn fake_run(store: Arc<FakeStore>) -> RunContext {
    RunContext::new(store, NamespaceRewriter::new("ns"))
}

pub fn fake_instance(actions: Vec<super::config::Action>) -> TestInstance {
    TestInstance {
        unique_key: "test-key".to_string(),
        test_name: "sample".to_string(),
        subject_type: "Product2".to_string(),
        actions,
        record: json!({
            "Name": "Phone",
            "VlocityRecordSObjectType": "Product2",
            "VlocityRecordSourceKey": "Product2/phone",
            "%vlocity_namespace%__GlobalKey__c": "phone-key"
        }),
        record_source_key: "Product2/phone".to_string(),
        data_pack_unique_key: Some("phone-key".to_string()),
        setup_failure: None,
    }
}

pub fn fake_state() -> ExecutionState {
    ExecutionState::new(&fake_instance(Vec::new()))
}
