//! Matching key definitions per object type
//!
//! A matching key is the field (or comma separated list of fields) that
//! identifies a record of a given object type across orgs.

use std::collections::HashMap;

use serde_json::Value;

use super::{build_soql, NamespaceRewriter, RecordStore};
use crate::common::Result;

const OBJECT_FIELD: &str = "%vlocity_namespace%__ObjectAPIName__c";
const KEY_FIELDS_FIELD: &str = "%vlocity_namespace%__MatchingKeyFields__c";
const METADATA_TYPE: &str = "%vlocity_namespace%__DRMatchingKey__mdt";

/// Maps object types (in placeholder form) to their matching key fields
#[derive(Debug, Clone, Default)]
pub struct MatchingKeyRegistry {
    keys: HashMap<String, String>,
}

impl MatchingKeyRegistry {
    pub fn from_map(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }

    /// Load the matching key metadata from the org
    pub async fn load(store: &dyn RecordStore, namespace: &NamespaceRewriter) -> Result<Self> {
        let query = build_soql(
            &format!("Label,{},{}", OBJECT_FIELD, KEY_FIELDS_FIELD),
            METADATA_TYPE,
            "",
        );
        let result = store.query(&namespace.rewrite(&query)).await?;

        let object_field = namespace.rewrite(OBJECT_FIELD);
        let key_field = namespace.rewrite(KEY_FIELDS_FIELD);
        let mut keys = HashMap::new();

        for record in &result.records {
            let object = record.get(&object_field).and_then(Value::as_str);
            let fields = record.get(&key_field).and_then(Value::as_str);
            if let (Some(object), Some(fields)) = (object, fields) {
                keys.insert(namespace.to_placeholder(object), namespace.to_placeholder(fields));
            }
        }

        tracing::debug!("Loaded {} matching key definitions", keys.len());
        Ok(Self { keys })
    }

    /// Matching key field(s) of an object type
    pub fn get(&self, sobject_type: &str) -> Option<&str> {
        self.keys.get(sobject_type).map(String::as_str)
    }
}
