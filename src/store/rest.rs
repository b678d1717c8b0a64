//! Record store backed by the org's REST API

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Map, Value};

use super::{QueryResult, RecordStore};
use crate::common::config::ConnectionConfig;
use crate::common::{Error, Result};

/// REST client for queries, record lifecycle and the cart resource
pub struct RestRecordStore {
    client: Client,
    instance_url: String,
    access_token: String,
    api_version: String,
    namespace: String,
}

impl RestRecordStore {
    /// Create a client from connection settings
    pub fn new(connection: &ConnectionConfig) -> Result<Self> {
        let instance_url = connection
            .instance_url
            .clone()
            .ok_or_else(|| Error::NotConnected("missing instance_url".to_string()))?;
        let access_token = connection
            .access_token
            .clone()
            .ok_or_else(|| Error::NotConnected("missing access_token".to_string()))?;

        Ok(Self {
            client: Client::new(),
            instance_url: instance_url.trim_end_matches('/').to_string(),
            access_token,
            api_version: connection.api_version.clone(),
            namespace: connection.namespace.clone(),
        })
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/v{}{}",
            self.instance_url, self.api_version, path
        )
    }

    /// Base path of the cart resource
    pub fn cart_base_url(&self) -> String {
        format!("/services/apexrest/{}/v2/cpq", self.namespace)
    }

    fn cart_url(&self, path: &str) -> String {
        format!("{}{}{}", self.instance_url, self.cart_base_url(), path)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Value> {
        let response = request
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::record_store(operation, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::record_store(operation, format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::record_store(operation, error_message(status.as_u16(), &body)));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::record_store(operation, format!("invalid response: {}", e)))
    }
}

/// Extract the message from an error answer
///
/// The API answers with a list of `{message, errorCode}` objects; anything
/// else is reported verbatim.
fn error_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.get(0)
            .unwrap_or(v)
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    message.unwrap_or_else(|| format!("HTTP {}: {}", status, body))
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn query(&self, query: &str) -> Result<QueryResult> {
        tracing::debug!("Query: {}", query);
        let request = self
            .client
            .get(self.data_url("/query"))
            .query(&[("q", query)]);
        let value = self.send("query", request).await?;
        let mut result: QueryResult = serde_json::from_value(value.clone())?;

        let mut next = value.get("nextRecordsUrl").and_then(Value::as_str).map(str::to_string);
        while let Some(path) = next {
            let page = self
                .send("query", self.client.get(format!("{}{}", self.instance_url, path)))
                .await?;
            let page_result: QueryResult = serde_json::from_value(page.clone())?;
            result.records.extend(page_result.records);
            result.done = page_result.done;
            next = page.get("nextRecordsUrl").and_then(Value::as_str).map(str::to_string);
        }

        Ok(result)
    }

    async fn create(&self, sobject_type: &str, fields: &Map<String, Value>) -> Result<String> {
        let request = self
            .client
            .post(self.data_url(&format!("/sobjects/{}/", sobject_type)))
            .json(fields);
        let value = self.send("create", request).await?;

        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::record_store("create", format!("no id in response: {}", value)))
    }

    async fn retrieve(&self, sobject_type: &str, id: &str) -> Result<Value> {
        let request = self
            .client
            .get(self.data_url(&format!("/sobjects/{}/{}", sobject_type, id)));
        self.send("retrieve", request).await
    }

    async fn destroy(&self, sobject_type: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let request = self
            .client
            .delete(self.data_url("/composite/sobjects"))
            .query(&[("ids", ids.join(",")), ("allOrNone", "false".to_string())]);
        let value = self.send("destroy", request).await?;

        let failures: Vec<String> = value
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .filter(|r| r.get("success").and_then(Value::as_bool) == Some(false))
                    .flat_map(|r| r.get("errors").and_then(Value::as_array).cloned().unwrap_or_default())
                    .filter_map(|e| e.get("message").and_then(Value::as_str).map(str::to_string))
                    .filter(|m| !m.contains("entity is deleted"))
                    .collect()
            })
            .unwrap_or_default();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::record_store(
                "destroy",
                format!("{} {}: {}", sobject_type, ids.join(","), failures.join("; ")),
            ))
        }
    }

    async fn cart_get(&self, path: &str) -> Result<Value> {
        self.send("cart get", self.client.get(self.cart_url(path))).await
    }

    async fn cart_post(&self, path: &str, body: &Value) -> Result<Value> {
        self.send("cart post", self.client.post(self.cart_url(path)).json(body))
            .await
    }

    async fn cart_delete(&self, path: &str) -> Result<Value> {
        self.send("cart delete", self.client.delete(self.cart_url(path)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionConfig {
        ConnectionConfig {
            instance_url: Some("https://org.example.com/".to_string()),
            access_token: Some("token".to_string()),
            ..ConnectionConfig::default()
        }
    }

    #[test]
    fn test_urls() {
        let store = RestRecordStore::new(&connection()).unwrap();
        assert_eq!(
            store.data_url("/query"),
            "https://org.example.com/services/data/v58.0/query"
        );
        assert_eq!(store.cart_base_url(), "/services/apexrest/vlocity_cmt/v2/cpq");
        assert_eq!(
            store.cart_url("/carts/801/items"),
            "https://org.example.com/services/apexrest/vlocity_cmt/v2/cpq/carts/801/items"
        );
    }

    #[test]
    fn test_missing_connection_settings() {
        let result = RestRecordStore::new(&ConnectionConfig::default());
        assert!(matches!(result, Err(Error::NotConnected(_))));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(400, r#"[{"message":"bad field","errorCode":"INVALID_FIELD"}]"#),
            "bad field"
        );
        assert_eq!(error_message(500, r#"{"message":"boom"}"#), "boom");
        assert_eq!(error_message(502, "gateway"), "HTTP 502: gateway");
    }
}
