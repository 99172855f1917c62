use crate::config::PipedriveConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::Resolver;
use crate::types::Value;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Minimal read-only client for the Pipedrive v1 API.
pub struct PipedriveClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    inn_field_key: String,
}

impl PipedriveClient {
    pub fn new(config: &PipedriveConfig, api_token: String) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Arc::new(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token,
            inn_field_key: config.inn_field_key.clone(),
        }))
    }

    /// GETs `v1/<path>` and returns the decoded body. Transport errors and
    /// non-success statuses become lookup errors.
    async fn get_json(&self, resolver: &str, key: &str, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        let lookup_err = |message: String| PipelineError::Lookup {
            resolver: resolver.to_string(),
            key: key.to_string(),
            message,
        };
        let url = format!("{}/v1/{}", self.base_url, path);
        debug!(url = %url, "pipedrive request");
        let resp = self
            .http
            .get(&url)
            .query(&[("api_token", self.api_token.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| lookup_err(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(lookup_err(format!("HTTP {}", status.as_u16())));
        }
        resp.json().await.map_err(|e| lookup_err(e.to_string()))
    }
}

/// First organisation id in an item search response.
pub fn first_item_id(body: &serde_json::Value) -> Option<i64> {
    body.get("data")?
        .as_array()?
        .iter()
        .find_map(|item| item.get("id").and_then(serde_json::Value::as_i64))
}

/// Pipedrive organisation id for a tax id (exact match on the custom field).
pub struct PipedriveOrganisationSearch {
    client: Arc<PipedriveClient>,
}

impl PipedriveOrganisationSearch {
    pub fn new(client: Arc<PipedriveClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resolver for PipedriveOrganisationSearch {
    fn name(&self) -> String {
        "pipedrive_org_search".into()
    }

    async fn resolve(&self, key: &str) -> Result<Option<Value>> {
        let body = self
            .client
            .get_json(
                &self.name(),
                key,
                "itemSearch/field",
                &[
                    ("term", key),
                    ("field_type", "organizationField"),
                    ("field_key", self.client.inn_field_key.as_str()),
                    ("exact_match", "true"),
                    ("return_item_ids", "1"),
                    ("start", "0"),
                ],
            )
            .await?;
        Ok(first_item_id(&body).map(Value::ExternalId))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_item_id() {
        let body = json!({"success": true, "data": [{"id": 4008, "name": "x"}, {"id": 1}]});
        assert_eq!(first_item_id(&body), Some(4008));
        assert_eq!(first_item_id(&json!({"success": true, "data": []})), None);
        assert_eq!(first_item_id(&json!({"success": true, "data": null})), None);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_lookup_error() {
        let config = PipedriveConfig {
            base_url: "http://127.0.0.1:9".into(),
            inn_field_key: "k".into(),
            timeout_seconds: 2,
        };
        let client = PipedriveClient::new(&config, "token".into()).unwrap();
        let search = PipedriveOrganisationSearch::new(client);
        assert!(matches!(
            search.resolve("7701").await,
            Err(PipelineError::Lookup { .. })
        ));
    }
}
