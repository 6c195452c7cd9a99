use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::sync::document_store::{DocumentStore, StoreError, WriteBatch, normalize_path};

/// Realtime-database REST client: every path maps to `{base}/{path}.json`.
pub struct RestDocumentStore {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl RestDocumentStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = (!token.is_empty()).then_some(token);
        self
    }

    fn url(&self, path: &str) -> String {
        let encoded: Vec<String> = normalize_path(path)
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/{}.json", self.base_url, encoded.join("/"))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }

    async fn check(response: Response, context: &str) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::error!("Permission denied for {}: {}", context, body);
            return Err(StoreError::PermissionDenied(context.to_string()));
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            tracing::warn!("Store unavailable for {}. Status: {}", context, status);
            return Err(StoreError::Unavailable(format!("Status {}: {}", status, body)));
        }

        tracing::error!("Store request failed for {}. Status: {}, Body: {}", context, status, body);
        Err(StoreError::RequestError(format!("Status {}: {}", status, body)))
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        tracing::debug!("GET {}", path);
        let response = self.request(Method::GET, path).send().await?;
        let response = Self::check(response, path).await?;

        let value: Value = response.json().await?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        tracing::debug!("PUT {}", path);
        let response = self.request(Method::PUT, path).json(&value).send().await?;
        Self::check(response, path).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        tracing::debug!("DELETE {}", path);
        let response = self.request(Method::DELETE, path).send().await?;
        Self::check(response, path).await?;
        Ok(())
    }

    async fn update(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        tracing::debug!("PATCH / with {} paths", batch.len());
        let response = self
            .request(Method::PATCH, "")
            .json(&batch.to_patch_body())
            .send()
            .await?;
        Self::check(response, "multi-path update").await?;
        Ok(())
    }

    async fn find_by_child(
        &self,
        collection: &str,
        child: &str,
        value: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let order_by = serde_json::to_string(child)?;
        let equal_to = serde_json::to_string(value)?;

        let response = self
            .request(Method::GET, collection)
            .query(&[("orderBy", order_by.as_str()), ("equalTo", equal_to.as_str())])
            .send()
            .await?;
        let response = Self::check(response, collection).await?;

        match response.json::<Value>().await? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Ok(vec![]),
        }
    }
}
