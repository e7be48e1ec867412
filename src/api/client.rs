//! HTTP implementation of [`RecordApi`]

use async_trait::async_trait;
use reqwest::{multipart, Client, Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::error::ApiError;
use super::models::ImportResponse;
use super::traits::RecordApi;
use crate::events::EntityKind;
use crate::view::PageQuery;

/// REST client for the inventory backend.
///
/// `base_url` is the API root, e.g. `http://localhost:8080/api`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Self::with_client(http, base_url)
    }

    /// Use an existing reqwest client (shared connection pool, custom headers).
    pub fn with_client(http: Client, base_url: &str) -> Result<Self, ApiError> {
        let trimmed = base_url.trim_end_matches('/');
        url::Url::parse(trimmed).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self {
            http,
            base_url: trimmed.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(method = %method, url = %url, "→ request");
        self.http.request(method, url)
    }

    /// Paginated import-job history (`GET /import`)
    pub async fn list_imports(&self, query: &PageQuery) -> Result<Value, ApiError> {
        self.list(EntityKind::Import, query).await
    }

    /// Send a request and read the body as JSON. Empty bodies become `Null`.
    async fn send(&self, builder: RequestBuilder) -> Result<Value, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "← error response");
            return Err(ApiError::from_response(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RecordApi for ApiClient {
    async fn list(&self, entity: EntityKind, query: &PageQuery) -> Result<Value, ApiError> {
        let builder = self
            .request(Method::GET, entity.path())
            .query(&query.to_params());
        self.send(builder).await
    }

    async fn get(&self, entity: EntityKind, id: i64) -> Result<Value, ApiError> {
        self.send(self.request(Method::GET, &format!("{}/{}", entity.path(), id)))
            .await
    }

    async fn create(&self, entity: EntityKind, body: &Value) -> Result<Value, ApiError> {
        self.send(self.request(Method::POST, entity.path()).json(body))
            .await
    }

    async fn update(&self, entity: EntityKind, id: i64, body: &Value) -> Result<Value, ApiError> {
        let path = format!("{}/{}", entity.path(), id);
        self.send(self.request(Method::PUT, &path).json(body)).await
    }

    async fn delete(&self, entity: EntityKind, id: i64) -> Result<(), ApiError> {
        let path = format!("{}/{}", entity.path(), id);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn upload_import(
        &self,
        entity: EntityKind,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<ImportResponse, ApiError> {
        let part = multipart::Part::bytes(contents).file_name(file_name.to_string());
        let form = multipart::Form::new().part("file", part);
        let path = format!("import/{}/upload", entity.path());

        let body = self
            .send(self.request(Method::POST, &path).multipart(form))
            .await?;
        if body.is_null() {
            return Ok(ImportResponse::default());
        }
        serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}
