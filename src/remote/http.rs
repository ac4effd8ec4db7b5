//! JSON-over-HTTP adapter for [`RemoteClient`].

use super::{FeedPosition, PulledPage, PushReceipt, RemoteClient, RemoteError, RemoteResult};
use crate::config::RemoteConfig;
use crate::entity::{EntityType, RemoteRecord};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct PageBody {
    #[serde(default)]
    records: Vec<RemoteRecord>,
    #[serde(default)]
    next_cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct PushBody {
    id: String,
}

/// Remote client talking to `{base_url}/entities/{type}` endpoints.
pub struct HttpRemoteClient {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpRemoteClient {
    pub fn from_config(config: &RemoteConfig) -> SyncResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(SyncError::Configuration(
                "remote.base_url must be set".to_string(),
            ));
        }
        let base_url = Url::parse(config.base_url.trim()).map_err(|e| {
            SyncError::Configuration(format!("Invalid remote.base_url '{}': {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Configuration(format!(
                "remote.base_url '{}' cannot carry a path",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("pipeliner-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
        })
    }

    fn collection_url(&self, entity: EntityType) -> Url {
        self.entity_url(entity, None)
    }

    /// Each segment is percent-encoded, so an id containing `/` stays one segment
    fn entity_url(&self, entity: EntityType, remote_id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("entities").push(&entity.to_string());
            if let Some(id) = remote_id {
                segments.push(id);
            }
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<reqwest::Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        crate::log_remote_warn!("❌ Remote responded HTTP {}: {}", status.as_u16(), body);
        Err(classify_status(status, body))
    }
}

/// Maps a non-success HTTP status onto the remote error taxonomy
pub(crate) fn classify_status(status: StatusCode, body: String) -> RemoteError {
    let detail = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), body)
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Authentication(detail),
        StatusCode::NOT_FOUND => RemoteError::NotFound(detail),
        StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Rejected(detail),
        _ => RemoteError::Unexpected(detail),
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_connect() || error.is_timeout() {
        RemoteError::Connectivity(error.to_string())
    } else {
        RemoteError::Unexpected(error.to_string())
    }
}

fn decode_error(error: reqwest::Error) -> RemoteError {
    RemoteError::Unexpected(format!("Invalid response body: {}", error))
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn push(&self, entity: EntityType, record: &RemoteRecord) -> RemoteResult<PushReceipt> {
        crate::log_remote_debug!("POST {} ({:?})", self.collection_url(entity), record.id);
        let response = self
            .send(self.client.post(self.collection_url(entity)).json(record))
            .await?;
        let body: PushBody = response.json().await.map_err(decode_error)?;
        Ok(PushReceipt { remote_id: body.id })
    }

    async fn pull(
        &self,
        entity: EntityType,
        position: &FeedPosition,
        page_size: usize,
    ) -> RemoteResult<PulledPage> {
        let mut query = vec![("limit", page_size.to_string())];
        if let Some(token) = position.token() {
            query.push(("cursor", token.to_string()));
        }
        crate::log_remote_debug!("GET {} {:?}", self.collection_url(entity), query);
        let response = self
            .send(self.client.get(self.collection_url(entity)).query(&query))
            .await?;
        let body: PageBody = response.json().await.map_err(decode_error)?;
        Ok(PulledPage {
            records: body.records,
            next_cursor: body.next_cursor,
            has_more: body.has_more,
        })
    }

    async fn fetch(&self, entity: EntityType, remote_id: &str) -> RemoteResult<Option<RemoteRecord>> {
        let url = self.entity_url(entity, Some(remote_id));
        crate::log_remote_debug!("GET {}", url);
        match self.send(self.client.get(url)).await {
            Ok(response) => Ok(Some(response.json().await.map_err(decode_error)?)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
