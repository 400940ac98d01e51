//! HTTP-backed remote document store

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::EntityKind;

use super::{document_from_json, document_to_json, Document, RemoteDocument, RemoteFuture,
    RemoteStore};

/// Remote store client speaking the Fable backend's document API.
#[derive(Clone)]
pub struct HttpRemoteStore {
    endpoint: String,
    auth_token: String,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    /// Create a client for the given API endpoint and bearer token
    pub fn new(endpoint: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let auth_token = auth_token.into();
        if auth_token.trim().is_empty() {
            return Err(Error::InvalidInput(
                "auth token must not be empty".to_string(),
            ));
        }

        Ok(Self {
            endpoint,
            auth_token,
            client: reqwest::Client::builder()
                .build()
                .map_err(|e| Error::Remote(e.to_string()))?,
        })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/v1/{}", self.endpoint, kind.collection())
    }

    fn document_url(&self, kind: EntityKind, id: &str) -> String {
        format!("{}/{id}", self.collection_url(kind))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Remote(parse_api_error(status, &body)))
    }

    async fn fetch_documents(&self, url: String) -> Result<Vec<RemoteDocument>> {
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Remote(e.to_string()))?;

        let payload = Self::check(response)
            .await?
            .json::<ListResponse>()
            .await
            .map_err(|e| Error::Remote(format!("invalid list payload: {e}")))?;

        payload
            .documents
            .into_iter()
            .map(|entry| Ok((entry.id, document_from_json(&entry.fields)?)))
            .collect()
    }
}

impl RemoteStore for HttpRemoteStore {
    fn upsert<'a>(
        &'a self,
        kind: EntityKind,
        id: &'a str,
        doc: &'a Document,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let response = self
                .client
                .put(self.document_url(kind, id))
                .bearer_auth(&self.auth_token)
                .json(&document_to_json(doc))
                .send()
                .await
                .map_err(|e| Error::Remote(e.to_string()))?;

            Self::check(response).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, kind: EntityKind, id: &'a str) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let response = self
                .client
                .delete(self.document_url(kind, id))
                .bearer_auth(&self.auth_token)
                .send()
                .await
                .map_err(|e| Error::Remote(e.to_string()))?;

            // A missing document is already deleted; that is success here
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            Self::check(response).await?;
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        kind: EntityKind,
        user_id: &'a str,
    ) -> RemoteFuture<'a, Vec<RemoteDocument>> {
        Box::pin(async move {
            let url = format!("{}?userId={user_id}", self.collection_url(kind));
            self.fetch_documents(url).await
        })
    }

    fn list_since<'a>(
        &'a self,
        kind: EntityKind,
        user_id: &'a str,
        since_ms: i64,
    ) -> RemoteFuture<'a, Vec<RemoteDocument>> {
        Box::pin(async move {
            let url = format!(
                "{}?userId={user_id}&updatedAfter={since_ms}",
                self.collection_url(kind)
            );
            self.fetch_documents(url).await
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    documents: Vec<ListedDocument>,
}

#[derive(Debug, Deserialize)]
struct ListedDocument {
    id: String,
    fields: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput(
            "endpoint must not be empty".to_string(),
        ));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
