use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{DocumentContent, DocumentSource, SourceError};
use crate::config::SourceConfig;
use crate::types::DocumentIdent;

/// Longest response body excerpt kept in error messages.
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone)]
enum Credentials {
    ClientSecret { id: String, secret: String },
    Encoded(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// HTTP client for the Nitrobox document API.
///
/// Bearer tokens come from the OAuth2 client-credentials flow and are cached
/// until the API answers 401, at which point one fresh token is fetched and
/// the request is repeated.
#[derive(Debug)]
pub struct NitroboxSource {
    client: reqwest::Client,
    base_url: Url,
    token_url: Url,
    credentials: Credentials,
    page_size: u32,
    token: RwLock<Option<String>>,
}

impl NitroboxSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SourceError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        let token_url = join_segments(&base_url, &[&config.oauth_realm, "oauth2", "token"])?;

        let credentials = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Credentials::ClientSecret {
                    id: id.clone(),
                    secret: secret.clone(),
                }
            }
            _ => match &config.basic_credentials {
                Some(encoded) if !encoded.is_empty() => Credentials::Encoded(encoded.clone()),
                _ => {
                    return Err(SourceError::Permanent(
                        "missing document API credentials".to_string(),
                    ))
                }
            },
        };

        Ok(Self {
            client,
            base_url,
            token_url,
            credentials,
            page_size: config.page_size,
            token: RwLock::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut guard = self.token.write().await;
        // Another caller may have refreshed while we waited for the write lock
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }

        let token = self.request_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token if it is still the one that was rejected.
    async fn invalidate_token(&self, rejected: &str) {
        let mut guard = self.token.write().await;
        if guard.as_deref() == Some(rejected) {
            *guard = None;
        }
    }

    async fn request_token(&self) -> Result<String, SourceError> {
        tracing::debug!(url = %self.token_url, "Requesting access token");

        let request = self
            .client
            .post(self.token_url.clone())
            .query(&[("grant_type", "client_credentials")])
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");

        let request = match &self.credentials {
            Credentials::ClientSecret { id, secret } => request.basic_auth(id, Some(secret)),
            Credentials::Encoded(encoded) => {
                request.header(AUTHORIZATION, format!("Basic {}", encoded))
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %excerpt(&body), "Token request failed");
            return Err(SourceError::Auth(format!(
                "token request returned status {}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response.json().await?;
        token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SourceError::Auth("token response missing access_token".to_string()))
    }

    /// GET with a bearer token, retrying once with a fresh token on 401.
    async fn get_authorized(
        &self,
        url: Url,
        query: &[(&str, String)],
        accept: &str,
    ) -> Result<reqwest::Response, SourceError> {
        let mut refreshed = false;

        loop {
            let token = self.access_token().await?;
            let response = self
                .client
                .get(url.clone())
                .query(query)
                .bearer_auth(&token)
                .header(ACCEPT, accept)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                tracing::info!(url = %url, "Access token rejected, retrying with a fresh token");
                self.invalidate_token(&token).await;
                refreshed = true;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(url = %url, status = status.as_u16(), body = %excerpt(&body), "Document API request failed");
                return Err(SourceError::Status {
                    status: status.as_u16(),
                    message: excerpt(&body).to_string(),
                });
            }

            return Ok(response);
        }
    }
}

#[async_trait]
impl DocumentSource for NitroboxSource {
    async fn fetch_latest_ident(&self, customer_ident: &str) -> Result<DocumentIdent, SourceError> {
        let url = join_segments(&self.base_url, &["v2", "documents"])?;
        let page_size = self.page_size.to_string();
        let query = [
            (
                "search",
                format!("customerDetail.customerIdent=='{}'", customer_ident),
            ),
            ("pageNumber", "0".to_string()),
            ("page", "0".to_string()),
            ("pageSize", page_size.clone()),
            ("size", page_size),
            ("sort", "documentDate,desc".to_string()),
            ("orderBy", "documentDate".to_string()),
            ("direction", "DESC".to_string()),
        ];

        let response = self
            .get_authorized(url, &query, "application/json")
            .await?;
        let body: Value = response.json().await?;

        latest_ident_from(&body)?.ok_or_else(|| SourceError::NoDocuments(customer_ident.to_string()))
    }

    async fn fetch_content(&self, document_ident: &str) -> Result<DocumentContent, SourceError> {
        let url = join_segments(&self.base_url, &["v2", "files", document_ident])?;
        let response = self
            .get_authorized(url, &[], "application/pdf, application/octet-stream")
            .await?;

        let bytes = response.bytes().await?.to_vec();

        tracing::debug!(document_ident, bytes = bytes.len(), "Downloaded document content");

        Ok(DocumentContent { bytes })
    }
}

fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, SourceError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SourceError::InvalidUrl(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Pull the first document ident out of a documents listing.
///
/// The listing nests documents under `_embedded` (or `embedded`), either as an
/// object holding a `documents` or `items` array, or as a bare array.
fn latest_ident_from(body: &Value) -> Result<Option<DocumentIdent>, SourceError> {
    let embedded = body.get("_embedded").or_else(|| body.get("embedded"));

    let items = match embedded {
        Some(Value::Object(map)) => map
            .get("documents")
            .or_else(|| map.get("items"))
            .and_then(Value::as_array),
        Some(Value::Array(items)) => Some(items),
        _ => None,
    };

    let first = match items.and_then(|items| items.first()) {
        Some(first) => first,
        None => return Ok(None),
    };

    first
        .get("ident")
        .and_then(Value::as_str)
        .filter(|ident| !ident.is_empty())
        .map(|ident| Some(ident.to_string()))
        .ok_or_else(|| SourceError::Malformed("document entry missing ident".to_string()))
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct MockApi {
        token_requests: AtomicUsize,
        reject_first_documents_call: bool,
        documents_calls: AtomicUsize,
        documents_status: Option<u16>,
        listing: Option<Value>,
    }

    async fn token(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Response {
        let n = api.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !auth.starts_with("Basic ") {
            return AxumStatus::UNAUTHORIZED.into_response();
        }
        Json(json!({ "access_token": format!("tok-{n}") })).into_response()
    }

    async fn documents(
        State(api): State<Arc<MockApi>>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Response {
        let call = api.documents_calls.fetch_add(1, Ordering::SeqCst);
        if api.reject_first_documents_call && call == 0 {
            return AxumStatus::UNAUTHORIZED.into_response();
        }
        if let Some(status) = api.documents_status {
            return AxumStatus::from_u16(status).unwrap().into_response();
        }
        assert!(headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .starts_with("Bearer tok-"));
        assert_eq!(query["search"], "customerDetail.customerIdent=='abc'");
        assert_eq!(query["sort"], "documentDate,desc");
        Json(api.listing.clone().unwrap_or_else(|| json!({}))).into_response()
    }

    async fn file(Path(ident): Path<String>) -> Response {
        format!("%PDF {ident}").into_response()
    }

    async fn spawn_api(api: MockApi) -> (String, Arc<MockApi>) {
        let api = Arc::new(api);
        let app = Router::new()
            .route("/demo/oauth2/token", post(token))
            .route("/v2/documents", get(documents))
            .route("/v2/files/:ident", get(file))
            .with_state(api.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), api)
    }

    fn config(base_url: &str) -> SourceConfig {
        SourceConfig {
            base_url: base_url.to_string(),
            oauth_realm: "demo".to_string(),
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            basic_credentials: None,
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            page_size: 20,
        }
    }

    #[tokio::test]
    async fn test_latest_ident_from_embedded_documents() {
        let (url, api) = spawn_api(MockApi {
            listing: Some(json!({ "_embedded": { "documents": [
                { "ident": "doc-2" }, { "ident": "doc-1" }
            ] } })),
            ..Default::default()
        })
        .await;
        let source = NitroboxSource::new(&config(&url)).unwrap();

        assert_eq!(source.fetch_latest_ident("abc").await.unwrap(), "doc-2");
        // Token is cached across calls
        assert_eq!(source.fetch_latest_ident("abc").await.unwrap(), "doc-2");
        assert_eq!(api.token_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_once() {
        let (url, api) = spawn_api(MockApi {
            reject_first_documents_call: true,
            listing: Some(json!({ "_embedded": [ { "ident": "doc-9" } ] })),
            ..Default::default()
        })
        .await;
        let source = NitroboxSource::new(&config(&url)).unwrap();

        assert_eq!(source.fetch_latest_ident("abc").await.unwrap(), "doc-9");
        assert_eq!(api.token_requests.load(Ordering::SeqCst), 2);
        assert_eq!(api.documents_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_listing_is_permanent() {
        let (url, _api) = spawn_api(MockApi {
            listing: Some(json!({ "_embedded": { "documents": [] } })),
            ..Default::default()
        })
        .await;
        let source = NitroboxSource::new(&config(&url)).unwrap();

        let err = source.fetch_latest_ident("abc").await.unwrap_err();
        assert!(matches!(err, SourceError::NoDocuments(ref c) if c == "abc"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let (url, _api) = spawn_api(MockApi {
            documents_status: Some(503),
            ..Default::default()
        })
        .await;
        let source = NitroboxSource::new(&config(&url)).unwrap();

        let err = source.fetch_latest_ident("abc").await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = NitroboxSource::new(&config(&format!("http://{addr}"))).unwrap();
        let err = source.fetch_latest_ident("abc").await.unwrap_err();
        assert!(err.is_transient(), "expected transient, got {err}");
    }

    #[tokio::test]
    async fn test_fetch_content_returns_bytes() {
        let (url, _api) = spawn_api(MockApi::default()).await;
        let source = NitroboxSource::new(&config(&url)).unwrap();

        let content = source.fetch_content("doc-7").await.unwrap();
        assert_eq!(content.bytes, b"%PDF doc-7");
    }

    #[test]
    fn test_latest_ident_shapes() {
        let items = json!({ "embedded": { "items": [ { "ident": "x" } ] } });
        assert_eq!(latest_ident_from(&items).unwrap().as_deref(), Some("x"));

        let missing = json!({ "_embedded": { "documents": [ { "name": "no ident" } ] } });
        assert!(matches!(
            latest_ident_from(&missing),
            Err(SourceError::Malformed(_))
        ));

        assert_eq!(latest_ident_from(&json!({})).unwrap(), None);
    }

    #[test]
    fn test_token_url_includes_realm() {
        let source = NitroboxSource::new(&config("https://api.example.test/")).unwrap();
        assert_eq!(
            source.token_url.as_str(),
            "https://api.example.test/demo/oauth2/token"
        );
    }
}
