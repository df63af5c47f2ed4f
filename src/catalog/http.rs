//! JSON-over-HTTP catalog client
//!
//! This module talks to a catalog gateway that exposes the store as plain
//! JSON resources:
//!
//! | Call | Request |
//! |------|---------|
//! | categories | `GET categories` |
//! | subcategories | `GET categories/{id}/subcategories` |
//! | charts | `GET categories/{id}/charts` |
//! | similar | `GET apps/{package}/similar` |
//! | search | `GET search?creator={creator}` |
//! | details | `GET apps/{package}` |
//! | binary | `GET apps/{package}/versions/{version}/binary` |
//!
//! # Error classification
//!
//! | Condition | Error |
//! |-----------|-------|
//! | HTTP 408, 429, 5xx | Transient (retried with backoff) |
//! | Timeout, connection failure | Transient (retried with backoff) |
//! | Other HTTP 4xx | Permanent |
//! | Undecodable body | Permanent |

use crate::catalog::{
    AppDetails, BackoffPolicy, CatalogClient, CatalogError, CatalogResult, Category, Chart,
    ListingEntry,
};
use crate::config::CatalogConfig;
use crate::RippleError;
use async_trait::async_trait;
use reqwest::{Client, Proxy, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

// Longest error body echoed into a task failure
const MAX_ERROR_BODY: usize = 200;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The catalog configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client (e.g. a malformed proxy)
pub fn build_http_client(config: &CatalogConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_seconds))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &config.http_proxy {
        builder = builder.proxy(Proxy::http(proxy.as_str())?);
    }
    if let Some(proxy) = &config.https_proxy {
        builder = builder.proxy(Proxy::https(proxy.as_str())?);
    }

    builder.build()
}

/// Catalog client backed by a JSON gateway
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    client: Client,
    base_url: Url,
    backoff: BackoffPolicy,
}

impl HttpCatalogClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, RippleError> {
        let client = build_http_client(config)?;
        let base_url = Url::parse(&config.base_url)?;
        let backoff = BackoffPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        );
        Ok(Self::with_client(client, base_url, backoff))
    }

    pub fn with_client(client: Client, base_url: Url, backoff: BackoffPolicy) -> Self {
        Self {
            client,
            base_url,
            backoff,
        }
    }

    /// Appends path segments to the base URL, escaping each one
    fn endpoint(&self, segments: &[&str]) -> CatalogResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::permanent(None, "catalog base URL cannot hold a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: Url) -> CatalogResult<T> {
        let client = &self.client;
        self.backoff
            .run(operation, move || {
                let url = url.clone();
                async move {
                    tracing::debug!("GET {}", url);
                    let response = client.get(url).send().await.map_err(classify_error)?;
                    let response = check_status(response).await?;
                    response.json::<T>().await.map_err(classify_error)
                }
            })
            .await
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn list_categories(&self) -> CatalogResult<Vec<Category>> {
        let url = self.endpoint(&["categories"])?;
        self.get_json("list categories", url).await
    }

    async fn list_subcategories(&self, category_id: &str) -> CatalogResult<Vec<Category>> {
        let url = self.endpoint(&["categories", category_id, "subcategories"])?;
        self.get_json("list subcategories", url).await
    }

    async fn list_charts(&self, category_id: &str) -> CatalogResult<Vec<Chart>> {
        let url = self.endpoint(&["categories", category_id, "charts"])?;
        self.get_json("list charts", url).await
    }

    async fn list_similar(&self, package_id: &str) -> CatalogResult<Vec<ListingEntry>> {
        let url = self.endpoint(&["apps", package_id, "similar"])?;
        self.get_json("list similar", url).await
    }

    async fn search(&self, creator: &str) -> CatalogResult<Vec<ListingEntry>> {
        let mut url = self.endpoint(&["search"])?;
        url.query_pairs_mut().append_pair("creator", creator);
        self.get_json("search", url).await
    }

    async fn fetch_details(&self, package_id: &str) -> CatalogResult<AppDetails> {
        let url = self.endpoint(&["apps", package_id])?;
        self.get_json("fetch details", url).await
    }

    async fn fetch_binary(
        &self,
        package_id: &str,
        version_code: i64,
    ) -> CatalogResult<Option<Vec<u8>>> {
        let version = version_code.to_string();
        let url = self.endpoint(&["apps", package_id, "versions", &version, "binary"])?;
        let client = &self.client;

        self.backoff
            .run("fetch binary", move || {
                let url = url.clone();
                async move {
                    tracing::debug!("GET {}", url);
                    let response = client.get(url).send().await.map_err(classify_error)?;

                    // The gateway answers 404/204 when it has nothing to serve
                    if matches!(
                        response.status(),
                        StatusCode::NOT_FOUND | StatusCode::NO_CONTENT
                    ) {
                        return Ok(None);
                    }

                    let response = check_status(response).await?;
                    let bytes = response.bytes().await.map_err(classify_error)?;
                    Ok(Some(bytes.to_vec()))
                }
            })
            .await
    }
}

/// Maps a non-success response to a catalog error
async fn check_status(response: Response) -> CatalogResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let mut message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Err(CatalogError::Transient(format!(
            "HTTP {}: {}",
            status.as_u16(),
            message
        )))
    } else {
        Err(CatalogError::permanent(Some(status.as_u16()), message))
    }
}

/// Classifies a reqwest failure
fn classify_error(e: reqwest::Error) -> CatalogError {
    if e.is_decode() {
        CatalogError::permanent(None, format!("malformed response: {}", e))
    } else if e.is_builder() {
        CatalogError::permanent(None, e.to_string())
    } else if e.is_timeout() {
        CatalogError::Transient("request timeout".to_string())
    } else if e.is_connect() {
        CatalogError::Transient(format!("connection failed: {}", e))
    } else {
        CatalogError::Transient(e.to_string())
    }
}
