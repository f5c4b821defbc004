pub mod scalr;
pub mod tfc;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::ApiError;

const USER_AGENT: &str = concat!("scalr-migrate/", env!("CARGO_PKG_VERSION"));
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const PAGE_SIZE: u64 = 100;

/// JSON:API single-resource envelope.
#[derive(Debug, Deserialize)]
pub struct Single<T> {
    pub data: T,
}

/// JSON:API listing envelope with the pagination metadata both platforms
/// return.
#[derive(Debug, Deserialize)]
pub struct Listing<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub meta: Option<Meta>,
}

impl<T> Listing<T> {
    pub fn next_page(&self) -> Option<u64> {
        self.meta
            .as_ref()
            .and_then(|m| m.pagination.as_ref())
            .and_then(|p| p.next_page)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Pagination {
    #[serde(default)]
    pub current_page: Option<u64>,
    #[serde(default)]
    pub next_page: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u64>,
}

/// Bare `{ "id": ..., "type": ... }` resource identifier used by
/// relationship endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceIdentifier {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Shared JSON:API transport for both platform connectors.
///
/// Every request is retried on transient failures (network errors, 5xx,
/// and 429 with `Retry-After`) with bounded exponential backoff, and all
/// in-flight requests against one host share a semaphore so a worker pool
/// cannot stampede the platform into throttling.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
    hostname: String,
    limiter: Arc<Semaphore>,
    max_retries: u32,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base", &self.base.as_str())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ApiClient {
    pub fn new(
        hostname: &str,
        token: &str,
        api_prefix: &str,
        rate_limit: usize,
        max_retries: u32,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", token);
        let mut auth = HeaderValue::from_str(&bearer).map_err(|e| ApiError::BadHost {
            hostname: hostname.to_string(),
            message: format!("token is not a valid header value: {}", e),
        })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/vnd.api+json"),
        );

        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::BadHost {
                hostname: hostname.to_string(),
                message: e.to_string(),
            })?;

        let base = Url::parse(&format!("https://{}/api/{}/", hostname, api_prefix)).map_err(
            |e| ApiError::BadHost {
                hostname: hostname.to_string(),
                message: e.to_string(),
            },
        )?;

        Ok(ApiClient {
            http,
            base,
            hostname: hostname.to_string(),
            limiter: Arc::new(Semaphore::new(rate_limit.max(1))),
            max_retries: max_retries.max(1),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    fn route_url(&self, route: &str, query: &[(&str, String)]) -> Result<Url, ApiError> {
        let mut url = self.base.join(route).map_err(|e| ApiError::BadHost {
            hostname: self.hostname.clone(),
            message: format!("bad route '{}': {}", route, e),
        })?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        route: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self.route_url(route, query)?;
        self.request(Method::GET, url, None).await
    }

    /// Fetch a fully-qualified URL, e.g. a hosted state download.
    pub async fn get_url<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let url = Url::parse(url).map_err(|e| ApiError::BadHost {
            hostname: self.hostname.clone(),
            message: format!("bad url '{}': {}", url, e),
        })?;
        self.request(Method::GET, url, None).await
    }

    /// Fetch a `links.related` reference, which the platforms emit either
    /// absolute or host-relative.
    pub async fn get_related<T: DeserializeOwned>(&self, related: &str) -> Result<T, ApiError> {
        if related.starts_with("http://") || related.starts_with("https://") {
            self.get_url(related).await
        } else {
            let absolute = format!(
                "https://{}/{}",
                self.hostname,
                related.trim_start_matches('/')
            );
            self.get_url(&absolute).await
        }
    }

    pub async fn post<T: DeserializeOwned>(&self, route: &str, body: Value) -> Result<T, ApiError> {
        let url = self.route_url(route, &[])?;
        self.request(Method::POST, url, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        route: &str,
        body: Value,
    ) -> Result<T, ApiError> {
        let url = self.route_url(route, &[])?;
        self.request(Method::PATCH, url, Some(body)).await
    }

    /// Drain every page of a listing before returning. Partial enumeration
    /// would silently shrink the dependency graph, so callers always get
    /// the full set.
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        route: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ApiError> {
        let mut results = Vec::new();
        let mut page: u64 = 1;
        loop {
            let mut q: Vec<(&str, String)> = vec![
                ("page[size]", PAGE_SIZE.to_string()),
                ("page[number]", page.to_string()),
            ];
            q.extend(query.iter().map(|(k, v)| (*k, v.clone())));
            let listing: Listing<T> = self.get(route, &q).await?;
            let next = listing.next_page();
            results.extend(listing.data);
            match next {
                Some(n) if n > page => page = n,
                _ => break,
            }
        }
        Ok(results)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let raw = self.request_raw(method, url.clone(), body).await?;
        serde_json::from_value(raw).map_err(|e| ApiError::Decode {
            url: url.to_string(),
            source: e,
        })
    }

    async fn request_raw(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let response = {
                // Hold the rate-limit permit only for the request itself,
                // never across the backoff sleep.
                let _permit = self.limiter.acquire().await.map_err(|_| ApiError::Exhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    message: "rate limiter closed".to_string(),
                })?;
                let mut req = self.http.request(method.clone(), url.clone());
                if let Some(ref body) = body {
                    req = req.json(body);
                }
                req.send().await
            };

            let retry_delay = match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let text = resp.text().await.map_err(|e| ApiError::Transport {
                            url: url.to_string(),
                            source: e,
                        })?;
                        if text.is_empty() {
                            return Ok(Value::Null);
                        }
                        return serde_json::from_str(&text).map_err(|e| ApiError::Decode {
                            url: url.to_string(),
                            source: e,
                        });
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let delay = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                        warn!(
                            "Rate limit hit on {}, waiting {}s before retrying",
                            self.hostname, delay
                        );
                        Duration::from_secs(delay)
                    } else if status.is_server_error() {
                        let body_text = resp.text().await.unwrap_or_default();
                        warn!(
                            "Server error {} from {} (attempt {}/{}): {}",
                            status, url, attempt, self.max_retries, body_text
                        );
                        backoff_delay(attempt)
                    } else {
                        // Validation and auth failures are not retryable.
                        let body_text = resp.text().await.unwrap_or_default();
                        return Err(ApiError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                            body: body_text,
                        });
                    }
                }
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(ApiError::Exhausted {
                            url: url.to_string(),
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}",
                        url, attempt, self.max_retries, err
                    );
                    backoff_delay(attempt)
                }
            };

            if attempt >= self.max_retries {
                return Err(ApiError::Exhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    message: "retries exhausted".to_string(),
                });
            }

            debug!("Retrying {} in {:?}", url, retry_delay);
            tokio::time::sleep(retry_delay).await;
        }
    }
}

/// Exponential backoff: 2s, 4s, 8s, capped at 30s.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = (1u64 << attempt.min(5)).min(30);
    Duration::from_secs(secs)
}
