//! HTTP transport for a scraped catalog source
//!
//! A reqwest client with a cookie store, the source's static headers and a
//! per-source rate limit. `reset` swaps in a freshly built client, which
//! drops cookies and pooled connections while re-applying the headers.

use crate::error::{CacheError, CacheResult, RequestError};
use crate::types::Transport;
use async_trait::async_trait;
use brickdb_common::config::HttpConfig;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct HttpTransport {
    /// Replaced wholesale on reset; requests clone the current handle
    client: RwLock<Client>,
    settings: HttpConfig,
    headers: HeaderMap,
    rate_limiter: DefaultDirectRateLimiter,
}

impl HttpTransport {
    /// Transport sending `headers` with every request
    ///
    /// Header entries that are not valid HTTP are skipped with a warning.
    pub fn new(settings: &HttpConfig, headers: &BTreeMap<String, String>) -> CacheResult<Self> {
        let headers = header_map(headers);
        let client = build_client(settings, &headers)
            .map_err(|e| CacheError::Common(brickdb_common::Error::Config(e.to_string())))?;

        let per_second = NonZeroU32::new(settings.requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client: RwLock::new(client),
            settings: settings.clone(),
            headers,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    fn current_client(&self) -> Client {
        match self.client.read() {
            Ok(client) => client.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, RequestError> {
        self.rate_limiter.until_ready().await;

        debug!(url, "GET");
        let response = self
            .current_client()
            .get(url)
            .send()
            .await
            .map_err(|e| RequestError::Connection {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download_text(&self, url: &str) -> Result<String, RequestError> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| RequestError::Connection {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, RequestError> {
        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| RequestError::Connection {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }

    fn reset(&self) {
        let fresh = match build_client(&self.settings, &self.headers) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Could not rebuild HTTP client, keeping the old session");
                return;
            }
        };
        match self.client.write() {
            Ok(mut client) => *client = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        debug!("HTTP session reset");
    }

    async fn probe(&self, url: &str) -> bool {
        match self.get(url).await {
            Ok(_) => true,
            Err(e) => {
                warn!(url, error = %e, "Source unreachable");
                false
            }
        }
    }
}

fn build_client(settings: &HttpConfig, headers: &HeaderMap) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(settings.user_agent.clone())
        .default_headers(headers.clone())
        .cookie_store(true)
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
}

fn header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid header"),
        }
    }
    map
}
