//! HTTP client with per-host adaptive rate limiting.

mod response;
mod user_agent;

pub use response::{is_image_content_type, BodyError, HttpResponse};
pub use user_agent::{resolve_user_agent, IMPERSONATE, USER_AGENT};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Response};
use tracing::trace;

use super::rate_limiter::RateLimiter;

fn extract_response_headers(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

/// Builder for [`HttpClient`].
///
/// Required parameters come from [`HttpClient::builder`]; everything else is
/// optional.
pub struct HttpClientBuilder {
    source_id: String,
    timeout: Duration,
    request_delay: Duration,
    user_agent: Option<String>,
    rate_limiter: Option<RateLimiter>,
    default_headers: Vec<(String, String)>,
}

impl HttpClientBuilder {
    /// Set the user agent string (`"impersonate"` picks a browser agent).
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    /// Share a rate limiter with other clients.
    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Header sent with every request.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.default_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> Result<HttpClient, reqwest::Error> {
        let user_agent = resolve_user_agent(self.user_agent.as_deref());
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(self.timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(HttpClient {
            client,
            source_id: self.source_id,
            request_delay: self.request_delay,
            rate_limiter: self.rate_limiter.unwrap_or_default(),
            default_headers: self.default_headers,
        })
    }
}

/// HTTP client used by source adapters and the vision client.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    source_id: String,
    request_delay: Duration,
    rate_limiter: RateLimiter,
    default_headers: Vec<(String, String)>,
}

impl HttpClient {
    /// Create a builder.
    ///
    /// - `source_id`: name used in logs
    /// - `timeout`: whole-request timeout
    /// - `request_delay`: pause after each request
    pub fn builder(source_id: &str, timeout: Duration, request_delay: Duration) -> HttpClientBuilder {
        HttpClientBuilder {
            source_id: source_id.to_string(),
            timeout,
            request_delay,
            user_agent: None,
            rate_limiter: None,
            default_headers: Vec::new(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// GET a URL.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        self.get_with_headers(url, &[]).await
    }

    /// GET a URL with extra headers.
    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, reqwest::Error> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        self.send(url, request).await
    }

    /// GET a URL and return its body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, reqwest::Error> {
        self.get(url).await?.text().await
    }

    /// POST a JSON body.
    pub async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        json: &T,
    ) -> Result<HttpResponse, reqwest::Error> {
        let request = self.client.post(url).json(json);
        self.send(url, request).await
    }

    async fn send(
        &self,
        url: &str,
        mut request: RequestBuilder,
    ) -> Result<HttpResponse, reqwest::Error> {
        for (name, value) in &self.default_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let host = self.rate_limiter.acquire(url).await;

        let start = Instant::now();
        let response = request.send().await?;
        let status = response.status();
        let headers = extract_response_headers(&response);

        trace!(
            "[{}] {} -> {} in {:?}",
            self.source_id,
            url,
            status.as_u16(),
            start.elapsed()
        );

        if let Some(ref host) = host {
            self.rate_limiter
                .report_response_status(
                    host,
                    status.as_u16(),
                    url,
                    headers.contains_key("retry-after"),
                )
                .await;
        }

        if self.request_delay > Duration::ZERO {
            tokio::time::sleep(self.request_delay).await;
        }

        Ok(HttpResponse {
            status,
            headers,
            response,
        })
    }
}
