use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl Request {
    /// Value of the first query parameter named `key`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self { status, body: value.to_string() }
    }

    pub fn status(status: u16) -> Self {
        Self { status, body: String::new() }
    }
}

/// Raw HTTP capability. Status codes are returned, not interpreted; the
/// rate-limited client decides what is retryable.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<HttpResponse> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        let builder = builder.query(&request.query);
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let resp = builder.send().await.map_err(classify_reqwest)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(classify_reqwest)?;
        Ok(HttpResponse { status, body })
    }
}

fn classify_reqwest(e: reqwest::Error) -> AppError {
    if e.is_builder() {
        AppError::permanent("transport", 0, e.to_string())
    } else {
        // Timeouts, resets, DNS and body-read failures are all worth another attempt.
        AppError::transient("transport", e.to_string())
    }
}
