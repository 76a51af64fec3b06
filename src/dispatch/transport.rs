use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use crate::error::ImgenError;

/// Max body size accepted from the backend (base64 images are large).
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl BackendResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One round trip to the job backend. Implementations must tolerate
/// concurrent use from any number of pipeline tasks.
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: BackendRequest,
    ) -> impl Future<Output = Result<BackendResponse, ImgenError>> + Send;
}

/// `reqwest`-backed transport. One client, one shared connection pool.
pub struct HttpTransport {
    client: Client,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .expect("failed to build backend HTTP client");
        Self {
            client,
            request_timeout,
        }
    }
}

impl Transport for HttpTransport {
    async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, ImgenError> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.timeout(self.request_timeout).send().await?;
        let status = response.status().as_u16();

        // Refuse oversized bodies before buffering them
        if let Some(len) = response.content_length()
            && len as usize > MAX_BODY_BYTES
        {
            return Err(ImgenError::Other(format!(
                "response too large: {len} bytes (max {MAX_BODY_BYTES})"
            )));
        }

        let body = response.bytes().await?;
        if body.len() > MAX_BODY_BYTES {
            return Err(ImgenError::Other(format!(
                "response too large: {} bytes (max {MAX_BODY_BYTES})",
                body.len()
            )));
        }

        Ok(BackendResponse {
            status,
            body: body.to_vec(),
        })
    }
}
