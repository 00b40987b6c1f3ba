//! Default fetcher over `reqwest`.

use super::traits::*;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use tracing::debug;

/// Fetches event streams with a shared `reqwest::Client`. Redirects are
/// followed by the client; the final URL is reported back so the
/// connection can rewrite its endpoint.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured client (proxies, TLS settings, timeouts).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut builder = self
            .client
            .get(request.url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        if let Some(id) = &request.last_event_id {
            builder = builder.header("last-event-id", id.clone());
        }

        let response = tokio::select! {
            _ = request.cancel.cancelled() => return Err(FetchError::Cancelled),
            result = builder.send() => result.map_err(classify)?,
        };

        let status = response.status().as_u16();
        let redirected_to =
            (response.url() != &request.url).then(|| response.url().clone());
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        debug!(status, ?content_type, "response headers received");

        // 204, or an explicit zero-length body, means the server produced
        // no content at all. Streaming responses are chunked and carry no
        // content length, so they always land in the Some arm.
        let body = if status == 204 || response.content_length() == Some(0) {
            None
        } else {
            let stream = response.bytes_stream().map(|chunk| chunk.map_err(classify));
            Some(Box::pin(stream) as BodyStream)
        };

        Ok(FetchResponse {
            status,
            content_type,
            redirected_to,
            body,
        })
    }
}

/// Connection-level interruptions are the retryable "the server
/// disconnected" class; anything else (TLS, decode, builder misuse,
/// timeouts) is fatal.
fn classify(error: reqwest::Error) -> FetchError {
    if !error.is_timeout() && (error.is_connect() || error.is_body()) {
        FetchError::Disconnected(error.to_string())
    } else {
        FetchError::Other(error.to_string())
    }
}
