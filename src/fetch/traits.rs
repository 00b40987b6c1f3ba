use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Readable body stream of a fetch response. Yields chunks until the
/// stream ends, errors, or is cancelled.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// One SSE connection attempt.
pub struct FetchRequest {
    pub url: Url,
    /// Resumption token to echo back as the `Last-Event-ID` header.
    pub last_event_id: Option<String>,
    /// Scope for this attempt; aborting it must fail the fetch and any
    /// subsequent body reads.
    pub cancel: CancellationToken,
}

/// What the connection controller needs from a response: status, the
/// content type, the final URL when a redirect occurred, and an optional
/// body. `body: None` means the server produced no content at all.
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Final URL after redirects; `None` when the request was not
    /// redirected.
    pub redirected_to: Option<Url>,
    pub body: Option<BodyStream>,
}

/// Transport-level failure, pre-classified for the controller.
///
/// Only `Disconnected` is treated as a clean, retryable end-of-stream
/// during pumping; everything else is fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("connection lost: {0}")]
    Disconnected(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Performs the HTTP fetch for a connection attempt. The default
/// implementation is [`HttpFetcher`](super::HttpFetcher); a custom one can
/// be supplied through
/// [`EventSourceInit`](crate::connection::EventSourceInit).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}
