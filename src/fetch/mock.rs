//! Mock fetcher for testing. No real network.

use super::traits::*;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use url::Url;

/// One scripted connection attempt: either a response or a fetch failure.
pub enum MockOutcome {
    Response(MockResponse),
    Failure(FetchError),
}

/// A canned response. `body: None` models a server that produced no
/// content at all.
pub struct MockResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub redirected_to: Option<Url>,
    pub body: Option<Vec<Result<Bytes, FetchError>>>,
}

impl MockResponse {
    /// A 200 `text/event-stream` response delivering the given chunks and
    /// then ending cleanly.
    pub fn event_stream(chunks: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: Some("text/event-stream".into()),
            redirected_to: None,
            body: Some(
                chunks
                    .iter()
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk.as_bytes())))
                    .collect(),
            ),
        }
    }

    /// A 200 `text/event-stream` response with no body.
    pub fn no_body() -> Self {
        Self {
            status: 200,
            content_type: Some("text/event-stream".into()),
            redirected_to: None,
            body: None,
        }
    }

    /// An empty event-stream response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: Some("text/event-stream".into()),
            redirected_to: None,
            body: Some(Vec::new()),
        }
    }

    pub fn with_content_type(mut self, content_type: Option<&str>) -> Self {
        self.content_type = content_type.map(str::to_owned);
        self
    }

    pub fn with_redirect(mut self, location: Url) -> Self {
        self.redirected_to = Some(location);
        self
    }

    /// End the body with a transport error instead of a clean EOF.
    pub fn with_stream_error(mut self, error: FetchError) -> Self {
        self.body.get_or_insert_with(Vec::new).push(Err(error));
        self
    }
}

/// Record of one attempt the fetcher observed.
pub struct MockRequest {
    pub url: Url,
    pub last_event_id: Option<String>,
    pub at: tokio::time::Instant,
}

/// Scripted fetcher: pops one [`MockOutcome`] per attempt and records what
/// each attempt asked for. Once the script is exhausted, further attempts
/// hang until their cancellation scope is aborted, like a server that
/// never answers.
pub struct MockFetcher {
    outcomes: Mutex<Vec<MockOutcome>>,
    requests: Mutex<Vec<MockRequest>>,
}

impl MockFetcher {
    pub fn new(outcomes: Vec<MockOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a single event-stream response.
    pub fn event_stream(chunks: &[&str]) -> Self {
        Self::new(vec![MockOutcome::Response(MockResponse::event_stream(
            chunks,
        ))])
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The `Last-Event-ID` each attempt carried, in order.
    pub fn last_event_ids(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.last_event_id.clone())
            .collect()
    }

    /// When each attempt arrived (tokio clock, so paused-time tests can
    /// assert reconnect delays).
    pub fn request_times(&self) -> Vec<tokio::time::Instant> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.at)
            .collect()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.requests.lock().unwrap().push(MockRequest {
            url: request.url.clone(),
            last_event_id: request.last_event_id.clone(),
            at: tokio::time::Instant::now(),
        });

        let outcome = {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                None
            } else {
                Some(outcomes.remove(0))
            }
        };

        match outcome {
            None => {
                request.cancel.cancelled().await;
                Err(FetchError::Cancelled)
            }
            Some(MockOutcome::Failure(error)) => Err(error),
            Some(MockOutcome::Response(response)) => Ok(FetchResponse {
                status: response.status,
                content_type: response.content_type,
                redirected_to: response.redirected_to,
                body: response
                    .body
                    .map(|chunks| Box::pin(futures::stream::iter(chunks)) as BodyStream),
            }),
        }
    }
}
