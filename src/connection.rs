//! Connection controller: owns one logical SSE client and drives
//! fetch → validate → pump → classify-outcome → reconnect-or-terminate
//! cycles.
//!
//! All connection state lives in one [`SharedState`] behind a mutex; the
//! driver task is the only place that suspends (at the fetch, at each body
//! read, and at the reconnect timer), so within one connection everything
//! is strictly sequential. A separate delivery task drains finalized
//! message batches so that dispatch never re-enters the byte-scanning
//! loop and batches arrive in strict FIFO order.

use crate::fetch::{FetchError, FetchRequest, Fetcher, HttpFetcher};
use crate::parser::{ConnectionHandle, EventStreamParser};
use crate::scheduler;
use crate::types::{EventHandler, EventSourceError, MessageEvent, PendingMessage, ReadyState};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

/// Diagnostic sink invoked from the error path, in addition to the error
/// notification dispatched to the handler. Stands in for the host's
/// uncaught-exception channel.
pub type DiagnosticFn = Box<dyn Fn(&EventSourceError) + Send + Sync>;

/// Options for [`EventSource::connect`].
pub struct EventSourceInit {
    pub handler: Arc<dyn EventHandler>,
    /// Custom fetch override; defaults to [`HttpFetcher`].
    pub fetcher: Option<Arc<dyn Fetcher>>,
    /// Present for API parity with the web EventSource. Credentialed
    /// requests are not supported: construction fails when set.
    pub with_credentials: bool,
    pub on_diagnostic: Option<DiagnosticFn>,
}

impl EventSourceInit {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            fetcher: None,
            with_credentials: false,
            on_diagnostic: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_diagnostic(
        mut self,
        diagnostic: impl Fn(&EventSourceError) + Send + Sync + 'static,
    ) -> Self {
        self.on_diagnostic = Some(Box::new(diagnostic));
        self
    }
}

struct SharedState {
    ready_state: ReadyState,
    /// Resolved endpoint; rewritten in place when the server redirects.
    url: Url,
    last_event_id: Option<String>,
    reconnection_time: Duration,
    /// The immediately preceding successful response had no body at all.
    /// A second strike fails the connection instead of reconnecting
    /// forever against a server that never produces one.
    previous_no_body: bool,
    close_called: bool,
    /// Scope for the in-flight attempt or pending reconnect timer.
    /// Replaced, never reused, each cycle.
    cancel: CancellationToken,
}

struct Inner {
    shared: Mutex<SharedState>,
    handler: Arc<dyn EventHandler>,
    fetcher: Arc<dyn Fetcher>,
    on_diagnostic: Option<DiagnosticFn>,
    batch_tx: mpsc::UnboundedSender<Vec<PendingMessage>>,
}

enum AttemptOutcome {
    Reconnect,
    Terminated,
}

impl ConnectionHandle for Inner {
    fn last_event_id(&self) -> Option<String> {
        self.shared.lock().unwrap().last_event_id.clone()
    }

    fn set_last_event_id(&self, id: String) {
        self.shared.lock().unwrap().last_event_id = Some(id);
    }

    fn set_reconnection_time(&self, ms: u64) {
        self.shared.lock().unwrap().reconnection_time = scheduler::clamp_reconnection_time(ms);
    }

    fn enqueue_messages(&self, batch: Vec<PendingMessage>) {
        // The receiver only disappears once the EventSource itself is
        // gone, at which point the batch is dropped on the floor.
        let _ = self.batch_tx.send(batch);
    }
}

impl Inner {
    fn notify_open(&self) {
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.ready_state == ReadyState::Closed {
                return;
            }
            shared.ready_state = ReadyState::Open;
        }
        debug!("event source open");
        self.handler.on_open();
    }

    /// Single funnel for every connection-level failure. Cancels the
    /// active scope, decides the terminal-state question, dispatches the
    /// error notification, and surfaces the error through the diagnostic
    /// channel whether or not a handler observed it.
    fn notify_error(&self, error: EventSourceError, reconnecting: bool) {
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.ready_state == ReadyState::Closed {
                return;
            }
            shared.cancel.cancel();
            if !reconnecting {
                shared.ready_state = ReadyState::Closed;
            }
        }
        if reconnecting {
            warn!("event source error (will reconnect): {error}");
        } else {
            error!("event source error: {error}");
        }
        self.handler.on_error(&error);
        if let Some(diagnostic) = &self.on_diagnostic {
            diagnostic(&error);
        }
    }

    /// Deliver one batch, in order. A handler error abandons the rest of
    /// the batch and fails the connection; batches still queued behind
    /// this one are attempted independently and no-op once closed.
    fn notify_messages(&self, batch: Vec<PendingMessage>) {
        let origin = {
            let shared = self.shared.lock().unwrap();
            if shared.ready_state == ReadyState::Closed {
                return;
            }
            shared.url.origin().ascii_serialization()
        };
        for message in batch {
            let event = MessageEvent {
                event: message.event.unwrap_or_else(|| "message".to_owned()),
                data: message.data.join("\n"),
                last_event_id: message.id,
                origin: origin.clone(),
            };
            if let Err(err) = self.handler.on_message(event) {
                self.notify_error(EventSourceError::Handler(err.to_string()), false);
                return;
            }
        }
    }

    /// Driver: one cycle per connection attempt, suspending only at the
    /// fetch, the body reads, and the reconnect timer.
    async fn run(self: Arc<Self>) {
        loop {
            match Arc::clone(&self).attempt().await {
                AttemptOutcome::Terminated => return,
                AttemptOutcome::Reconnect => {
                    let (delay, cancel) = {
                        let mut shared = self.shared.lock().unwrap();
                        if shared.ready_state == ReadyState::Closed {
                            return;
                        }
                        shared.ready_state = ReadyState::Connecting;
                        // Fresh scope; the old one and its pending work
                        // are abandoned.
                        shared.cancel = CancellationToken::new();
                        (shared.reconnection_time, shared.cancel.clone())
                    };
                    if let Err(err) = scheduler::wait(delay, &cancel).await {
                        // Most likely close() ran while the timer was
                        // pending. Do not schedule again.
                        self.notify_error(err, false);
                        return;
                    }
                }
            }
        }
    }

    async fn attempt(self: Arc<Self>) -> AttemptOutcome {
        let (url, last_event_id, cancel) = {
            let shared = self.shared.lock().unwrap();
            if shared.ready_state == ReadyState::Closed {
                return AttemptOutcome::Terminated;
            }
            (
                shared.url.clone(),
                shared.last_event_id.clone(),
                shared.cancel.clone(),
            )
        };

        debug!(%url, "connecting");
        let request = FetchRequest {
            url,
            last_event_id,
            cancel: cancel.clone(),
        };
        let response = match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(FetchError::Cancelled) => {
                self.notify_error(EventSourceError::Cancelled, false);
                return AttemptOutcome::Terminated;
            }
            Err(err) => {
                self.notify_error(EventSourceError::Fetch(err.to_string()), false);
                return AttemptOutcome::Terminated;
            }
        };

        if !(200..300).contains(&response.status) {
            self.notify_error(EventSourceError::HttpStatus(response.status), false);
            return AttemptOutcome::Terminated;
        }
        match &response.content_type {
            None => {
                self.notify_error(EventSourceError::MissingContentType, false);
                return AttemptOutcome::Terminated;
            }
            Some(value) if !is_event_stream(value) => {
                self.notify_error(EventSourceError::InvalidContentType(value.clone()), false);
                return AttemptOutcome::Terminated;
            }
            Some(_) => {}
        }
        if let Some(location) = response.redirected_to {
            debug!(%location, "request was redirected");
            self.shared.lock().unwrap().url = location;
        }

        let Some(mut body) = response.body else {
            let second_strike = {
                let mut shared = self.shared.lock().unwrap();
                let second = shared.previous_no_body;
                shared.previous_no_body = true;
                second
            };
            self.notify_error(EventSourceError::NoContent, !second_strike);
            return if second_strike {
                AttemptOutcome::Terminated
            } else {
                AttemptOutcome::Reconnect
            };
        };

        self.notify_open();

        let handle: Arc<dyn ConnectionHandle> = Arc::clone(&self) as Arc<dyn ConnectionHandle>;
        let mut parser = EventStreamParser::new(Arc::downgrade(&handle));
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    parser.abort("connection cancelled");
                    self.notify_error(EventSourceError::Cancelled, false);
                    return AttemptOutcome::Terminated;
                }
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => parser.feed(&bytes),
                None => {
                    // Clean end-of-stream. Did the server disconnect? If
                    // so, try reconnecting.
                    parser.end();
                    self.notify_error(EventSourceError::Disconnected, true);
                    return AttemptOutcome::Reconnect;
                }
                Some(Err(FetchError::Disconnected(reason))) => {
                    debug!("transport disconnected: {reason}");
                    parser.end();
                    self.notify_error(EventSourceError::Disconnected, true);
                    return AttemptOutcome::Reconnect;
                }
                Some(Err(FetchError::Cancelled)) => {
                    parser.abort("connection cancelled");
                    self.notify_error(EventSourceError::Cancelled, false);
                    return AttemptOutcome::Terminated;
                }
                Some(Err(err)) => {
                    // Not a plain disconnect; do not reconnect.
                    parser.abort("stream failure");
                    self.notify_error(EventSourceError::Stream(err.to_string()), false);
                    return AttemptOutcome::Terminated;
                }
            }
        }
    }
}

/// A resilient SSE client connection.
///
/// Construction spawns a driver task that opens the connection and keeps
/// reconnecting until a fatal error or [`close`](Self::close); dropping
/// the handle closes the connection.
pub struct EventSource {
    inner: Arc<Inner>,
}

impl EventSource {
    /// Open a connection to `url`. Must be called within a Tokio runtime.
    ///
    /// Fails synchronously when the URL does not parse or
    /// `with_credentials` is set; every later failure is reported through
    /// the handler instead.
    pub fn connect(url: &str, init: EventSourceInit) -> Result<Self, EventSourceError> {
        if init.with_credentials {
            return Err(EventSourceError::WithCredentials);
        }
        let url = Url::parse(url).map_err(|_| EventSourceError::InvalidUrl(url.to_owned()))?;

        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<Vec<PendingMessage>>();
        let inner = Arc::new(Inner {
            shared: Mutex::new(SharedState {
                ready_state: ReadyState::Connecting,
                url,
                last_event_id: None,
                reconnection_time: scheduler::DEFAULT_RECONNECTION_TIME,
                previous_no_body: false,
                close_called: false,
                cancel: CancellationToken::new(),
            }),
            handler: init.handler,
            fetcher: init
                .fetcher
                .unwrap_or_else(|| Arc::new(HttpFetcher::new())),
            on_diagnostic: init.on_diagnostic,
            batch_tx,
        });

        // Delivery task: runs dispatch on a later turn than the byte
        // scanning that produced the batch. Holds only a weak reference
        // so the channel closes once the EventSource is gone.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(batch) = batch_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.notify_messages(batch);
            }
        });

        tokio::spawn(Arc::clone(&inner).run());

        Ok(Self { inner })
    }

    /// The canonical (possibly redirect-rewritten) URL.
    pub fn url(&self) -> Url {
        self.inner.shared.lock().unwrap().url.clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.shared.lock().unwrap().ready_state
    }

    /// Close the connection, aborting an in-flight fetch or pending
    /// reconnect timer. Idempotent; no notification fires afterwards.
    pub fn close(&self) {
        let mut shared = self.inner.shared.lock().unwrap();
        if shared.close_called {
            return;
        }
        shared.close_called = true;
        shared.cancel.cancel();
        shared.ready_state = ReadyState::Closed;
        debug!("event source closed");
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// The parsed media type must be exactly `text/event-stream`; parameters
/// are ignored.
fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .eq_ignore_ascii_case("text/event-stream")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_match_ignores_parameters_and_case() {
        assert!(is_event_stream("text/event-stream"));
        assert!(is_event_stream("text/event-stream; charset=utf-8"));
        assert!(is_event_stream("Text/Event-Stream"));
        assert!(is_event_stream("  text/event-stream  "));
        assert!(!is_event_stream("text/plain"));
        assert!(!is_event_stream("application/json"));
        assert!(!is_event_stream(""));
    }
}
