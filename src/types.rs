use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Ready state of an [`EventSource`](crate::EventSource) connection.
///
/// The numeric values match the web EventSource API
/// (`CONNECTING = 0`, `OPEN = 1`, `CLOSED = 2`). `Closed` is absorbing:
/// once reached, no further transitions or event dispatch occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ReadyState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One finalized SSE message, not yet delivered.
///
/// `data` keeps one entry per `data:` line, in order. `event` holds the last
/// `event:` line seen. `id` is a snapshot of the connection's resumption
/// token taken when the message was finalized by a blank line, which is not
/// necessarily a value carried by this message itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingMessage {
    pub data: Vec<String>,
    pub event: Option<String>,
    pub id: Option<String>,
}

/// A delivered SSE message as seen by an [`EventHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Event type; `"message"` when the stream did not name one.
    pub event: String,
    /// All `data:` fragments of the message, joined with `"\n"`.
    pub data: String,
    /// The resumption token current when the message was finalized.
    #[serde(rename = "lastEventId", skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<String>,
    /// Origin of the connection's (possibly redirected) URL.
    pub origin: String,
}

// ---------------------------------------------------------------------------
// Event dispatch
// ---------------------------------------------------------------------------

/// Error returned by an [`EventHandler`] to abort message delivery.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives connection notifications. Implement this and pass it to
/// [`EventSource::connect`](crate::EventSource::connect).
///
/// `on_message` returning an error abandons the rest of the current batch
/// and closes the connection with a fatal error.
pub trait EventHandler: Send + Sync {
    fn on_open(&self) {}

    fn on_message(&self, message: MessageEvent) -> Result<(), HandlerError>;

    fn on_error(&self, _error: &EventSourceError) {}
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// All failures a connection can report. Nothing is thrown across the
/// public boundary; errors arrive via [`EventHandler::on_error`].
#[derive(Debug, thiserror::Error)]
pub enum EventSourceError {
    #[error("cannot open an EventSource to '{0}': the URL is invalid")]
    InvalidUrl(String),
    #[error("the withCredentials option is not supported; it must be false or absent")]
    WithCredentials,
    #[error("the response status code was {0}")]
    HttpStatus(u16),
    #[error("no content type header was present in the response")]
    MissingContentType,
    #[error("the content type '{0}' is invalid")]
    InvalidContentType(String),
    #[error("the server disconnected")]
    Disconnected,
    #[error("the server provided no content")]
    NoContent,
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("the event stream failed: {0}")]
    Stream(String),
    #[error("the connection was cancelled")]
    Cancelled,
    #[error("an event handler failed: {0}")]
    Handler(String),
}

impl EventSourceError {
    /// Whether the connection may reconnect after this error.
    ///
    /// A first empty-body response is also recoverable, but that decision
    /// depends on connection state and is made by the controller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}
