//! Resilient Server-Sent Events (EventSource) client.
//!
//! Consumes an HTTP response body as an unbounded byte stream,
//! incrementally reconstructs discrete events from it, and drives a
//! long-lived connection that reconnects automatically after recoverable
//! disconnects, resuming delivery via the server-assigned `Last-Event-ID`
//! token.

pub mod connection;
pub mod fetch;
pub mod parser;
pub mod scheduler;
pub mod types;

pub use connection::{DiagnosticFn, EventSource, EventSourceInit};
pub use fetch::{FetchError, FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use parser::{ConnectionHandle, EventStreamParser};
pub use types::{EventHandler, EventSourceError, HandlerError, MessageEvent, ReadyState};
