//! Incremental event-stream parser.
//!
//! Turns arbitrary-sized byte chunks into discrete SSE messages with no
//! assumption about where chunk boundaries fall, including a `\r\n`
//! terminator split across two chunks. Pure buffering state machine:
//! no I/O and no knowledge of connections beyond [`ConnectionHandle`].

use crate::types::PendingMessage;
use std::sync::Weak;
use tracing::debug;

/// Non-owning view of the connection a parser feeds.
///
/// `id:` and `retry:` field lines write through to the connection the
/// moment they are parsed; finalizing a message reads the resumption
/// token back. Held as a weak handle and checked for liveness on every
/// use; once the connection is gone the parser degrades to draining and
/// discarding bytes without error.
pub trait ConnectionHandle: Send + Sync {
    fn last_event_id(&self) -> Option<String>;

    fn set_last_event_id(&self, id: String);

    /// New reconnection delay in milliseconds, unclamped.
    fn set_reconnection_time(&self, ms: u64);

    /// Hand a batch of finalized messages over for queued delivery.
    fn enqueue_messages(&self, batch: Vec<PendingMessage>);
}

/// Sink for one pump of an event-stream body.
///
/// The owning connection creates a fresh parser per connection attempt
/// and destroys it when the pump ends.
pub struct EventStreamParser {
    connection: Weak<dyn ConnectionHandle>,
    /// Tail of input that has not yet resolved to a full line.
    carry: Vec<u8>,
    current: Option<PendingMessage>,
    finalized: Vec<PendingMessage>,
    /// The previous chunk ended with a bare CR; an LF at the start of the
    /// next chunk belongs to that terminator and must be swallowed.
    pending_lf: bool,
    done: bool,
}

impl EventStreamParser {
    pub fn new(connection: Weak<dyn ConnectionHandle>) -> Self {
        Self {
            connection,
            carry: Vec::new(),
            current: None,
            finalized: Vec::new(),
            pending_lf: false,
            done: false,
        }
    }

    /// Scan `bytes` for line terminators (`\n`, `\r`, or `\r\n`), process
    /// every complete line, and retain the unterminated remainder for the
    /// next call. All messages finalized during one call are released as a
    /// single batch, preserving their relative order.
    ///
    /// Writes arriving after [`end`](Self::end) or [`abort`](Self::abort)
    /// are silently discarded.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.done {
            return;
        }
        let Some(connection) = self.connection.upgrade() else {
            // The connection is gone; drain and discard.
            self.clear();
            return;
        };

        let mut input = bytes;
        if self.pending_lf && !input.is_empty() {
            self.pending_lf = false;
            if input[0] == b'\n' {
                input = &input[1..];
            }
        }

        while let Some(eol) = find_end_of_line(input) {
            self.carry.extend_from_slice(&input[..eol.pos]);
            let line = std::mem::take(&mut self.carry);
            self.pending_lf = eol.pending_lf;
            input = &input[eol.next..];
            self.process_line(&String::from_utf8_lossy(&line), connection.as_ref());
        }
        self.carry.extend_from_slice(input);

        if !self.finalized.is_empty() {
            connection.enqueue_messages(std::mem::take(&mut self.finalized));
        }
    }

    /// The stream finished cleanly. Any partially accumulated message is
    /// dropped on the floor; no partial message is ever delivered.
    pub fn end(&mut self) {
        self.clear();
    }

    /// The stream was aborted. Same cleanup as [`end`](Self::end).
    pub fn abort(&mut self, reason: &str) {
        debug!("event stream aborted: {reason}");
        self.clear();
    }

    fn clear(&mut self) {
        self.done = true;
        self.carry.clear();
        self.current = None;
        self.finalized.clear();
        self.pending_lf = false;
    }

    fn process_line(&mut self, line: &str, connection: &dyn ConnectionHandle) {
        if line.is_empty() {
            // Blank line: finalize the open message, if any. The id is the
            // connection's resumption token at this instant, not whatever
            // `id:` value this particular message may have carried.
            if let Some(mut message) = self.current.take() {
                message.id = connection.last_event_id();
                self.finalized.push(message);
            }
            return;
        }
        if line.starts_with(':') {
            // Comment.
            return;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => (&line[..pos], &line[pos + 1..]),
            None => (line, ""),
        };
        // Exactly one leading space is optional and trimmed; any further
        // whitespace is literal value content.
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "data" => self.open_message().data.push(value.to_owned()),
            "event" => self.open_message().event = Some(value.to_owned()),
            // An empty id is a valid token; it becomes the empty string.
            "id" => connection.set_last_event_id(value.to_owned()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    connection.set_reconnection_time(ms);
                }
                // Unparseable retry values are ignored.
            }
            // Unknown fields are ignored and leave the open message alone.
            _ => {}
        }
    }

    fn open_message(&mut self) -> &mut PendingMessage {
        self.current.get_or_insert_with(PendingMessage::default)
    }
}

struct EndOfLine {
    /// Offset of the terminator's first byte; the line ends just before it.
    pos: usize,
    /// Offset of the first byte after the terminator.
    next: usize,
    /// The terminator was a CR at the very end of the chunk; a following
    /// LF may still arrive in the next chunk.
    pending_lf: bool,
}

fn find_end_of_line(input: &[u8]) -> Option<EndOfLine> {
    let mut pos = 0;
    while pos < input.len() {
        match input[pos] {
            b'\n' => {
                return Some(EndOfLine {
                    pos,
                    next: pos + 1,
                    pending_lf: false,
                })
            }
            b'\r' => {
                return if pos + 1 < input.len() {
                    let next = if input[pos + 1] == b'\n' { pos + 2 } else { pos + 1 };
                    Some(EndOfLine {
                        pos,
                        next,
                        pending_lf: false,
                    })
                } else {
                    Some(EndOfLine {
                        pos,
                        next: pos + 1,
                        pending_lf: true,
                    })
                };
            }
            _ => pos += 1,
        }
    }
    None
}
