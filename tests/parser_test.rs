//! Tests for the incremental event-stream parser: chunking invariance,
//! line-terminator equivalence, and field semantics.

use evsource::parser::{ConnectionHandle, EventStreamParser};
use evsource::types::PendingMessage;
use std::sync::{Arc, Mutex};

/// Stand-in for the connection side of the parser seam. Records every
/// write-through and every released batch.
#[derive(Default)]
struct TestConnection {
    last_event_id: Mutex<Option<String>>,
    retry_values: Mutex<Vec<u64>>,
    batches: Mutex<Vec<Vec<PendingMessage>>>,
}

impl ConnectionHandle for TestConnection {
    fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().unwrap().clone()
    }

    fn set_last_event_id(&self, id: String) {
        *self.last_event_id.lock().unwrap() = Some(id);
    }

    fn set_reconnection_time(&self, ms: u64) {
        self.retry_values.lock().unwrap().push(ms);
    }

    fn enqueue_messages(&self, batch: Vec<PendingMessage>) {
        self.batches.lock().unwrap().push(batch);
    }
}

impl TestConnection {
    fn messages(&self) -> Vec<PendingMessage> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }

    fn retry_values(&self) -> Vec<u64> {
        self.retry_values.lock().unwrap().clone()
    }
}

fn parser_for(connection: &Arc<TestConnection>) -> (EventStreamParser, Arc<dyn ConnectionHandle>) {
    let handle: Arc<dyn ConnectionHandle> = Arc::clone(connection) as Arc<dyn ConnectionHandle>;
    (EventStreamParser::new(Arc::downgrade(&handle)), handle)
}

/// Feed the whole input as a single chunk and return the finalized
/// messages.
fn parse(input: &str) -> (Arc<TestConnection>, Vec<PendingMessage>) {
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    parser.feed(input.as_bytes());
    let messages = connection.messages();
    (connection, messages)
}

fn message(data: &[&str], event: Option<&str>, id: Option<&str>) -> PendingMessage {
    PendingMessage {
        data: data.iter().map(|s| s.to_string()).collect(),
        event: event.map(str::to_owned),
        id: id.map(str::to_owned),
    }
}

#[test]
fn single_data_message() {
    let (_, messages) = parse("data: hello\n\n");
    assert_eq!(messages, vec![message(&["hello"], None, None)]);
}

#[test]
fn event_type_and_multiple_data_lines() {
    let (_, messages) = parse("event: ping\ndata: 1\ndata: 2\n\n");
    assert_eq!(messages, vec![message(&["1", "2"], Some("ping"), None)]);
}

#[test]
fn last_event_type_wins() {
    let (_, messages) = parse("event: a\nevent: b\ndata: x\n\n");
    assert_eq!(messages, vec![message(&["x"], Some("b"), None)]);
}

#[test]
fn comments_are_ignored() {
    let (_, messages) = parse(": this is a comment\ndata: x\n\n");
    assert_eq!(messages, vec![message(&["x"], None, None)]);
}

#[test]
fn chunking_invariance() {
    let whole = parse("data: a\ndata: b\n\n").1;

    // Line at a time.
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    parser.feed(b"data: a\n");
    parser.feed(b"data: b\n");
    parser.feed(b"\n");
    assert_eq!(connection.messages(), whole);

    // Byte at a time.
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    for byte in "data: a\ndata: b\n\n".bytes() {
        parser.feed(&[byte]);
    }
    assert_eq!(connection.messages(), whole);
}

#[test]
fn line_terminators_are_interchangeable() {
    let expected = parse("data: a\ndata: b\n\n").1;
    assert_eq!(parse("data: a\rdata: b\r\r").1, expected);
    assert_eq!(parse("data: a\r\ndata: b\r\n\r\n").1, expected);
    assert_eq!(parse("data: a\r\ndata: b\n\r").1, expected);
}

#[test]
fn crlf_split_across_chunks_is_one_terminator() {
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    parser.feed(b"data: a\r");
    parser.feed(b"\ndata: b\r\n\r");
    parser.feed(b"\n");
    assert_eq!(connection.messages(), vec![message(&["a", "b"], None, None)]);
}

#[test]
fn bare_cr_then_non_lf_chunk_still_terminates() {
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    parser.feed(b"data: a\r");
    parser.feed(b"data: b\r\r");
    assert_eq!(connection.messages(), vec![message(&["a", "b"], None, None)]);
}

#[test]
fn blank_line_without_fields_produces_nothing() {
    let (connection, messages) = parse("\n\n\n");
    assert!(messages.is_empty());
    assert!(connection.batches.lock().unwrap().is_empty());
}

#[test]
fn id_field_updates_token_immediately() {
    let (connection, messages) = parse("id: 7\ndata: x\n\ndata: y\n\n");
    // Both the message carrying the id and the one after it snapshot "7".
    assert_eq!(
        messages,
        vec![
            message(&["x"], None, Some("7")),
            message(&["y"], None, Some("7")),
        ]
    );
    assert_eq!(connection.last_event_id(), Some("7".to_owned()));
}

#[test]
fn id_without_data_sets_token_but_emits_nothing() {
    let (connection, messages) = parse("id: 9\n\n");
    assert!(messages.is_empty());
    assert_eq!(connection.last_event_id(), Some("9".to_owned()));
}

#[test]
fn empty_id_is_a_valid_token() {
    let (connection, _) = parse("id\n\n");
    assert_eq!(connection.last_event_id(), Some(String::new()));
}

#[test]
fn retry_values_are_forwarded_and_garbage_is_ignored() {
    let (connection, messages) = parse("retry: 50\n\nretry: 999999\n\nretry: notanumber\n\n");
    assert!(messages.is_empty());
    // Clamping happens connection-side; the parser forwards raw values.
    assert_eq!(connection.retry_values(), vec![50, 999_999]);
}

#[test]
fn negative_retry_is_ignored() {
    let (connection, _) = parse("retry: -1\n\n");
    assert!(connection.retry_values().is_empty());
}

#[test]
fn value_strips_exactly_one_leading_space() {
    let (_, messages) = parse("data:one\ndata:  two\ndata\n\n");
    // No space, two spaces (one preserved), no colon at all.
    assert_eq!(messages, vec![message(&["one", " two", ""], None, None)]);
}

#[test]
fn value_may_contain_colons() {
    let (_, messages) = parse("data: http://example.com/a:b\n\n");
    assert_eq!(
        messages,
        vec![message(&["http://example.com/a:b"], None, None)]
    );
}

#[test]
fn unknown_fields_do_not_disturb_the_open_message() {
    let (_, messages) = parse("data: x\nunknown: y\nflavor\ndata: z\n\n");
    assert_eq!(messages, vec![message(&["x", "z"], None, None)]);
}

#[test]
fn messages_completed_in_one_feed_are_released_as_one_batch() {
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    parser.feed(b"data: 1\n\ndata: 2\n\ndata: 3\n\n");
    let batches = connection.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0],
        vec![
            message(&["1"], None, None),
            message(&["2"], None, None),
            message(&["3"], None, None),
        ]
    );
}

#[test]
fn end_drops_partial_message_and_carry() {
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    parser.feed(b"data: doomed\ndata: also doo");
    parser.end();
    assert!(connection.messages().is_empty());
}

#[test]
fn feed_after_end_is_a_silent_no_op() {
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    parser.end();
    parser.feed(b"data: late\n\n");
    assert!(connection.messages().is_empty());
}

#[test]
fn feed_after_abort_is_a_silent_no_op() {
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    parser.feed(b"data: early\n\n");
    parser.abort("test abort");
    parser.feed(b"data: late\n\n");
    assert_eq!(connection.messages(), vec![message(&["early"], None, None)]);
}

#[test]
fn parser_outlives_connection_without_error() {
    let connection = Arc::new(TestConnection::default());
    let handle: Arc<dyn ConnectionHandle> = Arc::clone(&connection) as Arc<dyn ConnectionHandle>;
    let weak = Arc::downgrade(&handle);
    drop(handle);
    drop(connection);
    let mut parser = EventStreamParser::new(weak);
    // Degrades to draining and discarding.
    parser.feed(b"data: nobody home\n\n");
    parser.feed(b"data: still nobody\n\n");
}

#[test]
fn utf8_split_across_chunks_survives() {
    let connection = Arc::new(TestConnection::default());
    let (mut parser, _handle) = parser_for(&connection);
    let input = "data: caf\u{e9}\n\n".as_bytes();
    // Split inside the two-byte e-acute sequence.
    let split = input.len() - 4;
    parser.feed(&input[..split]);
    parser.feed(&input[split..]);
    assert_eq!(
        connection.messages(),
        vec![message(&["caf\u{e9}"], None, None)]
    );
}
