//! Server-Sent Events frame parser.
//!
//! [`SseCodec`] turns an append-only byte stream into discrete [`SseEvent`]
//! records. Records are separated by a blank line (`\n\n`, or `\r\n\r\n`
//! from servers that use CRLF line endings). Within a record the `id`,
//! `event` and `data` fields are recognized; everything else is ignored.
//!
//! The codec does not interpret events. Consumers are expected to:
//! - drop pings, i.e. events whose data is empty or blank ([`SseEvent::is_ping`])
//! - warn about and skip events without a name, without ending the stream
//!
//! # Examples
//!
//! ```rust
//! use bytes::BytesMut;
//! use mcp_http_transport::sse::SseCodec;
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = SseCodec::default();
//! let mut buf = BytesMut::from("event: endpoint\ndata: /messages?session=1\n\n");
//!
//! let event = codec.decode(&mut buf).unwrap().unwrap();
//! assert_eq!(event.name(), Some("endpoint"));
//! assert_eq!(event.data, "/messages?session=1");
//! ```

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

use crate::error::{McpError, McpResult};

/// Default upper bound for a single buffered record.
pub const DEFAULT_MAX_EVENT_SIZE: usize = 4 * 1024 * 1024;

/// Event name carrying the POST URL on the legacy transport.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// Event name carrying a JSON-RPC message.
pub const MESSAGE_EVENT: &str = "message";

/// One decoded SSE record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `id:` field
    pub id: Option<String>,
    /// Value of the `event:` field
    pub name: Option<String>,
    /// All `data:` lines, joined with `\n`
    pub data: String,
}

impl SseEvent {
    /// The event name, if the record had one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Keep-alive events carry no payload and must not reach the protocol layer.
    pub fn is_ping(&self) -> bool {
        self.data.trim().is_empty()
    }
}

/// Decoder for `text/event-stream` bodies.
#[derive(Debug, Clone)]
pub struct SseCodec {
    max_event_size: usize,
    // buffered bytes already searched for a delimiter
    scanned: usize,
}

impl SseCodec {
    /// Create a codec rejecting records larger than `max_event_size` bytes.
    pub fn new(max_event_size: usize) -> Self {
        Self {
            max_event_size,
            scanned: 0,
        }
    }
}

impl Default for SseCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENT_SIZE)
    }
}

impl Decoder for SseCodec {
    type Item = SseEvent;
    type Error = McpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SseEvent>, McpError> {
        // a delimiter may straddle the previous scan boundary
        let from = self.scanned.saturating_sub(MAX_DELIMITER_LEN - 1);
        let Some((end, delimiter_len)) = find_record_end(&src[from..]) else {
            if src.len() > self.max_event_size {
                return Err(McpError::malformed(format!(
                    "SSE record exceeds {} bytes",
                    self.max_event_size
                )));
            }
            self.scanned = src.len();
            return Ok(None);
        };

        self.scanned = 0;
        let record = src.split_to(from + end);
        src.advance(delimiter_len);
        parse_record(&record).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SseEvent>, McpError> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        self.scanned = 0;
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        // unterminated trailing record
        let record = src.split();
        parse_record(&record).map(Some)
    }
}

/// Decode a raw body stream into SSE events.
pub fn decode_stream<S>(
    body: S,
    codec: SseCodec,
) -> impl Stream<Item = McpResult<SseEvent>> + Send + Unpin + 'static
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static,
{
    FramedRead::new(StreamReader::new(body), codec)
}

/// Decode the body of a `text/event-stream` HTTP response.
pub fn response_events(
    response: reqwest::Response,
    codec: SseCodec,
) -> impl Stream<Item = McpResult<SseEvent>> + Send + Unpin + 'static {
    let body = Box::pin(response.bytes_stream())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    decode_stream(body, codec)
}

const MAX_DELIMITER_LEN: usize = 4;

/// Position of the first record delimiter and its length.
fn find_record_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buf, b"\n\n").map(|pos| (pos, 2));
    let crlf = find(buf, b"\r\n\r\n").map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_record(record: &[u8]) -> McpResult<SseEvent> {
    let text = std::str::from_utf8(record)
        .map_err(|e| McpError::malformed(format!("SSE record is not UTF-8: {}", e)))?;

    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" => event.id = Some(value.to_string()),
            "event" => event.name = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    event.data = data_lines.join("\n");
    Ok(event)
}
