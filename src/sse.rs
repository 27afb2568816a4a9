//! Server-Sent Events (SSE) decoding for assistant reply streams.
//!
//! The reply to a sent message is a byte stream of newline-separated lines.
//! Lines of the form `data: <json>` carry one [`StreamEvent`] each; `event:`,
//! `id:`, comment and blank lines are ignored.  Network chunks do not respect
//! line boundaries, so bytes are buffered until a full line is available.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use crate::observability::{STREAM_BYTES, STREAM_EVENTS, STREAM_MALFORMED};
use crate::{Error, Result, StreamEvent};

/// Sentinel some servers send after the last event.
const DONE_SENTINEL: &str = "[DONE]";

/// Incremental line decoder.
///
/// Feed raw bytes with [`SseDecoder::push`]; pull decoded events with
/// [`SseDecoder::next_event`].  A trailing partial line stays buffered until
/// more bytes arrive or [`SseDecoder::finish`] is called.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    // Prefix of `pending` already known to hold no newline.
    scanned: usize,
    events: VecDeque<StreamEvent>,
    done: bool,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the network.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.done {
            return;
        }
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(bytes);
        let mut start = 0;
        let mut scan = self.scanned;
        while let Some(offset) = buffer[scan..].iter().position(|b| *b == b'\n') {
            let newline = scan + offset;
            self.decode_line(&buffer[start..newline]);
            start = newline + 1;
            scan = start;
            if self.done {
                self.scanned = 0;
                return;
            }
        }
        buffer.drain(..start);
        self.scanned = buffer.len();
        self.pending = buffer;
    }

    /// Flush a final unterminated line at end of input.
    pub fn finish(&mut self) {
        if !self.done && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.decode_line(&line);
        }
        self.scanned = 0;
        self.done = true;
    }

    /// Drop a trailing partial line and stop decoding.
    ///
    /// Used when the transport fails: a truncated line is not an event.
    pub fn abort(&mut self) {
        self.pending.clear();
        self.scanned = 0;
        self.done = true;
    }

    /// Take the next decoded event, if one is ready.
    pub fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.pop_front()
    }

    /// Returns true once the `[DONE]` sentinel was seen or input finished.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, raw: &[u8]) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(err) => {
                let lossy = String::from_utf8_lossy(raw).into_owned();
                warn!(line = %lossy, "skipping stream line with invalid UTF-8");
                STREAM_MALFORMED.click();
                self.events.push_back(StreamEvent::Malformed {
                    line: lossy,
                    reason: format!("invalid UTF-8: {err}"),
                });
                return;
            }
        };
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(payload) = line.strip_prefix("data:") else {
            if !(line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:"))
            {
                debug!(line, "ignoring non-data stream line");
            }
            return;
        };
        let payload = payload.strip_prefix(' ').unwrap_or(payload);
        if payload.trim() == DONE_SENTINEL {
            self.done = true;
            return;
        }
        let event = StreamEvent::from_data(payload);
        if let StreamEvent::Malformed { line, reason } = &event {
            warn!(line = %line, reason = %reason, "skipping malformed stream event");
            STREAM_MALFORMED.click();
        }
        self.events.push_back(event);
    }
}

/// A decoded reply stream.
///
/// Dropping the stream releases the underlying connection, on every exit path.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>,
}

impl EventStream {
    /// Decode a stream of byte chunks.
    pub fn new<S>(byte_stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
    {
        Self {
            inner: Box::pin(process_sse(byte_stream)),
        }
    }

    /// Wrap an already-decoded event stream.
    pub(crate) fn from_events<S>(events: S) -> Self
    where
        S: Stream<Item = Result<StreamEvent>> + Send + 'static,
    {
        Self {
            inner: Box::pin(events),
        }
    }

    /// Decode an in-memory body; convenient for tests and replays.
    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self::new(stream::iter(vec![Ok(body)]))
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

/// Process a stream of bytes into a stream of reply events.
///
/// A transport error is yielded once and ends the stream.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    stream::unfold(
        (byte_stream, SseDecoder::new(), false),
        move |(mut stream, mut decoder, failed)| async move {
            loop {
                if let Some(event) = decoder.next_event() {
                    STREAM_EVENTS.click();
                    return Some((Ok(event), (stream, decoder, failed)));
                }
                if failed || decoder.is_done() {
                    return None;
                }
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        decoder.push(&bytes);
                    }
                    Some(Err(err)) => {
                        decoder.abort();
                        return Some((Err(err), (stream, decoder, true)));
                    }
                    None => decoder.finish(),
                }
            }
        },
    )
}

/// Map a reqwest body stream into this crate's error type.
pub(crate) fn map_body_errors<S>(byte_stream: S) -> impl Stream<Item = Result<Bytes>> + Send + Unpin
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin,
{
    byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TurnStatus;

    fn chunks(
        parts: &[&'static [u8]],
    ) -> impl Stream<Item = Result<Bytes>> + Send + Unpin + use<> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(parts: &[&'static [u8]]) -> Vec<StreamEvent> {
        process_sse(chunks(parts))
            .map(|event| event.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn parse_single_chunk() {
        let events = collect(&[b"data: {\"type\":\"chunk\",\"data\":\"hi\"}\n"]).await;
        assert_eq!(events, vec![StreamEvent::Chunk("hi".to_string())]);
    }

    #[tokio::test]
    async fn parse_backend_framing() {
        let body: &'static [u8] = b"event: status\n\
data: {\"type\": \"status\", \"data\": {\"state\": \"thinking\", \"message\": \"...\"}}\n\n\
event: start\ndata: {\"type\": \"start\", \"data\": \"\"}\n\n\
event: chunk\ndata: {\"type\": \"chunk\", \"data\": \"Hello\"}\n\n\
event: end\ndata: {\"type\": \"end\", \"data\": \"\"}\n\n";
        let events = collect(&[body]).await;
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[0],
            StreamEvent::Status {
                state: TurnStatus::Thinking,
                ..
            }
        ));
        assert_eq!(events[1], StreamEvent::Start);
        assert_eq!(events[2], StreamEvent::Chunk("Hello".to_string()));
        assert_eq!(events[3], StreamEvent::End);
    }

    #[tokio::test]
    async fn line_split_across_chunks() {
        let events = collect(&[
            b"data: {\"type\":\"chu",
            b"nk\",\"data\":\"The \"}\ndata: {\"type\":",
            b"\"chunk\",\"data\":\"ruling\"}\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Chunk("The ".to_string()),
                StreamEvent::Chunk("ruling".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn multibyte_character_split_across_chunks() {
        // "é" is 0xC3 0xA9.
        let events = collect(&[
            b"data: {\"type\":\"chunk\",\"data\":\"caf\xC3",
            b"\xA9\"}\n",
        ])
        .await;
        assert_eq!(events, vec![StreamEvent::Chunk("café".to_string())]);
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_flushed() {
        let events = collect(&[b"data: {\"type\":\"chunk\",\"data\":\"end\"}"]).await;
        assert_eq!(events, vec![StreamEvent::Chunk("end".to_string())]);
    }

    #[tokio::test]
    async fn malformed_line_does_not_end_stream() {
        let events = collect(&[
            b"data: {not json}\ndata: {\"type\":\"chunk\",\"data\":\"ok\"}\n",
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_malformed());
        assert_eq!(events[1], StreamEvent::Chunk("ok".to_string()));
    }

    #[tokio::test]
    async fn crlf_and_comments() {
        let events =
            collect(&[b": keep-alive\r\n\r\ndata: {\"type\":\"error\",\"data\":\"boom\"}\r\n"]).await;
        assert_eq!(events, vec![StreamEvent::Error("boom".to_string())]);
    }

    #[tokio::test]
    async fn done_sentinel_stops_decoding() {
        let events = collect(&[
            b"data: {\"type\":\"chunk\",\"data\":\"a\"}\ndata: [DONE]\ndata: {\"type\":\"chunk\",\"data\":\"b\"}\n",
        ])
        .await;
        assert_eq!(events, vec![StreamEvent::Chunk("a".to_string())]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let parts = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"chunk\",\"data\":\"a\"}\n")),
            Err(Error::streaming("connection reset", None)),
            Ok(Bytes::from_static(b"data: {\"type\":\"chunk\",\"data\":\"b\"}\n")),
        ];
        let results: Vec<Result<StreamEvent>> = process_sse(stream::iter(parts)).collect().await;
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Ok(StreamEvent::Chunk(_))));
        assert!(matches!(results[1], Err(Error::Streaming { .. })));
    }

    #[tokio::test]
    async fn transport_error_discards_truncated_line() {
        let parts = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"chunk\",\"data\":\"a\"}")),
            Err(Error::streaming("connection reset", None)),
        ];
        let results: Vec<Result<StreamEvent>> = process_sse(stream::iter(parts)).collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::Streaming { .. })));
    }

    #[test]
    fn long_line_in_small_pieces_is_scanned_once() {
        let line = format!(
            "data: {{\"type\":\"chunk\",\"data\":\"{}\"}}\n",
            "x".repeat(4096)
        );
        let mut decoder = SseDecoder::new();
        for piece in line.as_bytes()[..line.len() - 1].chunks(3) {
            decoder.push(piece);
            assert_eq!(decoder.scanned, decoder.pending.len());
            assert!(decoder.next_event().is_none());
        }
        decoder.push(b"\n");
        assert!(decoder.pending.is_empty());
        assert_eq!(decoder.scanned, 0);
        assert_eq!(decoder.next_event(), Some(StreamEvent::Chunk("x".repeat(4096))));
    }

    #[test]
    fn several_lines_in_one_push() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"type\":\"chunk\",\"data\":\"a\"}\ndata: {\"type\":\"chunk\",\"data\":\"b\"}\ndata: {\"ty");
        assert_eq!(decoder.next_event(), Some(StreamEvent::Chunk("a".to_string())));
        assert_eq!(decoder.next_event(), Some(StreamEvent::Chunk("b".to_string())));
        assert_eq!(decoder.pending, b"data: {\"ty".to_vec());
        decoder.push(b"pe\":\"chunk\",\"data\":\"c\"}\n");
        assert_eq!(decoder.next_event(), Some(StreamEvent::Chunk("c".to_string())));
    }

    #[test]
    fn decoder_buffers_partial_lines() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"type\":\"chunk\",");
        assert!(decoder.next_event().is_none());
        decoder.push(b"\"data\":\"x\"}\n");
        assert_eq!(decoder.next_event(), Some(StreamEvent::Chunk("x".to_string())));
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn event_stream_from_bytes() {
        let stream = EventStream::from_bytes(&b"data: {\"type\":\"start\"}\n"[..]);
        let events: Vec<_> = tokio_test::block_on(stream.collect::<Vec<_>>());
        assert!(matches!(events.as_slice(), [Ok(StreamEvent::Start)]));
    }
}
