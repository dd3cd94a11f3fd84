//! Stream readers: turn the engine's stdout and stderr into display events.
//!
//! stdout carries a stream of self-delimiting JSON values, each re-rendered as
//! one pretty-printed `output` event. stderr is split into lines, one `error`
//! event per line.

use crate::error::StreamError;
use crate::model::DisplayEvent;
use crate::queue::EventSender;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, warn};

const READ_CHUNK_SIZE: usize = 8192;

/// How a reader's loop ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// The engine closed the stream.
    Eof,
    /// The stream failed after we asked the process to die.
    ClosedByUs,
    /// Nobody is taking events any more.
    ConsumerGone,
    Fault(StreamError),
}

impl StreamEnd {
    pub fn is_normal(&self) -> bool {
        !matches!(self, StreamEnd::Fault(_))
    }

    pub(crate) fn log(&self, run: u64, stream: &'static str) {
        if self.is_normal() {
            debug!(run, stream, end = ?self, "stream reader finished");
        } else {
            warn!(run, stream, end = ?self, "stream reader stopped");
        }
    }
}

/// An error seen after a kill was requested is the pipe going away under us,
/// not a fault.
fn classify(err: StreamError, cancelled: &AtomicBool) -> StreamEnd {
    if cancelled.load(Ordering::Acquire) {
        debug!(error = %err, "stream closed after kill");
        StreamEnd::ClosedByUs
    } else {
        StreamEnd::Fault(err)
    }
}

/// Where the scanner is relative to the value at the front of the buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Scan {
    #[default]
    Between,
    Nested {
        depth: usize,
        in_string: bool,
        escaped: bool,
    },
    Text {
        escaped: bool,
    },
    /// Numbers have no terminator of their own; the next delimiter ends them.
    Number,
    Literal {
        remaining: usize,
    },
}

enum Step {
    More(Scan),
    /// The value ends with this byte.
    EndAfter,
    /// The value ended just before this byte.
    EndBefore,
}

impl Scan {
    fn step(self, b: u8) -> Step {
        match self {
            Scan::Between => match b {
                b' ' | b'\t' | b'\n' | b'\r' => Step::More(Scan::Between),
                b'{' | b'[' => Step::More(Scan::Nested {
                    depth: 1,
                    in_string: false,
                    escaped: false,
                }),
                b'"' => Step::More(Scan::Text { escaped: false }),
                b'-' | b'0'..=b'9' => Step::More(Scan::Number),
                b't' | b'n' => Step::More(Scan::Literal { remaining: 3 }),
                b'f' => Step::More(Scan::Literal { remaining: 4 }),
                // Not the start of any value; hand it to the parser to report.
                _ => Step::EndAfter,
            },
            Scan::Nested {
                depth,
                in_string: true,
                escaped,
            } => {
                let (in_string, escaped) = match (escaped, b) {
                    (true, _) => (true, false),
                    (false, b'\\') => (true, true),
                    (false, b'"') => (false, false),
                    _ => (true, false),
                };
                Step::More(Scan::Nested {
                    depth,
                    in_string,
                    escaped,
                })
            }
            Scan::Nested { depth, .. } => match b {
                b'"' => Step::More(Scan::Nested {
                    depth,
                    in_string: true,
                    escaped: false,
                }),
                b'{' | b'[' => Step::More(Scan::Nested {
                    depth: depth + 1,
                    in_string: false,
                    escaped: false,
                }),
                b'}' | b']' if depth == 1 => Step::EndAfter,
                b'}' | b']' => Step::More(Scan::Nested {
                    depth: depth - 1,
                    in_string: false,
                    escaped: false,
                }),
                _ => Step::More(self),
            },
            Scan::Text { escaped: true } => Step::More(Scan::Text { escaped: false }),
            Scan::Text { escaped: false } => match b {
                b'\\' => Step::More(Scan::Text { escaped: true }),
                b'"' => Step::EndAfter,
                _ => Step::More(self),
            },
            Scan::Number => match b {
                b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E' => Step::More(Scan::Number),
                _ => Step::EndBefore,
            },
            Scan::Literal { remaining: 1 } => Step::EndAfter,
            Scan::Literal { remaining } => Step::More(Scan::Literal {
                remaining: remaining - 1,
            }),
        }
    }
}

/// Incremental decoder for a stream of concatenated JSON values.
///
/// Each appended byte is scanned once to find where the front value ends, and
/// only a complete value is handed to `serde_json`.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buf: Vec<u8>,
    scanned: usize,
    scan: Scan,
}

impl RecordDecoder {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn find_end(&mut self) -> Option<usize> {
        while let Some(&b) = self.buf.get(self.scanned) {
            match self.scan.step(b) {
                Step::More(next) => {
                    self.scan = next;
                    self.scanned += 1;
                }
                Step::EndAfter => return Some(self.scanned + 1),
                Step::EndBefore => return Some(self.scanned),
            }
        }
        None
    }

    /// Pop the next complete value, or `None` if more bytes are needed.
    ///
    /// `at_eof` means no more bytes will arrive, so a pending partial value
    /// becomes an error and a trailing number is taken as complete.
    pub fn next_record(&mut self, at_eof: bool) -> Result<Option<Value>, StreamError> {
        let end = match self.find_end() {
            Some(end) => end,
            None if self.scan == Scan::Between => {
                // Only whitespace so far.
                self.buf.clear();
                self.scanned = 0;
                return Ok(None);
            }
            None if !at_eof => return Ok(None),
            // `12` may be the front of `123` until the stream ends.
            None if self.scan == Scan::Number => self.buf.len(),
            None => {
                return Err(StreamError::Truncated {
                    pending: self.buf.len(),
                })
            }
        };
        let record = serde_json::from_slice::<Value>(&self.buf[..end]);
        self.buf.drain(..end);
        self.scanned = 0;
        self.scan = Scan::Between;
        Ok(Some(record?))
    }
}

/// Render a record with tab indentation.
pub fn pretty(value: &Value) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Read JSON records until the stream ends, pushing one `output` event per record.
pub async fn read_records<R>(mut src: R, events: &EventSender, cancelled: &AtomicBool) -> StreamEnd
where
    R: AsyncRead + Unpin,
{
    let mut decoder = RecordDecoder::default();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut at_eof = false;
    loop {
        loop {
            match decoder.next_record(at_eof) {
                Ok(Some(value)) => {
                    let text = match pretty(&value) {
                        Ok(t) => t,
                        Err(e) => return StreamEnd::Fault(StreamError::Decode(e)),
                    };
                    if events.push(DisplayEvent::output(text)).await.is_err() {
                        return StreamEnd::ConsumerGone;
                    }
                }
                Ok(None) => break,
                Err(e) => return classify(e, cancelled),
            }
        }
        if at_eof {
            return StreamEnd::Eof;
        }
        match src.read(&mut chunk).await {
            Ok(0) => at_eof = true,
            Ok(n) => decoder.extend(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return classify(StreamError::Read(e), cancelled),
        }
    }
}

/// Read newline-delimited text until the stream ends, pushing one `error` event per line.
pub async fn read_lines<R>(src: R, events: &EventSender, cancelled: &AtomicBool) -> StreamEnd
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(src);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => return StreamEnd::Eof,
            Ok(_) => {
                let text = String::from_utf8_lossy(trim_newline(&line)).into_owned();
                if events.push(DisplayEvent::error(text)).await.is_err() {
                    return StreamEnd::ConsumerGone;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return classify(StreamError::Read(e), cancelled),
        }
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, DisplayEvent};
    use crate::queue::{event_queue, EventReceiver};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    async fn collect(rx: &mut EventReceiver) -> Vec<DisplayEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn concatenated_records_become_two_output_events() {
        let (tx, mut rx) = event_queue();
        let cancelled = AtomicBool::new(false);
        let reader = tokio::spawn(async move {
            read_records(&b"{\"a\":1}{\"b\":2}"[..], &tx, &cancelled).await
        });
        let events = collect(&mut rx).await;
        assert!(matches!(reader.await.unwrap(), StreamEnd::Eof));

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.channel == Channel::Output));
        assert_eq!(events[0].payload, "{\n\t\"a\": 1\n}");
        assert_eq!(events[1].payload, "{\n\t\"b\": 2\n}");
        let first: Value = serde_json::from_str(&events[0].payload).unwrap();
        assert_eq!(first, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn diagnostic_lines_become_error_events() {
        let (tx, mut rx) = event_queue();
        let cancelled = AtomicBool::new(false);
        let reader =
            tokio::spawn(async move { read_lines(&b"line1\nline2\n"[..], &tx, &cancelled).await });
        let events = collect(&mut rx).await;
        assert!(matches!(reader.await.unwrap(), StreamEnd::Eof));
        assert_eq!(
            events,
            vec![DisplayEvent::error("line1"), DisplayEvent::error("line2")]
        );
    }

    #[tokio::test]
    async fn last_line_without_newline_and_crlf_are_handled() {
        let (tx, mut rx) = event_queue();
        let cancelled = AtomicBool::new(false);
        tokio::spawn(async move { read_lines(&b"a\r\nb"[..], &tx, &cancelled).await });
        let events = collect(&mut rx).await;
        assert_eq!(events, vec![DisplayEvent::error("a"), DisplayEvent::error("b")]);
    }

    #[tokio::test]
    async fn malformed_record_stops_reader_with_fault() {
        let (tx, mut rx) = event_queue();
        let cancelled = AtomicBool::new(false);
        let reader = tokio::spawn(async move {
            read_records(&b"{\"ok\":true} {nope}"[..], &tx, &cancelled).await
        });
        let events = collect(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            reader.await.unwrap(),
            StreamEnd::Fault(StreamError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn truncated_record_is_a_fault_unless_killed() {
        let (tx, _rx) = event_queue();
        let live = AtomicBool::new(false);
        let end = read_records(&b"{\"a\":"[..], &tx, &live).await;
        assert!(matches!(end, StreamEnd::Fault(StreamError::Truncated { .. })));

        let killed = AtomicBool::new(true);
        let end = read_records(&b"{\"a\":"[..], &tx, &killed).await;
        assert!(matches!(end, StreamEnd::ClosedByUs));
    }

    struct FailingRead;

    impl AsyncRead for FailingRead {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")))
        }
    }

    #[tokio::test]
    async fn read_error_after_kill_is_normal_end() {
        let (tx, _rx) = event_queue();
        let killed = AtomicBool::new(true);
        assert!(matches!(
            read_lines(FailingRead, &tx, &killed).await,
            StreamEnd::ClosedByUs
        ));
        assert!(read_records(FailingRead, &tx, &killed).await.is_normal());

        let live = AtomicBool::new(false);
        assert!(matches!(
            read_lines(FailingRead, &tx, &live).await,
            StreamEnd::Fault(StreamError::Read(_))
        ));
    }

    #[tokio::test]
    async fn reader_stops_when_consumer_is_gone() {
        let (tx, rx) = event_queue();
        drop(rx);
        let cancelled = AtomicBool::new(false);
        assert!(matches!(
            read_lines(&b"x\n"[..], &tx, &cancelled).await,
            StreamEnd::ConsumerGone
        ));
    }

    #[test]
    fn decoder_waits_for_split_records() {
        let mut d = RecordDecoder::default();
        d.extend(b"{\"a\":[1,");
        assert!(d.next_record(false).unwrap().is_none());
        d.extend(b"2]}\n[true]");
        assert_eq!(
            d.next_record(false).unwrap(),
            Some(serde_json::json!({"a": [1, 2]}))
        );
        assert_eq!(d.next_record(false).unwrap(), Some(serde_json::json!([true])));
        assert!(d.next_record(false).unwrap().is_none());
        assert!(d.next_record(true).unwrap().is_none());
    }

    #[test]
    fn decoder_holds_trailing_number_until_eof() {
        let mut d = RecordDecoder::default();
        d.extend(b"12");
        assert!(d.next_record(false).unwrap().is_none());
        d.extend(b"3");
        assert!(d.next_record(false).unwrap().is_none());
        assert_eq!(d.next_record(true).unwrap(), Some(serde_json::json!(123)));
    }

    #[test]
    fn decoder_tracks_strings_and_escapes() {
        let mut d = RecordDecoder::default();
        d.extend(br#"{"a":"}]\"{"}"x\"y" true"#);
        assert_eq!(
            d.next_record(false).unwrap(),
            Some(serde_json::json!({"a": "}]\"{"}))
        );
        assert_eq!(d.next_record(false).unwrap(), Some(serde_json::json!("x\"y")));
        assert_eq!(d.next_record(false).unwrap(), Some(serde_json::json!(true)));
        assert!(d.next_record(true).unwrap().is_none());
    }

    #[test]
    fn large_record_is_scanned_once() {
        let mut record = String::from("[");
        for i in 0..200_000 {
            if i > 0 {
                record.push(',');
            }
            record.push_str(&format!("{{\"k\":\"v{i}\"}}"));
        }
        record.push(']');
        assert!(record.len() > 2_000_000);

        let started = std::time::Instant::now();
        let mut d = RecordDecoder::default();
        let mut got = None;
        for chunk in record.as_bytes().chunks(READ_CHUNK_SIZE) {
            d.extend(chunk);
            if let Some(v) = d.next_record(false).unwrap() {
                got = Some(v);
            } else {
                // Nothing before the new bytes is looked at again.
                assert_eq!(d.scanned, d.buf.len());
            }
        }
        let got = got.expect("record decoded");
        assert_eq!(got.as_array().map(Vec::len), Some(200_000));
        assert!(
            started.elapsed() < std::time::Duration::from_secs(10),
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn pretty_sorts_keys_and_indents_with_tabs() {
        let v = serde_json::json!({"z": 1, "a": {"b": null}});
        assert_eq!(
            pretty(&v).unwrap(),
            "{\n\t\"a\": {\n\t\t\"b\": null\n\t},\n\t\"z\": 1\n}"
        );
    }
}
