//! A chunk-boundary-safe Server-Sent Events parser.
//!
//! Consumes arbitrary byte chunks (as they arrive off a socket) and yields complete SSE frames
//! delimited by a blank line, regardless of where line and chunk boundaries fall.

/// One parsed SSE frame. `data` has all `data:` lines for the frame joined with `\n`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<u64>,
}

/// Incremental SSE frame decoder. Feed it bytes via [`SseParser::push`]; drain completed frames
/// via the returned `Vec<SseEvent>`. Call [`SseParser::finish`] after the stream ends to flush a
/// trailing frame that never received its terminating blank line.
#[derive(Default)]
pub struct SseParser {
    buf: String,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_retry: Option<u64>,
    saw_any_field: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes (assumed UTF-8; invalid sequences are replaced) and returns any
    /// complete frames found so far.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        self.drain_lines()
    }

    /// Call once the underlying stream has ended. Flushes a final frame with no terminating
    /// blank line, if one is pending.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        // Treat remaining buffered content, if any, as one last line.
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            self.consume_line(&line);
        }
        let mut out = Vec::new();
        if let Some(event) = self.take_event_if_any() {
            out.push(event);
        }
        out
    }

    fn drain_lines(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        loop {
            // Find the earliest line terminator, handling \r\n, \r, and \n.
            let Some(idx) = self.buf.find(['\n', '\r']) else { break };
            let mut end = idx;
            let mut next_start = idx + 1;
            if self.buf.as_bytes()[idx] == b'\r' && self.buf.as_bytes().get(idx + 1) == Some(&b'\n') {
                next_start = idx + 2;
            }
            let line = self.buf[..end.max(0)].to_string();
            end = next_start;
            self.buf = self.buf[end..].to_string();

            if line.is_empty() {
                if let Some(event) = self.take_event_if_any() {
                    events.push(event);
                }
            } else {
                self.consume_line(&line);
            }
        }
        events
    }

    fn consume_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return; // comment
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        self.saw_any_field = true;
        match field {
            "event" => self.current_event = Some(value.to_string()),
            "data" => self.current_data.push(value.to_string()),
            "retry" => self.current_retry = value.parse().ok(),
            _ => {}
        }
    }

    fn take_event_if_any(&mut self) -> Option<SseEvent> {
        if !self.saw_any_field {
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            retry: self.current_retry.take(),
        };
        self.current_data.clear();
        self.saw_any_field = false;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event_delimited_by_blank_line() {
        let mut p = SseParser::new();
        let events = p.push(b"event: text\ndata: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("text"));
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn joins_multiple_data_lines_with_newline() {
        let mut p = SseParser::new();
        let events = p.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn handles_split_across_chunk_boundary() {
        let mut p = SseParser::new();
        let mut events = p.push(br#"data: {"type":"text""#);
        assert!(events.is_empty());
        events = p.push(b",\"text\":\"hi\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"type":"text","text":"hi"}"#);
    }

    #[test]
    fn handles_crlf_and_cr_and_lf_line_endings() {
        let mut p = SseParser::new();
        let events = p.push(b"data: a\r\ndata: b\rdata: c\n\n");
        assert_eq!(events[0].data, "a\nb\nc");
    }

    #[test]
    fn ignores_comment_lines() {
        let mut p = SseParser::new();
        let events = p.push(b": keep-alive\ndata: hi\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn finish_flushes_trailing_event_without_blank_line() {
        let mut p = SseParser::new();
        let events = p.push(b"data: partial");
        assert!(events.is_empty());
        let flushed = p.finish();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].data, "partial");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut p = SseParser::new();
        let events = p.push(b"id: 1\ndata: hi\n\n");
        assert_eq!(events[0].data, "hi");
    }
}
