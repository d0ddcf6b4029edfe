//! Server-Sent Events framing: an incremental parser for upstream streams
//! and frame encoding for the downstream response.

use bytes::Bytes;

/// Terminal frame of an OpenAI-style SSE stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";
pub const DONE_DATA: &str = "[DONE]";

/// Encode one `data:` frame.
pub fn data_frame(payload: &str) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

/// Encode the terminal `[DONE]` frame.
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME.as_bytes())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_DATA
    }
}

/// Incremental SSE parser. Feed it raw upstream bytes; it emits complete
/// events as blank-line separators arrive. Comment lines and unknown
/// fields are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            // Partial UTF-8 at a chunk boundary is rare for JSON payloads;
            // drop the undecodable chunk rather than corrupt the buffer.
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                self.flush_event(&mut events);
            } else {
                self.consume_line(line);
            }
        }
        events
    }

    /// Flush whatever remains after the upstream closes, treating the
    /// unterminated tail as a final line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            self.consume_line(tail.trim_end_matches('\r'));
        }
        let mut events = Vec::new();
        self.flush_event(&mut events);
        events
    }

    fn consume_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.pending_event = (!value.is_empty()).then(|| value.to_string());
            }
            "data" => self.pending_data.push(value.to_string()),
            _ => {}
        }
    }

    fn flush_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.pending_event.is_none() && self.pending_data.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.pending_event.take(),
            data: std::mem::take(&mut self.pending_data).join("\n"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_split_frames() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: {\"a\"").is_empty());
        let events = parser.push_str(":1}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert!(events[1].is_done());
    }

    #[test]
    fn ignores_comments_and_joins_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.push_str(": keep-alive\ndata: a\ndata: b\n\n");
        assert_eq!(events, vec![SseEvent { event: None, data: "a\nb".into() }]);
    }

    #[test]
    fn crlf_and_named_events() {
        let mut parser = SseParser::new();
        let events = parser.push_str("event: message\r\ndata: x\r\n\r\n");
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn finish_flushes_unterminated_tail() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events[0].data, "tail");
    }

    #[test]
    fn frame_encoding() {
        assert_eq!(&data_frame("{}")[..], b"data: {}\n\n");
        assert_eq!(&done_frame()[..], b"data: [DONE]\n\n");
    }
}
