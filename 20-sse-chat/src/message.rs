use std::{borrow::Cow, fmt, sync::Arc};

use axum::response::sse::Event;

/// Opaque chat payload.
///
/// The text is reference counted so fanning one message out to many
/// subscribers clones a pointer, not the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message(Arc<str>);

impl Message {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl AsRef<str> for Message {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the `data:` event for one message.
///
/// SSE fields cannot carry carriage returns, so CR and CRLF are folded into
/// LF first; axum then emits one `data:` line per LF-separated line and the
/// client joins them back together.
pub fn to_event(message: &Message) -> Event {
    Event::default().data(normalize_line_breaks(message.as_str()))
}

fn normalize_line_breaks(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Incremental `text/event-stream` parser used by the terminal client and tests.
///
/// Feed it raw body chunks as they arrive; it returns every message whose
/// terminating blank line has been seen. Chunk boundaries may fall anywhere,
/// including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Message> {
        self.pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let decoded = String::from_utf8_lossy(&raw[..newline]);
            let line = decoded.strip_suffix('\r').unwrap_or(&*decoded);
            if let Some(message) = self.process_line(line) {
                messages.push(message);
            }
        }
        messages
    }

    fn process_line(&mut self, line: &str) -> Option<Message> {
        if line.is_empty() {
            return self.data.take().map(Message::from);
        }

        // Lines starting with a colon are comments (keep-alive pings).
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_event() {
        let mut decoder = SseDecoder::new();
        let messages = decoder.push(b"data: hello\n\n");
        assert_eq!(messages, vec![Message::from("hello")]);
    }

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: hel").is_empty());
        assert!(decoder.push(b"lo\n").is_empty());
        let messages = decoder.push(b"\ndata: world\n\ndata: par");
        assert_eq!(messages, vec![Message::from("hello"), Message::from("world")]);
        assert_eq!(decoder.push(b"tial\n\n"), vec![Message::from("partial")]);
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let messages = decoder.push(b":\n\ndata: first\ndata: second\r\n\r\n");
        assert_eq!(messages, vec![Message::from("first\nsecond")]);
    }

    #[test]
    fn empty_data_field_is_still_an_event() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b"data: \n\n"), vec![Message::from("")]);
        assert_eq!(decoder.push(b"data:\n\n"), vec![Message::from("")]);
    }

    #[test]
    fn keeps_utf8_split_between_chunks() {
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|byte| *byte == 0xC3).expect("two-byte char") + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec![Message::from("héllo")]);
    }

    #[test]
    fn carriage_returns_become_line_feeds() {
        assert_eq!(normalize_line_breaks("a\r\nb\rc"), "a\nb\nc");
        assert!(matches!(normalize_line_breaks("plain"), Cow::Borrowed(_)));
    }
}
