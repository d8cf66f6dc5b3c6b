//! Client-side extraction of `data:` payloads from an event stream

use super::utf8::Utf8Carry;

/// Sentinel some backends send as the last event
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental `text/event-stream` reader.
///
/// Feed raw chunks with [`push`](Self::push); each completed event yields its
/// `data` lines joined by `\n`. Lines and characters may be split anywhere
/// across chunks. Comments, `event:`/`id:`/`retry:` fields and the `[DONE]`
/// sentinel are skipped.
#[derive(Debug, Default)]
pub struct SseDataDecoder {
    carry: Utf8Carry,
    line: String,
    data: Vec<String>,
}

impl SseDataDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk, returning the payloads of events it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.carry.decode(chunk);
        self.line.push_str(&text);

        let mut events = Vec::new();
        self.drain_lines(false, &mut events);
        events
    }

    /// End of stream: dispatch whatever is left
    pub fn finish(&mut self) -> Vec<String> {
        let tail = self.carry.finish();
        self.line.push_str(&tail);

        let mut events = Vec::new();
        self.drain_lines(true, &mut events);
        let line = std::mem::take(&mut self.line);
        if !line.is_empty() {
            self.process_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    /// Process every terminated line. Lines end in `\r\n`, `\n` or a lone
    /// `\r`; a `\r` closing the buffer is held until the next byte shows
    /// whether a `\n` follows.
    fn drain_lines(&mut self, at_end: bool, events: &mut Vec<String>) {
        while let Some(pos) = self.line.find(['\r', '\n']) {
            let bytes = self.line.as_bytes();
            let width = if bytes[pos] == b'\r' {
                match bytes.get(pos + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    None if at_end => 1,
                    None => break,
                }
            } else {
                1
            };
            let line: String = self.line.drain(..pos + width).collect();
            self.process_line(&line[..pos], events);
        }
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data.push(value.to_string());
        }
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if self.data.is_empty() {
            return;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        if payload.trim() != DONE_SENTINEL {
            events.push(payload);
        }
    }
}
