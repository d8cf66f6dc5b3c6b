//! Incremental UTF-8 decoding with a boundary carry

use std::char::REPLACEMENT_CHARACTER;

/// Streaming UTF-8 decoder.
///
/// Holds back an incomplete trailing sequence until the next chunk completes
/// it. Invalid bytes decode to U+FFFD. [`finish`](Self::finish) flushes
/// whatever is still carried.
#[derive(Debug, Clone, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, returning only complete characters
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;

        loop {
            let rest = &self.pending[start..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT_CHARACTER);
                            start += valid_up_to + len;
                        }
                        // Incomplete tail: carry it
                        None => {
                            start += valid_up_to;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// End of input: decode the carry, lossily
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_two_byte_char() {
        let bytes = "café".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 1);
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.decode(head), "caf");
        assert!(carry.has_pending());
        assert_eq!(carry.decode(tail), "é");
        assert_eq!(carry.finish(), "");
    }

    #[test]
    fn test_four_byte_char_split_every_byte() {
        let mut carry = Utf8Carry::new();
        let mut out = String::new();
        for byte in "a👋b".as_bytes() {
            out.push_str(&carry.decode(std::slice::from_ref(byte)));
        }
        out.push_str(&carry.finish());
        assert_eq!(out, "a👋b");
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_tail_flushed_lossily() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.decode(&"é".as_bytes()[..1]), "");
        assert_eq!(carry.finish(), "\u{FFFD}");
        assert!(!carry.has_pending());
    }
}
