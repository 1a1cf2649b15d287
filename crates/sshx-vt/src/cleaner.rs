use crate::strip::{partial_escape_suffix, strip_escapes};

/// Longest unterminated escape sequence held back between reads.
pub const MAX_HELD_ESCAPE: usize = 64;

/// Streaming PTY output cleaner.
///
/// Feed it raw chunks in arrival order; every call returns the text that is
/// safe to display now. Two things are carried between calls:
///
/// - the bytes of a UTF-8 character split by the read boundary, and
/// - a trailing escape sequence that is not terminated yet.
///
/// Invalid UTF-8 is dropped, never fatal. Text returned by [`feed`] and
/// [`finish`] never contains a complete CSI sequence, and the concatenation
/// of all returned pieces does not either.
///
/// [`feed`]: OutputCleaner::feed
/// [`finish`]: OutputCleaner::finish
#[derive(Debug, Default)]
pub struct OutputCleaner {
    utf8_tail: Vec<u8>,
    held: String,
}

impl OutputCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and clean one chunk of PTY output.
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        let mut text = std::mem::take(&mut self.held);
        self.decode_into(bytes, &mut text);

        let mut cleaned = strip_escapes(&text).into_owned();
        let suffix = partial_escape_suffix(&cleaned);
        if suffix > 0 {
            let split = cleaned.len() - suffix;
            if suffix > MAX_HELD_ESCAPE {
                // Never terminated: keep the text, lose the introducer.
                cleaned.remove(split);
            } else {
                self.held = cleaned.split_off(split);
            }
        }
        cleaned
    }

    /// Flush whatever is still held back once the stream has ended.
    ///
    /// An incomplete UTF-8 sequence is discarded; an unterminated escape
    /// sequence is returned without its ESC byte.
    pub fn finish(&mut self) -> String {
        self.utf8_tail.clear();
        let mut held = std::mem::take(&mut self.held);
        if held.starts_with('\x1b') {
            held.remove(0);
        }
        held
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        !self.utf8_tail.is_empty() || !self.held.is_empty()
    }

    fn decode_into(&mut self, bytes: &[u8], out: &mut String) {
        let joined;
        let mut input: &[u8] = if self.utf8_tail.is_empty() {
            bytes
        } else {
            let mut buf = std::mem::take(&mut self.utf8_tail);
            buf.extend_from_slice(bytes);
            joined = buf;
            &joined
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(invalid) => input = &rest[invalid..],
                        None => {
                            self.utf8_tail = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strip::contains_escape;

    #[test]
    fn test_plain_chunks_pass_through() {
        let mut cleaner = OutputCleaner::new();
        assert_eq!(cleaner.feed(b"echo hi\r\n"), "echo hi\r\n");
        assert_eq!(cleaner.feed(b"hi\r\n$ "), "hi\r\n$ ");
        assert!(!cleaner.has_pending());
    }

    #[test]
    fn test_invalid_bytes_are_dropped() {
        let mut cleaner = OutputCleaner::new();
        assert_eq!(cleaner.feed(b"ok\xff\xfe!"), "ok!");
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let mut cleaner = OutputCleaner::new();
        let bytes = "näive".as_bytes();
        // 'ä' is two bytes; split between them.
        assert_eq!(cleaner.feed(&bytes[..2]), "n");
        assert!(cleaner.has_pending());
        assert_eq!(cleaner.feed(&bytes[2..]), "äive");
    }

    #[test]
    fn test_escape_split_across_reads() {
        let mut cleaner = OutputCleaner::new();
        assert_eq!(cleaner.feed(b"red:\x1b[3"), "red:");
        assert_eq!(cleaner.feed(b"1mRED\x1b[0m"), "RED");
        assert!(!cleaner.has_pending());
    }

    #[test]
    fn test_lone_escape_at_boundary() {
        let mut cleaner = OutputCleaner::new();
        assert_eq!(cleaner.feed(b"a\x1b"), "a");
        assert_eq!(cleaner.feed(b"[Kb"), "b");
    }

    #[test]
    fn test_overlong_sequence_loses_introducer() {
        let mut cleaner = OutputCleaner::new();
        let mut chunk = b"\x1b[".to_vec();
        chunk.extend(std::iter::repeat(b'1').take(MAX_HELD_ESCAPE + 8));
        let out = cleaner.feed(&chunk);
        assert!(out.starts_with("[111"));
        assert!(!out.contains('\x1b'));
        assert!(!cleaner.has_pending());
    }

    #[test]
    fn test_finish_flushes_unterminated_sequence() {
        let mut cleaner = OutputCleaner::new();
        assert_eq!(cleaner.feed(b"done\x1b[1"), "done");
        assert_eq!(cleaner.finish(), "[1");
        assert!(!cleaner.has_pending());
    }

    #[test]
    fn test_concatenated_output_has_no_escapes() {
        let stream: &[&[u8]] = &[
            b"\x1b[1;3",
            b"2m$ \x1b",
            b"[0mls\r\n\x1b[",
            b"?2004l\x1b\x1b[0m",
            b"[Adone",
        ];
        let mut cleaner = OutputCleaner::new();
        let mut all = String::new();
        for chunk in stream {
            all.push_str(&cleaner.feed(chunk));
        }
        all.push_str(&cleaner.finish());
        assert!(!contains_escape(&all), "escape leaked: {all:?}");
        assert_eq!(all, "$ ls\r\ndone");
    }
}
