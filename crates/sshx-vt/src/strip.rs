use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// ESC `[`, parameter bytes in 0x20..=0x3F, one final byte in 0x40..=0x7E.
static CSI_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[\x20-\x3f]*[\x40-\x7e]").expect("CSI pattern is valid")
});

/// Remove every CSI escape sequence from `text`.
///
/// Removing one sequence can splice its neighbours into a new one
/// (`"\x1b\x1b[0m[A"`), so stripping repeats until nothing matches. The
/// result is always a fixed point: `strip_escapes(strip_escapes(s)) ==
/// strip_escapes(s)`.
pub fn strip_escapes(text: &str) -> Cow<'_, str> {
    if !CSI_SEQUENCE.is_match(text) {
        return Cow::Borrowed(text);
    }

    let mut current = CSI_SEQUENCE.replace_all(text, "").into_owned();
    while CSI_SEQUENCE.is_match(&current) {
        current = CSI_SEQUENCE.replace_all(&current, "").into_owned();
    }
    Cow::Owned(current)
}

/// Returns `true` if `text` still contains a complete CSI escape sequence.
pub fn contains_escape(text: &str) -> bool {
    CSI_SEQUENCE.is_match(text)
}

/// Length of the trailing part of `text` that could still grow into a CSI
/// sequence once more bytes arrive (`"\x1b"`, `"\x1b["`, `"\x1b[12;"`).
pub(crate) fn partial_escape_suffix(text: &str) -> usize {
    let bytes = text.as_bytes();
    let Some(start) = bytes.iter().rposition(|&b| b == 0x1b) else {
        return 0;
    };

    let tail = &bytes[start + 1..];
    match tail.split_first() {
        None => bytes.len() - start,
        Some((b'[', params)) if params.iter().all(|b| (0x20..=0x3f).contains(b)) => {
            bytes.len() - start
        }
        _ => 0,
    }
}
