//! Keystroke to byte-sequence translation.
//!
//! Input arrives as discrete events from the display side. Each event maps to
//! the exact bytes a shell line editor expects on its standard input.

use std::borrow::Cow;
use std::io::Write;

/// Line feed, sent for Enter.
pub const ENTER: &[u8] = b"\n";
/// DEL, what line editors treat as "erase previous character".
pub const BACKSPACE: &[u8] = b"\x7f";
/// VT "delete character" key sequence.
pub const DELETE: &[u8] = b"\x1b[3~";
/// ETX, turned into SIGINT by the PTY line discipline.
pub const INTERRUPT: &[u8] = b"\x03";

const NOTHING: &[u8] = &[];

/// A single input event delivered to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// One typed character. Control characters are ignored; use the named
    /// variants for those.
    Char(char),
    Enter,
    Backspace,
    /// Forward delete.
    Delete,
    /// Ctrl-C.
    Interrupt,
    /// Clipboard contents, written as one unbroken sequence.
    Paste(String),
}

impl InputEvent {
    /// The bytes this event puts on the PTY. Empty for ignored events.
    pub fn to_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            InputEvent::Char(c) if c.is_control() => Cow::Borrowed(NOTHING),
            InputEvent::Char(c) => {
                let mut buf = [0u8; 4];
                Cow::Owned(c.encode_utf8(&mut buf).as_bytes().to_vec())
            }
            InputEvent::Paste(text) => Cow::Borrowed(text.as_bytes()),
            InputEvent::Enter => Cow::Borrowed(ENTER),
            InputEvent::Backspace => Cow::Borrowed(BACKSPACE),
            InputEvent::Delete => Cow::Borrowed(DELETE),
            InputEvent::Interrupt => Cow::Borrowed(INTERRUPT),
        }
    }

    /// Write the event to `writer` in a single `write_all` and flush.
    ///
    /// Returns the number of bytes written (zero for ignored events, which
    /// touch nothing).
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> std::io::Result<usize> {
        let bytes = self.to_bytes();
        if bytes.is_empty() {
            return Ok(0);
        }
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(bytes.len())
    }

    /// Parse a named key as typed by an operator (`enter`, `ctrl-c`, ...).
    pub fn from_key_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "enter" | "return" => Some(InputEvent::Enter),
            "backspace" | "bs" => Some(InputEvent::Backspace),
            "delete" | "del" => Some(InputEvent::Delete),
            "ctrl-c" | "interrupt" | "^c" => Some(InputEvent::Interrupt),
            _ => None,
        }
    }
}

/// Events for typing `line` character by character, then Enter.
pub fn typed_line(line: &str) -> Vec<InputEvent> {
    line.chars()
        .map(InputEvent::Char)
        .chain(std::iter::once(InputEvent::Enter))
        .collect()
}
