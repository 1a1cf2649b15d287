//! Console display: per-session scrollback plus a live view of the focused
//! session on stdout.
//!
//! Relay threads call into this directly, so every method holds the lock only
//! for a buffer update and at most one write to the output.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sshx_pty::{DisplaySink, SessionId, SessionState};

/// Scrollback kept per session, in bytes.
pub const SCROLLBACK_LIMIT: usize = 256 * 1024;

struct SessionView {
    state: SessionState,
    scrollback: String,
}

struct DisplayState {
    views: BTreeMap<SessionId, SessionView>,
    focus: Option<SessionId>,
    out: Box<dyn Write + Send>,
}

pub struct ConsoleDisplay {
    state: Mutex<DisplayState>,
}

impl ConsoleDisplay {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(DisplayState {
                views: BTreeMap::new(),
                focus: None,
                out,
            }),
        }
    }

    pub fn focus(&self) -> Option<SessionId> {
        self.lock().focus
    }

    /// Make `id` the focused session and replay its scrollback.
    ///
    /// Returns `false` if the display has no live session `id`.
    pub fn set_focus(&self, id: SessionId) -> bool {
        let mut state = self.lock();
        if !state.views.contains_key(&id) {
            return false;
        }
        if state.focus != Some(id) {
            state.focus = Some(id);
            state.replay(id);
        }
        true
    }

    /// Print an operator-facing line, outside of any session's output.
    pub fn notice(&self, message: &str) {
        let mut state = self.lock();
        state.write_line(message);
    }

    /// Current scrollback of session `id`.
    #[cfg(test)]
    pub fn scrollback(&self, id: SessionId) -> Option<String> {
        self.lock().views.get(&id).map(|view| view.scrollback.clone())
    }

    fn lock(&self) -> MutexGuard<'_, DisplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DisplayState {
    fn replay(&mut self, id: SessionId) {
        let Self { views, out, .. } = self;
        let Some(view) = views.get(&id) else {
            return;
        };
        let result = writeln!(out, "\n--- session {id} ---")
            .and_then(|()| out.write_all(view.scrollback.as_bytes()))
            .and_then(|()| out.flush());
        if let Err(e) = result {
            log::warn!("display write failed: {e}");
        }
    }

    fn write_line(&mut self, line: &str) {
        let result = writeln!(self.out, "{line}").and_then(|()| self.out.flush());
        if let Err(e) = result {
            log::warn!("display write failed: {e}");
        }
    }

    /// Focus the most recent running session, if any.
    fn refocus(&mut self) {
        let next = self
            .views
            .iter()
            .rev()
            .find(|(_, view)| view.state == SessionState::Running)
            .map(|(id, _)| *id);
        self.focus = next;
        if let Some(id) = next {
            self.replay(id);
        }
    }
}

impl DisplaySink for ConsoleDisplay {
    fn append(&self, id: SessionId, text: &str) {
        let mut state = self.lock();
        let focused = state.focus == Some(id);
        let Some(view) = state.views.get_mut(&id) else {
            log::debug!("dropping output of unknown session {id}");
            return;
        };
        push_bounded(&mut view.scrollback, text, SCROLLBACK_LIMIT);

        if focused {
            let out = &mut state.out;
            if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
                log::warn!("display write failed: {e}");
            }
        }
    }

    fn state_changed(&self, id: SessionId, new_state: SessionState) {
        let mut state = self.lock();
        match new_state {
            SessionState::Starting => {
                state.views.insert(
                    id,
                    SessionView {
                        state: new_state,
                        scrollback: String::new(),
                    },
                );
            }
            SessionState::Running | SessionState::Closing => {
                if let Some(view) = state.views.get_mut(&id) {
                    view.state = new_state;
                }
            }
            SessionState::Terminated => {
                if state.views.remove(&id).is_none() {
                    return;
                }
                state.write_line(&format!("\n[session {id} terminated]"));
                if state.focus == Some(id) {
                    state.refocus();
                }
            }
        }
    }
}

/// Append `text`, then drop whole characters from the front until at most
/// `limit` bytes remain.
fn push_bounded(buf: &mut String, text: &str, limit: usize) {
    buf.push_str(text);
    if buf.len() <= limit {
        return;
    }
    let mut cut = buf.len() - limit;
    while !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
}
