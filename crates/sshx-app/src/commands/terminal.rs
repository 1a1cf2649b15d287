//! Console commands for terminal session management.
//!
//! Spawning and closing block on the OS (fork/exec, killing and reaping the
//! child, joining the relay), so they run on the blocking pool.

use sshx_pty::{typed_line, InputEvent, SessionId, SessionInfo, TermSize};

use crate::state::AppState;

/// Create a new session and focus it.
///
/// `command` of `None` starts the interactive shell.
pub async fn create_terminal(
    state: &AppState,
    label: String,
    command: Option<Vec<String>>,
) -> Result<SessionId, String> {
    let registry = state.registry.clone();
    let id = tokio::task::spawn_blocking(move || registry.create(&label, command))
        .await
        .map_err(|e| format!("task join error: {e}"))?
        .map_err(|e| format!("Failed to create terminal session: {e}"))?;

    // A command that already finished has nothing left to focus.
    state.display.set_focus(id);
    Ok(id)
}

/// Open a shell labelled `target` and start `sshx <target>` in it.
pub async fn connect(state: &AppState, target: &str) -> Result<SessionId, String> {
    let target = target.trim();
    if target.is_empty() {
        return Err("usage: :connect <user@host:port>".to_string());
    }
    let id = create_terminal(state, target.to_string(), None).await?;
    send_events(state, id, &typed_line(&format!("sshx {target}")))?;
    Ok(id)
}

/// Type `line` into the focused session, followed by Enter.
pub fn write_line(state: &AppState, line: &str) -> Result<(), String> {
    let id = state.focused()?;
    send_events(state, id, &typed_line(line))
}

/// Send one key or paste to the focused session.
pub fn send_key(state: &AppState, event: InputEvent) -> Result<(), String> {
    let id = state.focused()?;
    send_events(state, id, std::slice::from_ref(&event))
}

fn send_events(state: &AppState, id: SessionId, events: &[InputEvent]) -> Result<(), String> {
    state
        .registry
        .send_all(id, events)
        .map_err(|e| format!("Write error: {e}"))
}

/// Resize the focused session's PTY.
pub fn resize_terminal(state: &AppState, rows: u16, cols: u16) -> Result<TermSize, String> {
    let id = state.focused()?;
    let size = TermSize::new(rows, cols);
    state
        .registry
        .resize(id, size)
        .map_err(|e| format!("Resize error: {e}"))?;
    Ok(size)
}

/// Resize the focused session from a display size in pixels.
pub fn resize_pixels(state: &AppState, width_px: u32, height_px: u32) -> Result<TermSize, String> {
    let id = state.focused()?;
    state
        .registry
        .resize_pixels(id, width_px, height_px)
        .map_err(|e| format!("Resize error: {e}"))
}

/// Close a session, the focused one when `id` is `None`.
pub async fn close_terminal(state: &AppState, id: Option<SessionId>) -> Result<SessionId, String> {
    let id = match id {
        Some(id) => id,
        None => state.focused()?,
    };
    if !state.registry.contains(id) {
        return Err(format!("Session {id} not found"));
    }

    let registry = state.registry.clone();
    tokio::task::spawn_blocking(move || registry.close(id))
        .await
        .map_err(|e| format!("task join error: {e}"))?
        .map_err(|e| format!("Close error: {e}"))?;
    Ok(id)
}

/// Close every session.
pub async fn close_all(state: &AppState) -> Result<(), String> {
    let registry = state.registry.clone();
    tokio::task::spawn_blocking(move || registry.close_all())
        .await
        .map_err(|e| format!("task join error: {e}"))?
        .map_err(|e| e.to_string())
}

pub fn list_terminals(state: &AppState) -> Vec<SessionInfo> {
    state.registry.list()
}
