//! Application state shared between the console loop and command handlers.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use sshx_pty::{DisplaySink, SessionId, SessionRegistry};

use crate::config::PanelConfig;
use crate::display::ConsoleDisplay;

pub struct AppState {
    /// All live sessions.
    pub registry: SessionRegistry,
    /// Receives every session's output and lifecycle events.
    pub display: Arc<ConsoleDisplay>,
    pub db: Arc<Mutex<Connection>>,
    /// Configuration in effect for this run.
    pub config: PanelConfig,
}

impl AppState {
    pub fn new(db: Connection, config: PanelConfig, out: Box<dyn Write + Send>) -> Self {
        let display = Arc::new(ConsoleDisplay::new(out));
        let sink: Arc<dyn DisplaySink> = display.clone();
        let registry = SessionRegistry::new(&sink, config.registry_config());
        Self {
            registry,
            display,
            db: Arc::new(Mutex::new(db)),
            config,
        }
    }

    /// The session plain input lines are typed into.
    pub fn focused(&self) -> Result<SessionId, String> {
        self.display
            .focus()
            .ok_or_else(|| "no session is open (try :new)".to_string())
    }

    pub fn lock_db(&self) -> Result<MutexGuard<'_, Connection>, String> {
        self.db.lock().map_err(|e| format!("db lock poisoned: {e}"))
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> (AppState, crate::display::tests::SharedOutput) {
    let out = crate::display::tests::SharedOutput::default();
    let conn = sshx_db::open_in_memory().unwrap();
    let config = PanelConfig::defaults(std::path::Path::new("/nonexistent/sshx-panel"));
    (AppState::new(conn, config, Box::new(out.clone())), out)
}
