use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::error::{CloseAllError, CloseError, LaunchError, ResizeError, WriteError};
use crate::geometry::{CellMetrics, TermSize};
use crate::input::InputEvent;
use crate::pty::LaunchOptions;
use crate::relay::DEFAULT_POLL_INTERVAL;
use crate::session::{Session, SessionId, SessionInfo, SessionSpec, SessionState};
use crate::sink::DisplaySink;

/// How long `close` waits for a teardown already started by someone else.
const CONCURRENT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by every session a registry creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub launch: LaunchOptions,
    /// Geometry for new sessions until the display reports its own.
    pub initial_size: TermSize,
    /// Pixel-to-cell mapping for [`SessionRegistry::resize_pixels`].
    pub cell_metrics: CellMetrics,
    /// Upper bound on how long a relay takes to notice a close.
    pub poll_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            launch: LaunchOptions::default(),
            initial_size: TermSize::default(),
            cell_metrics: CellMetrics::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

struct Sessions {
    live: BTreeMap<SessionId, Arc<Session>>,
    next_id: SessionId,
}

struct RegistryInner {
    sessions: Mutex<Sessions>,
    sink: Weak<dyn DisplaySink>,
    config: RegistryConfig,
}

/// The set of live sessions.
///
/// The only place sessions are created and destroyed. Cloning is cheap and
/// every clone manages the same sessions. Creation and removal are serialized
/// by one lock; the lock is never held while a child is reaped or a relay is
/// joined. Iteration order is creation order.
///
/// When the last clone is dropped, every remaining session is torn down.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl SessionRegistry {
    /// Create an empty registry that reports to `sink`.
    ///
    /// Only a weak reference to the sink is kept; once the caller drops it,
    /// output is discarded.
    pub fn new(sink: &Arc<dyn DisplaySink>, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(Sessions {
                    live: BTreeMap::new(),
                    next_id: 1,
                }),
                sink: Arc::downgrade(sink),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Start a session running `command`, or the interactive shell when
    /// `None`, and return its ID.
    ///
    /// A failed launch leaves the registry untouched and consumes no ID.
    pub fn create(
        &self,
        label: &str,
        command: Option<Vec<String>>,
    ) -> Result<SessionId, LaunchError> {
        let mut sessions = self.inner.lock();
        let id = sessions.next_id;

        let registry = Arc::downgrade(&self.inner);
        let session = Session::start(SessionSpec {
            id,
            label,
            command: command.as_deref(),
            options: &self.inner.config.launch,
            size: self.inner.config.initial_size,
            sink: self.inner.sink.clone(),
            poll_interval: self.inner.config.poll_interval,
            on_exit: Box::new(move |id| {
                // The registry may already be gone; then so is the session.
                if let Some(inner) = registry.upgrade() {
                    if let Err(e) = inner.close(id, Closer::Relay) {
                        log::warn!("cleanup after exit of session {id} failed: {e}");
                    }
                }
            }),
        })
        .inspect_err(|e| log::warn!("failed to create session {label:?}: {e}"))?;

        log::info!("session {id} ({label}) started, pid {:?}", session.pid());
        sessions.next_id += 1;
        sessions.live.insert(id, Arc::new(session));
        Ok(id)
    }

    /// Encode `event` and write it to the session's PTY.
    pub fn send(&self, id: SessionId, event: &InputEvent) -> Result<(), WriteError> {
        self.session(id)
            .ok_or(WriteError::UnknownSession(id))?
            .send(event)
            .map(|_| ())
    }

    /// Send several events in order, stopping at the first failure.
    pub fn send_all(&self, id: SessionId, events: &[InputEvent]) -> Result<(), WriteError> {
        let session = self.session(id).ok_or(WriteError::UnknownSession(id))?;
        for event in events {
            session.send(event)?;
        }
        Ok(())
    }

    /// Write raw bytes to the session's PTY.
    pub fn write(&self, id: SessionId, data: &[u8]) -> Result<(), WriteError> {
        self.session(id)
            .ok_or(WriteError::UnknownSession(id))?
            .write(data)
    }

    /// Propagate a display size to the session's PTY.
    ///
    /// Repeating the current size is a no-op. Failures are logged and
    /// returned, and never affect the session itself.
    pub fn resize(&self, id: SessionId, size: TermSize) -> Result<(), ResizeError> {
        let session = self.session(id).ok_or(ResizeError::UnknownSession(id))?;
        match session.resize(TermSize::new(size.rows, size.cols)) {
            Ok(true) => {
                log::debug!("session {id} resized to {}x{}", size.cols, size.rows);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                log::warn!("{e}");
                Err(e)
            }
        }
    }

    /// Resize from a display surface measured in pixels.
    pub fn resize_pixels(
        &self,
        id: SessionId,
        width_px: u32,
        height_px: u32,
    ) -> Result<TermSize, ResizeError> {
        let size = self.inner.config.cell_metrics.cells_for(width_px, height_px);
        self.resize(id, size)?;
        Ok(size)
    }

    /// Close a session: kill its child, stop its relay, release its PTY and
    /// drop it from the registry.
    ///
    /// Unknown and already-closed sessions are a no-op. If another caller is
    /// already closing the session, this waits for that to finish.
    pub fn close(&self, id: SessionId) -> Result<(), CloseError> {
        self.inner.close(id, Closer::Caller)
    }

    /// Close every live session, continuing past failures.
    pub fn close_all(&self) -> Result<(), CloseAllError> {
        let ids: Vec<SessionId> = self.inner.lock().live.keys().copied().collect();
        let mut failures = Vec::new();
        for id in ids {
            if let Err(e) = self.close(id) {
                log::warn!("{e}");
                failures.push((id, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseAllError { failures })
        }
    }

    /// Snapshots of all sessions, in creation order.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.inner
            .lock()
            .live
            .values()
            .map(|session| session.info())
            .collect()
    }

    /// List all session IDs, in creation order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.inner.lock().live.keys().copied().collect()
    }

    pub fn info(&self, id: SessionId) -> Option<SessionInfo> {
        self.session(id).map(|session| session.info())
    }

    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.session(id).map(|session| session.state())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.lock().live.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.lock().live.get(&id).cloned()
    }
}

/// Who asked for a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closer {
    /// An API caller; waits for a concurrent teardown to finish.
    Caller,
    /// The session's own relay after end of stream; must never wait on a
    /// teardown, which may be joining this very relay.
    Relay,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self, id: SessionId, closer: Closer) -> Result<(), CloseError> {
        let Some(session) = self.lock().live.get(&id).cloned() else {
            return Ok(());
        };

        if !session.begin_close() {
            if closer == Closer::Caller
                && !session.wait_terminated(CONCURRENT_CLOSE_TIMEOUT)
            {
                log::warn!("session {id} is still closing");
            }
            return Ok(());
        }

        // The entry goes before `Terminated` is published, so a caller
        // woken by it never finds the session still registered.
        let result = session.release();
        self.lock().live.remove(&id);
        session.mark_terminated();
        match &result {
            Ok(()) => log::info!("session {id} ({}) closed", session.label()),
            Err(e) => log::warn!("session {id} ({}) closed with error: {e}", session.label()),
        }
        result
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let sessions = std::mem::take(&mut self.lock().live);
        for (id, session) in sessions {
            if session.begin_close() {
                if let Err(e) = session.release() {
                    log::warn!("teardown of session {id} failed: {e}");
                }
                session.mark_terminated();
            }
        }
    }
}
