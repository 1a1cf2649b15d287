use std::io;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::error::{CloseError, LaunchError, ResizeError, WriteError};
use crate::geometry::TermSize;
use crate::input::InputEvent;
use crate::pty::{LaunchOptions, PtyHandle};
use crate::relay::{start_relay, ExitHook, Relay};
use crate::sink::DisplaySink;

/// Unique identifier for a session.
pub type SessionId = u64;

/// Lifecycle of a session. Transitions only move forward:
/// `Starting -> Running -> Closing -> Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Starting,
    Running,
    Closing,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Closing => "closing",
            SessionState::Terminated => "terminated",
        };
        f.pad(name)
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub label: String,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub size: TermSize,
}

/// Everything needed to bring a session up.
pub(crate) struct SessionSpec<'a> {
    pub id: SessionId,
    pub label: &'a str,
    pub command: Option<&'a [String]>,
    pub options: &'a LaunchOptions,
    pub size: TermSize,
    pub sink: Weak<dyn DisplaySink>,
    pub poll_interval: Duration,
    pub on_exit: ExitHook,
}

/// One child process on a PTY, with its output relay.
///
/// The PTY handle lives behind its own mutex so input writes and resizes
/// from the control side serialize with each other, while the relay thread
/// reads from its own descriptor and never takes that lock.
pub struct Session {
    id: SessionId,
    label: String,
    pid: Option<u32>,
    state: Mutex<SessionState>,
    state_changed: Condvar,
    io: Mutex<Option<PtyHandle>>,
    size: Mutex<TermSize>,
    stop_tx: mpsc::Sender<()>,
    relay: Mutex<Option<JoinHandle<()>>>,
    sink: Weak<dyn DisplaySink>,
    #[cfg(test)]
    refuse_kill: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Spawn the child, start the relay and return the session in `Running`.
    ///
    /// The sink hears about the session only once nothing can fail any more,
    /// and the relay delivers no output before `Running` is reported.
    pub(crate) fn start(spec: SessionSpec<'_>) -> Result<Self, LaunchError> {
        let pty = PtyHandle::spawn(spec.command, spec.options, spec.size)?;
        let output = pty
            .clone_output()
            .map_err(|e| LaunchError::Setup(format!("failed to duplicate PTY master: {e}")))?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let session = Self {
            id: spec.id,
            label: spec.label.to_string(),
            pid: pty.pid(),
            state: Mutex::new(SessionState::Starting),
            state_changed: Condvar::new(),
            size: Mutex::new(pty.size()),
            io: Mutex::new(Some(pty)),
            stop_tx,
            relay: Mutex::new(None),
            sink: spec.sink.clone(),
            #[cfg(test)]
            refuse_kill: AtomicBool::new(false),
        };

        // On error, dropping `session` kills and reaps the child.
        let relay = start_relay(Relay {
            id: spec.id,
            output,
            started: started_rx,
            stop_rx,
            sink: spec.sink,
            poll_interval: spec.poll_interval,
            on_exit: spec.on_exit,
        })?;
        *lock(&session.relay) = Some(relay);

        session.notify(SessionState::Starting);
        session.set_state(SessionState::Running);
        // The relay is parked until now; it only goes away if it panicked.
        let _ = started_tx.send(());
        Ok(session)
    }

    /// Returns the session's unique identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Child process id, kept for diagnostics after the child is gone.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn size(&self) -> TermSize {
        *lock(&self.size)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            label: self.label.clone(),
            state: self.state(),
            pid: self.pid,
            size: self.size(),
        }
    }

    /// Encode `event` and write it to the PTY. Returns the bytes written.
    pub fn send(&self, event: &InputEvent) -> Result<usize, WriteError> {
        self.with_pty(|pty| pty.send(event))
    }

    /// Write raw bytes to the PTY.
    pub fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        self.with_pty(|pty| pty.write(data))
    }

    /// Apply a window size. Returns `false` when the size was already in
    /// effect and nothing was issued.
    pub fn resize(&self, size: TermSize) -> Result<bool, ResizeError> {
        if self.state() != SessionState::Running {
            return Err(ResizeError::NotRunning(self.id));
        }
        let mut io = lock(&self.io);
        let pty = io.as_mut().ok_or(ResizeError::NotRunning(self.id))?;
        let applied = pty.resize(size).map_err(|e| ResizeError::Ioctl {
            id: self.id,
            reason: e.to_string(),
        })?;
        *lock(&self.size) = pty.size();
        Ok(applied)
    }

    fn with_pty<T>(
        &self,
        f: impl FnOnce(&mut PtyHandle) -> std::io::Result<T>,
    ) -> Result<T, WriteError> {
        if self.state() != SessionState::Running {
            return Err(WriteError::NotRunning(self.id));
        }
        let mut io = lock(&self.io);
        let pty = io.as_mut().ok_or(WriteError::NotRunning(self.id))?;
        f(pty).map_err(|source| WriteError::Io {
            id: self.id,
            source,
        })
    }

    /// Claim the session for teardown. Only the first caller gets `true`.
    pub(crate) fn begin_close(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            SessionState::Starting | SessionState::Running => {
                *state = SessionState::Closing;
                drop(state);
                self.state_changed.notify_all();
                self.notify(SessionState::Closing);
                true
            }
            SessionState::Closing | SessionState::Terminated => false,
        }
    }

    /// Stop the relay, kill and reap the child, release the PTY.
    ///
    /// Must follow a successful [`begin_close`](Self::begin_close). Every
    /// step runs even if an earlier one failed; the first failure is
    /// returned. The session stays `Closing` until
    /// [`mark_terminated`](Self::mark_terminated), so the owner can drop its
    /// reference first.
    pub(crate) fn release(&self) -> Result<(), CloseError> {
        let mut first_error = None;

        // Full means a stop is already pending; closed means the relay is gone.
        let _ = self.stop_tx.try_send(());

        let pty = lock(&self.io).take();
        if let Some(mut pty) = pty {
            match self.kill_child(&mut pty) {
                Ok(()) => {
                    if let Err(source) = pty.wait() {
                        first_error.get_or_insert(CloseError::Wait {
                            id: self.id,
                            source,
                        });
                    }
                }
                Err(source) => {
                    first_error.get_or_insert(CloseError::Kill {
                        id: self.id,
                        source,
                    });
                }
            }
            // Dropping the handle closes the PTY master, and kills and reaps
            // a child that survived the kill above.
            drop(pty);
        }

        let relay = lock(&self.relay).take();
        if let Some(relay) = relay {
            // The relay itself may be the one closing the session.
            if relay.thread().id() != std::thread::current().id() && relay.join().is_err() {
                first_error.get_or_insert(CloseError::RelayPanicked(self.id));
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Publish the end of a [`release`](Self::release)d session.
    pub(crate) fn mark_terminated(&self) {
        self.set_state(SessionState::Terminated);
    }

    /// Make the kill step of [`release`](Self::release) fail.
    #[cfg(test)]
    pub(crate) fn refuse_kill(&self) {
        self.refuse_kill.store(true, Ordering::SeqCst);
    }

    fn kill_child(&self, pty: &mut PtyHandle) -> io::Result<()> {
        #[cfg(test)]
        if self.refuse_kill.load(Ordering::SeqCst) {
            return Err(io::Error::other("kill refused"));
        }
        pty.kill()
    }

    /// Block until the session is `Terminated` or `timeout` passes.
    pub(crate) fn wait_terminated(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while *state != SessionState::Terminated {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .state_changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn set_state(&self, next: SessionState) {
        *lock(&self.state) = next;
        self.state_changed.notify_all();
        self.notify(next);
    }

    fn notify(&self, state: SessionState) {
        log::debug!("session {} ({}): {state}", self.id, self.label);
        if let Some(sink) = self.sink.upgrade() {
            sink.state_changed(self.id, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::thread;

    use crate::relay::DEFAULT_POLL_INTERVAL;

    #[derive(Default)]
    struct Recorder {
        text: Mutex<String>,
        states: Mutex<Vec<SessionState>>,
    }

    impl DisplaySink for Recorder {
        fn append(&self, _id: SessionId, text: &str) {
            self.text.lock().unwrap().push_str(text);
        }

        fn state_changed(&self, _id: SessionId, state: SessionState) {
            self.states.lock().unwrap().push(state);
        }
    }

    fn start(
        id: SessionId,
        argv: &[&str],
        sink: &Arc<dyn DisplaySink>,
    ) -> (Session, std_mpsc::Receiver<SessionId>) {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let (exit_tx, exit_rx) = std_mpsc::channel();
        let session = Session::start(SessionSpec {
            id,
            label: "test",
            command: Some(&argv),
            options: &LaunchOptions::default(),
            size: TermSize::default(),
            sink: Arc::downgrade(sink),
            poll_interval: DEFAULT_POLL_INTERVAL,
            on_exit: Box::new(move |id| {
                let _ = exit_tx.send(id);
            }),
        })
        .unwrap();
        (session, exit_rx)
    }

    fn wait_for_text(recorder: &Recorder, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let text = recorder.text.lock().unwrap().clone();
            if text.contains(needle) || Instant::now() > deadline {
                return text;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_create_session() {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn DisplaySink> = recorder.clone();
        let (session, _exit) = start(1, &["/bin/sh"], &sink);

        assert_eq!(session.id(), 1);
        assert_eq!(session.label(), "test");
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.pid().is_some());
        assert_eq!(
            *recorder.states.lock().unwrap(),
            vec![SessionState::Starting, SessionState::Running]
        );
    }

    #[test]
    fn test_session_write_and_relay() {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn DisplaySink> = recorder.clone();
        let (session, _exit) = start(1, &["/bin/sh"], &sink);

        session.write(b"echo SESS_$((6*7))\n").unwrap();

        let text = wait_for_text(&recorder, "SESS_42");
        assert!(text.contains("SESS_42"), "got: {text:?}");
    }

    #[test]
    fn test_session_resize() {
        let sink: Arc<dyn DisplaySink> = Arc::new(Recorder::default());
        let (session, _exit) = start(1, &["/bin/sh"], &sink);

        assert!(session.resize(TermSize::new(40, 120)).unwrap());
        assert!(!session.resize(TermSize::new(40, 120)).unwrap());
        assert_eq!(session.size(), TermSize::new(40, 120));
        assert_eq!(session.info().size, TermSize::new(40, 120));
    }

    #[test]
    fn test_session_exit_is_reported() {
        let sink: Arc<dyn DisplaySink> = Arc::new(Recorder::default());
        let (session, exit) = start(4, &["/bin/sh"], &sink);

        session.write(b"exit 0\n").unwrap();

        assert_eq!(exit.recv_timeout(Duration::from_secs(5)), Ok(4));
    }

    #[test]
    fn test_release_transitions_and_rejects_input() {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn DisplaySink> = recorder.clone();
        let (session, _exit) = start(2, &["/bin/sh"], &sink);

        assert!(session.begin_close());
        assert!(!session.begin_close());
        session.release().unwrap();

        // Released but not yet published.
        assert_eq!(session.state(), SessionState::Closing);
        assert!(!session.wait_terminated(Duration::from_millis(10)));

        session.mark_terminated();
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(session.wait_terminated(Duration::from_millis(10)));
        assert_eq!(
            *recorder.states.lock().unwrap(),
            vec![
                SessionState::Starting,
                SessionState::Running,
                SessionState::Closing,
                SessionState::Terminated,
            ]
        );
        assert!(matches!(
            session.send(&InputEvent::Enter),
            Err(WriteError::NotRunning(2))
        ));
        assert!(matches!(
            session.resize(TermSize::new(10, 10)),
            Err(ResizeError::NotRunning(2))
        ));
    }

    #[test]
    fn test_refused_kill_is_reported_and_child_still_reaped() {
        let sink: Arc<dyn DisplaySink> = Arc::new(Recorder::default());
        let (session, _exit) = start(5, &["/bin/sh"], &sink);
        let pid = session.pid().unwrap();

        session.refuse_kill();
        assert!(session.begin_close());
        let result = session.release();

        assert!(matches!(result, Err(CloseError::Kill { id: 5, .. })));
        // SAFETY: signal 0 only probes for existence.
        assert_eq!(unsafe { libc::kill(pid as libc::pid_t, 0) }, -1);
    }

    #[test]
    fn test_no_output_before_running() {
        #[derive(Default)]
        struct Log(Mutex<Vec<String>>);

        impl DisplaySink for Log {
            fn append(&self, _id: SessionId, text: &str) {
                self.0.lock().unwrap().push(format!("text:{text}"));
            }

            fn state_changed(&self, _id: SessionId, state: SessionState) {
                self.0.lock().unwrap().push(format!("state:{state}"));
            }
        }

        let log = Arc::new(Log::default());
        let sink: Arc<dyn DisplaySink> = log.clone();
        let (_session, exit) = start(6, &["/bin/sh", "-c", "printf early"], &sink);
        assert_eq!(exit.recv_timeout(Duration::from_secs(5)), Ok(6));

        let events = log.0.lock().unwrap().clone();
        assert_eq!(events[..2], ["state:starting", "state:running"]);
        assert!(events[2..].iter().all(|e| e.starts_with("text:")), "got: {events:?}");
        let text: String = events[2..].iter().map(|e| &e["text:".len()..]).collect();
        assert_eq!(text, "early");
    }

    #[test]
    fn test_wait_terminated_times_out_while_running() {
        let sink: Arc<dyn DisplaySink> = Arc::new(Recorder::default());
        let (session, _exit) = start(3, &["/bin/sh"], &sink);
        assert!(!session.wait_terminated(Duration::from_millis(50)));
    }
}
