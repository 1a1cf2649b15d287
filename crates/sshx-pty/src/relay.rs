//! Per-session output relay that reads PTY output and hands it to the sink.
//!
//! Each session gets its own OS thread. The thread owns a duplicate of the
//! PTY master descriptor, so its reads never contend with input writes or
//! resizes on the session. Reads are preceded by a bounded `poll(2)`, which
//! lets the thread notice a stop request within one poll interval even when
//! the child produces no output.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::Duration;

use sshx_vt::OutputCleaner;
use tokio::sync::{mpsc, oneshot};

use crate::session::SessionId;
use crate::sink::DisplaySink;

/// Default wait per poll cycle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const READ_BUF_SIZE: usize = 65536;

/// Invoked once when the relay sees the child side of the PTY go away.
pub type ExitHook = Box<dyn FnOnce(SessionId) + Send>;

/// Outcome of one bounded wait on a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Data (or a hangup that `read` will report) is available.
    Readable,
    TimedOut,
    /// The descriptor is no longer valid.
    Closed,
}

/// Wait up to `timeout` for `file` to become readable.
pub(crate) fn poll_readable(file: &File, timeout: Duration) -> io::Result<Readiness> {
    let mut pollfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    // SAFETY: `pollfd` is a single valid, initialized entry that outlives the call.
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if rc == 0 {
        return Ok(Readiness::TimedOut);
    }
    if pollfd.revents & libc::POLLNVAL != 0 {
        return Ok(Readiness::Closed);
    }
    Ok(Readiness::Readable)
}

/// Everything a relay thread owns.
pub(crate) struct Relay {
    pub id: SessionId,
    pub output: File,
    /// Fires once the session has been reported as running.
    pub started: oneshot::Receiver<()>,
    pub stop_rx: mpsc::Receiver<()>,
    pub sink: Weak<dyn DisplaySink>,
    pub poll_interval: Duration,
    pub on_exit: ExitHook,
}

/// Why the relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayEnd {
    Stopped,
    EndOfStream,
}

/// Start the relay for a session on a dedicated OS thread.
pub(crate) fn start_relay(relay: Relay) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("pty-relay-{}", relay.id))
        .spawn(move || {
            let Relay {
                id,
                mut output,
                started,
                mut stop_rx,
                sink,
                poll_interval,
                on_exit,
            } = relay;

            if started.blocking_recv().is_err() {
                log::debug!("relay {id}: session abandoned before start");
                return;
            }

            match relay_loop(id, &mut output, &mut stop_rx, &sink, poll_interval) {
                RelayEnd::Stopped => log::debug!("relay {id}: stopped"),
                RelayEnd::EndOfStream => {
                    log::debug!("relay {id}: end of stream");
                    drop(output);
                    on_exit(id);
                }
            }
        })
}

fn relay_loop(
    id: SessionId,
    output: &mut File,
    stop_rx: &mut mpsc::Receiver<()>,
    sink: &Weak<dyn DisplaySink>,
    poll_interval: Duration,
) -> RelayEnd {
    let mut cleaner = OutputCleaner::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        // Check for stop signal (non-blocking).
        match stop_rx.try_recv() {
            Ok(()) => return RelayEnd::Stopped,
            Err(mpsc::error::TryRecvError::Disconnected) => return RelayEnd::Stopped,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        match poll_readable(output, poll_interval) {
            Ok(Readiness::Readable) => {}
            Ok(Readiness::TimedOut) => continue,
            Ok(Readiness::Closed) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("relay {id}: poll failed: {e}");
                break;
            }
        }

        let n = match output.read(&mut buf) {
            Ok(0) => break, // EOF
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                continue
            }
            // Linux reports EIO once the slave side is closed.
            Err(_) => break,
        };

        deliver(sink, id, &cleaner.feed(&buf[..n]));
    }

    deliver(sink, id, &cleaner.finish());
    RelayEnd::EndOfStream
}

fn deliver(sink: &Weak<dyn DisplaySink>, id: SessionId, text: &str) {
    if text.is_empty() {
        return;
    }
    // The display may already be gone; keep draining so the child never
    // blocks on a full PTY buffer.
    if let Some(sink) = sink.upgrade() {
        sink.append(id, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use crate::geometry::TermSize;
    use crate::pty::{LaunchOptions, PtyHandle};

    #[derive(Default)]
    struct Collect {
        text: Mutex<String>,
    }

    impl DisplaySink for Collect {
        fn append(&self, _id: SessionId, text: &str) {
            self.text.lock().unwrap().push_str(text);
        }
    }

    /// A start signal that has already fired.
    fn started() -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();
        rx
    }

    fn spawn(argv: &[&str]) -> PtyHandle {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        PtyHandle::spawn(Some(&argv), &LaunchOptions::default(), TermSize::default()).unwrap()
    }

    #[test]
    fn test_poll_times_out_without_output() {
        let handle = spawn(&["/bin/sh", "-c", "sleep 5"]);
        let output = handle.clone_output().unwrap();
        let started = Instant::now();
        let readiness = poll_readable(&output, Duration::from_millis(50)).unwrap();
        assert_eq!(readiness, Readiness::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_relay_delivers_clean_text_and_reports_exit() {
        let mut handle = spawn(&["/bin/sh", "-c", "printf '\\033[1;32mgreen\\033[0m plain\\n'"]);
        let collect = Arc::new(Collect::default());
        let sink: Arc<dyn DisplaySink> = collect.clone();
        let (_stop_tx, stop_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = std::sync::mpsc::channel();

        let thread = start_relay(Relay {
            id: 9,
            output: handle.clone_output().unwrap(),
            started: started(),
            stop_rx,
            sink: Arc::downgrade(&sink),
            poll_interval: DEFAULT_POLL_INTERVAL,
            on_exit: Box::new(move |id| {
                let _ = exit_tx.send(id);
            }),
        })
        .unwrap();

        let exited = exit_rx.recv_timeout(Duration::from_secs(5));
        assert_eq!(exited, Ok(9));
        thread.join().unwrap();
        handle.wait().unwrap();

        let text = collect.text.lock().unwrap().clone();
        assert!(text.contains("green plain"), "got: {text:?}");
        assert!(!text.contains('\x1b'), "escape leaked: {text:?}");
    }

    #[test]
    fn test_relay_stops_within_poll_interval() {
        let handle = spawn(&["/bin/sh", "-c", "sleep 30"]);
        let sink: Arc<dyn DisplaySink> = Arc::new(Collect::default());
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = std::sync::mpsc::channel::<SessionId>();

        let thread = start_relay(Relay {
            id: 1,
            output: handle.clone_output().unwrap(),
            started: started(),
            stop_rx,
            sink: Arc::downgrade(&sink),
            poll_interval: Duration::from_millis(50),
            on_exit: Box::new(move |id| {
                let _ = exit_tx.send(id);
            }),
        })
        .unwrap();

        let started = Instant::now();
        stop_tx.try_send(()).unwrap();
        thread.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        // A stop request is not an end of stream.
        assert!(exit_rx.try_recv().is_err());
        drop(handle);
    }

    #[test]
    fn test_relay_waits_for_start_signal() {
        let handle = spawn(&["/bin/sh", "-c", "echo too-soon"]);
        let collect = Arc::new(Collect::default());
        let sink: Arc<dyn DisplaySink> = collect.clone();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (_stop_tx, stop_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = std::sync::mpsc::channel::<SessionId>();

        let thread = start_relay(Relay {
            id: 3,
            output: handle.clone_output().unwrap(),
            started: started_rx,
            stop_rx,
            sink: Arc::downgrade(&sink),
            poll_interval: DEFAULT_POLL_INTERVAL,
            on_exit: Box::new(move |id| {
                let _ = exit_tx.send(id);
            }),
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        assert!(collect.text.lock().unwrap().is_empty());

        // Dropping the sender abandons the session: no output, no exit hook.
        drop(started_tx);
        thread.join().unwrap();
        assert!(collect.text.lock().unwrap().is_empty());
        assert!(exit_rx.try_recv().is_err());
        drop(handle);
    }

    #[test]
    fn test_relay_keeps_draining_without_sink() {
        let handle = spawn(&["/bin/sh", "-c", "echo orphaned"]);
        let sink: Arc<dyn DisplaySink> = Arc::new(Collect::default());
        let weak = Arc::downgrade(&sink);
        drop(sink);
        let (_stop_tx, stop_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = std::sync::mpsc::channel();

        let thread = start_relay(Relay {
            id: 2,
            output: handle.clone_output().unwrap(),
            started: started(),
            stop_rx,
            sink: weak,
            poll_interval: DEFAULT_POLL_INTERVAL,
            on_exit: Box::new(move |id| {
                let _ = exit_tx.send(id);
            }),
        })
        .unwrap();

        assert_eq!(exit_rx.recv_timeout(Duration::from_secs(5)), Ok(2));
        thread.join().unwrap();
        drop(handle);
    }
}
