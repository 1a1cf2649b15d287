use thiserror::Error;

use crate::session::SessionId;

/// Failure to bring up a session: no PTY, or the child could not be started.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to open PTY: {0}")]
    OpenPty(String),
    #[error("empty command line")]
    EmptyCommand,
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("PTY setup failed: {0}")]
    Setup(String),
    #[error("failed to start output relay: {0}")]
    Relay(#[from] std::io::Error),
}

/// Failure to deliver input to a session's PTY.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("session {0} not found")]
    UnknownSession(SessionId),
    #[error("session {0} is not running")]
    NotRunning(SessionId),
    #[error("write to session {id} failed: {source}")]
    Io {
        id: SessionId,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to apply a window size. Never fatal for the session.
#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("session {0} not found")]
    UnknownSession(SessionId),
    #[error("session {0} is not running")]
    NotRunning(SessionId),
    #[error("resize of session {id} failed: {reason}")]
    Ioctl { id: SessionId, reason: String },
}

/// A step of session teardown that did not go cleanly. The session is
/// removed from the registry regardless.
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("failed to kill child of session {id}: {source}")]
    Kill {
        id: SessionId,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to reap child of session {id}: {source}")]
    Wait {
        id: SessionId,
        #[source]
        source: std::io::Error,
    },
    #[error("output relay of session {0} panicked")]
    RelayPanicked(SessionId),
}

/// Every failure collected by `close_all`.
#[derive(Debug, Error)]
#[error("{} session(s) did not close cleanly", failures.len())]
pub struct CloseAllError {
    pub failures: Vec<(SessionId, CloseError)>,
}
