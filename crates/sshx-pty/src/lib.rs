//! sshx-pty: PTY-backed session management for the sshx panel.
//!
//! Every session is a child process running on the slave side of its own
//! pseudo-terminal. Output from the master side is stripped of CSI escape
//! sequences and handed to a [`DisplaySink`] as plain text; input events are
//! encoded into the bytes a terminal would send.
//!
//! # Architecture
//!
//! - [`PtyHandle`]: a child process plus the master side of its PTY.
//! - [`Session`]: one `PtyHandle` with its output relay thread and lifecycle
//!   state.
//! - [`SessionRegistry`]: the set of live sessions; the only way to create
//!   or destroy one.

pub mod error;
pub mod geometry;
pub mod input;
pub mod pty;
pub mod registry;
mod relay;
pub mod session;
pub mod sink;

pub use error::{CloseAllError, CloseError, LaunchError, ResizeError, WriteError};
pub use geometry::{CellMetrics, TermSize};
pub use input::{typed_line, InputEvent};
pub use pty::{LaunchOptions, PtyHandle};
pub use registry::{RegistryConfig, SessionRegistry};
pub use relay::{ExitHook, DEFAULT_POLL_INTERVAL};
pub use session::{Session, SessionId, SessionInfo, SessionState};
pub use sink::DisplaySink;
