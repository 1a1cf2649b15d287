//! sshx-vt: output normalization for sshx-panel sessions.
//!
//! Shell output arrives as raw bytes in arbitrary chunks. This crate turns
//! those chunks into plain text: bytes are decoded as lossy UTF-8 and CSI
//! escape sequences are stripped. No terminal emulation happens here; cursor
//! movement, colors and screen modes are dropped rather than interpreted.
//!
//! - [`strip_escapes`]: one-shot stripping of a complete string.
//! - [`OutputCleaner`]: streaming decoder that keeps multi-byte characters and
//!   escape sequences intact across read boundaries.

pub mod cleaner;
pub mod strip;

pub use cleaner::OutputCleaner;
pub use strip::{contains_escape, strip_escapes};
