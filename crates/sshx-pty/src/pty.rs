use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::BorrowedFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty};

use crate::error::LaunchError;
use crate::geometry::TermSize;
use crate::input::InputEvent;

/// Terminal type advertised to children.
pub const DEFAULT_TERM: &str = "xterm";
/// Prompt for the built-in interactive shell.
pub const DEFAULT_PROMPT: &str = "$ ";

/// How children are started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Value of `TERM` in the child environment.
    pub term: String,
    /// `PS1` for the interactive shell.
    pub prompt: String,
    /// Shell command line used when no command is given. `None` picks
    /// `bash --norc --noprofile`, or `/bin/sh` when bash is not installed.
    pub shell: Option<String>,
    /// Child working directory. Defaults to ours.
    pub working_dir: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            term: DEFAULT_TERM.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            shell: None,
            working_dir: None,
        }
    }
}

/// Owns a child process and the master side of its PTY.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
    size: TermSize,
    reaped: bool,
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("pid", &self.pid)
            .field("size", &self.size)
            .field("reaped", &self.reaped)
            .finish_non_exhaustive()
    }
}

impl PtyHandle {
    /// Spawn `command` (or the interactive shell when `None`) on a fresh PTY.
    ///
    /// On error nothing is left behind: the PTY pair is closed and a child
    /// that did start is killed and reaped.
    pub fn spawn(
        command: Option<&[String]>,
        options: &LaunchOptions,
        size: TermSize,
    ) -> Result<Self, LaunchError> {
        let cmd = build_command(command, options)?;
        let program = cmd
            .get_argv()
            .first()
            .map(|arg| arg.to_string_lossy().into_owned())
            .unwrap_or_default();

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size.to_pty_size())
            .map_err(|e| LaunchError::OpenPty(format!("{e}")))?;

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| LaunchError::Spawn {
                program: program.clone(),
                reason: format!("{e}"),
            })?;
        // Only the child keeps the slave open, so its exit reads as EOF here.
        drop(pair.slave);

        let writer = match pair.master.take_writer() {
            Ok(writer) => writer,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LaunchError::Setup(format!("failed to take writer: {e}")));
            }
        };

        let pid = child.process_id();
        log::debug!("spawned {program} (pid {pid:?}) on a {}x{} PTY", size.cols, size.rows);

        Ok(Self {
            master: pair.master,
            writer,
            child,
            pid,
            size,
            reaped: false,
        })
    }

    /// OS process id of the child, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Last size applied to the PTY.
    pub fn size(&self) -> TermSize {
        self.size
    }

    /// Write raw bytes to the PTY master (input -> child).
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    /// Encode and write one input event. Returns the bytes written.
    pub fn send(&mut self, event: &InputEvent) -> io::Result<usize> {
        event.write_to(&mut self.writer)
    }

    /// Set the PTY window size.
    ///
    /// Returns `Ok(false)` without touching the PTY when `size` is already
    /// in effect.
    pub fn resize(&mut self, size: TermSize) -> io::Result<bool> {
        if size == self.size {
            return Ok(false);
        }
        self.master
            .resize(size.to_pty_size())
            .map_err(|e| io::Error::other(format!("{e}")))?;
        self.size = size;
        Ok(true)
    }

    /// A second descriptor for the PTY master, for the output relay.
    ///
    /// The duplicate stays valid after this handle is dropped; reads on it
    /// report end-of-stream once the child side is gone.
    pub fn clone_output(&self) -> io::Result<File> {
        let fd = self
            .master
            .as_raw_fd()
            .ok_or_else(|| io::Error::other("PTY master has no file descriptor"))?;
        // SAFETY: `fd` belongs to `self.master`, which is alive for the whole
        // call; it is only borrowed long enough to duplicate it.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        Ok(File::from(borrowed.try_clone_to_owned()?))
    }

    /// Exit code of the child if it has already exited.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.reaped = true;
                Some(status.exit_code())
            }
            _ => None,
        }
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        !self.reaped && self.try_wait().is_none()
    }

    /// Deliver a kill signal to the child. A child that already exited is
    /// not an error.
    pub fn kill(&mut self) -> io::Result<()> {
        if self.reaped {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(_) if self.try_wait().is_some() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Block until the child exits and reap it.
    pub fn wait(&mut self) -> io::Result<u32> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status.exit_code())
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if self.reaped || self.try_wait().is_some() {
            return;
        }
        if let Err(e) = self.child.kill() {
            log::warn!("failed to kill child {:?} on drop: {e}", self.pid);
            return;
        }
        if let Err(e) = self.child.wait() {
            log::warn!("failed to reap child {:?} on drop: {e}", self.pid);
        }
    }
}

fn build_command(
    command: Option<&[String]>,
    options: &LaunchOptions,
) -> Result<CommandBuilder, LaunchError> {
    let mut cmd = match command {
        Some(argv) => {
            let (program, args) = argv.split_first().ok_or(LaunchError::EmptyCommand)?;
            mark_executable(program);
            let mut cmd = CommandBuilder::new(program);
            cmd.args(args);
            cmd
        }
        None => {
            let (program, args) = shell_argv(options);
            let mut cmd = CommandBuilder::new(&program);
            cmd.args(&args);
            // sh reads $ENV at startup the way bash reads its rc files.
            cmd.env_remove("ENV");
            cmd
        }
    };

    cmd.env("TERM", &options.term);
    cmd.env("PS1", &options.prompt);

    let cwd = options
        .working_dir
        .clone()
        .or_else(|| std::env::current_dir().ok());
    if let Some(dir) = cwd {
        cmd.cwd(dir);
    }

    Ok(cmd)
}

/// Program and arguments of the interactive shell.
fn shell_argv(options: &LaunchOptions) -> (String, Vec<String>) {
    if let Some(shell) = options.shell.as_deref() {
        let mut parts = shell.split_whitespace().map(str::to_string);
        if let Some(program) = parts.next() {
            return (program, parts.collect());
        }
    }
    default_shell()
}

/// `bash --norc --noprofile` when bash is on `PATH`, `/bin/sh` otherwise.
fn default_shell() -> (String, Vec<String>) {
    match which::which("bash") {
        Ok(path) => (
            path.to_string_lossy().into_owned(),
            vec!["--norc".to_string(), "--noprofile".to_string()],
        ),
        Err(_) => ("/bin/sh".to_string(), Vec::new()),
    }
}

/// Best-effort `chmod 755` on a command given by path.
fn mark_executable(program: &str) {
    if !program.contains('/') {
        return;
    }
    let path = Path::new(program);
    if !path.is_file() {
        return;
    }
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o755)) {
        log::debug!("could not mark {program} executable: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::relay::{poll_readable, Readiness};

    fn sh() -> Vec<String> {
        vec!["/bin/sh".to_string()]
    }

    fn read_until(output: &mut File, needle: &str, timeout: Duration) -> String {
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match poll_readable(output, Duration::from_millis(100)) {
                Ok(Readiness::Readable) => match output.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => collected.extend_from_slice(&buf[..n]),
                },
                Ok(Readiness::TimedOut) => {}
                _ => break,
            }
            if String::from_utf8_lossy(&collected).contains(needle) {
                break;
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    #[test]
    fn test_spawn_pty() {
        let handle = PtyHandle::spawn(Some(&sh()), &LaunchOptions::default(), TermSize::default());
        assert!(handle.is_ok(), "Failed to spawn PTY: {:?}", handle.err());
        let mut handle = handle.unwrap();
        assert!(handle.is_alive());
        assert!(handle.pid().is_some());
    }

    #[test]
    fn test_write_read_echo() {
        let mut handle =
            PtyHandle::spawn(Some(&sh()), &LaunchOptions::default(), TermSize::default()).unwrap();
        let mut output = handle.clone_output().unwrap();

        handle.write(b"echo SSHX_PTY_OK\n").unwrap();

        let text = read_until(&mut output, "SSHX_PTY_OK\r\n", Duration::from_secs(5));
        assert!(
            text.contains("SSHX_PTY_OK"),
            "Expected output to contain SSHX_PTY_OK, got: {text}"
        );
    }

    #[test]
    fn test_term_is_set() {
        let options = LaunchOptions {
            term: "vt100".to_string(),
            ..LaunchOptions::default()
        };
        let mut handle = PtyHandle::spawn(Some(&sh()), &options, TermSize::default()).unwrap();
        let mut output = handle.clone_output().unwrap();

        handle.write(b"echo term=[$TERM]\n").unwrap();

        let text = read_until(&mut output, "term=[vt100]", Duration::from_secs(5));
        assert!(text.contains("term=[vt100]"), "got: {text}");
    }

    #[test]
    fn test_resize_is_idempotent() {
        let mut handle =
            PtyHandle::spawn(Some(&sh()), &LaunchOptions::default(), TermSize::default()).unwrap();
        let mut output = handle.clone_output().unwrap();
        let target = TermSize::new(40, 120);

        assert!(handle.resize(target).unwrap());
        assert!(!handle.resize(target).unwrap());
        assert_eq!(handle.size(), target);

        handle.write(b"stty size\n").unwrap();
        let text = read_until(&mut output, "40 120", Duration::from_secs(5));
        assert!(text.contains("40 120"), "got: {text}");
    }

    #[test]
    fn test_working_dir_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let options = LaunchOptions {
            working_dir: Some(dir.path().to_path_buf()),
            ..LaunchOptions::default()
        };
        let mut handle = PtyHandle::spawn(Some(&sh()), &options, TermSize::default()).unwrap();
        let mut output = handle.clone_output().unwrap();

        handle.write(b"echo cwd=[$(pwd -P)]\n").unwrap();

        let expected = format!("cwd=[{}]", dir.path().canonicalize().unwrap().display());
        let text = read_until(&mut output, &expected, Duration::from_secs(5));
        assert!(text.contains(&expected), "got: {text}");
    }

    #[test]
    fn test_child_exit() {
        let mut handle =
            PtyHandle::spawn(Some(&sh()), &LaunchOptions::default(), TermSize::default()).unwrap();
        handle.write(b"exit 3\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && handle.is_alive() {
            thread::sleep(Duration::from_millis(50));
        }

        assert!(!handle.is_alive(), "Child should have exited");
    }

    #[test]
    fn test_kill_and_wait_reaps_child() {
        let mut handle =
            PtyHandle::spawn(Some(&sh()), &LaunchOptions::default(), TermSize::default()).unwrap();
        let pid = handle.pid().unwrap();

        handle.kill().unwrap();
        handle.wait().unwrap();

        // A reaped child no longer exists, not even as a zombie.
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        assert_eq!(rc, -1);
        assert!(!handle.is_alive());
        // Killing again is a no-op.
        assert!(handle.kill().is_ok());
    }

    #[test]
    fn test_missing_executable_fails() {
        let argv = vec!["/definitely/not/here/sshx-missing".to_string()];
        let err = PtyHandle::spawn(Some(&argv), &LaunchOptions::default(), TermSize::default())
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }), "got: {err:?}");
    }

    #[test]
    fn test_empty_command_fails() {
        let err = PtyHandle::spawn(Some(&[]), &LaunchOptions::default(), TermSize::default())
            .unwrap_err();
        assert!(matches!(err, LaunchError::EmptyCommand));
    }

    #[test]
    fn test_command_is_marked_executable() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hello.sh");
        fs::write(&script, "#!/bin/sh\necho from-script\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        let argv = vec![script.to_string_lossy().into_owned()];
        let handle = PtyHandle::spawn(Some(&argv), &LaunchOptions::default(), TermSize::default());
        assert!(handle.is_ok(), "spawn failed: {:?}", handle.err());

        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_default_shell_detection() {
        let (program, args) = default_shell();
        assert!(!program.is_empty(), "Default shell should not be empty");
        assert!(
            program.starts_with('/'),
            "Default shell should be an absolute path, got: {program}"
        );
        if program.ends_with("bash") {
            assert_eq!(args, vec!["--norc", "--noprofile"]);
        }
    }

    #[test]
    fn test_configured_shell_is_split() {
        let options = LaunchOptions {
            shell: Some("/bin/sh -i".to_string()),
            ..LaunchOptions::default()
        };
        let (program, args) = shell_argv(&options);
        assert_eq!(program, "/bin/sh");
        assert_eq!(args, vec!["-i"]);
    }
}
