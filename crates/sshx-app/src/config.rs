//! Panel configuration, read once at startup from the `settings` table.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use sshx_db::settings;
use sshx_pty::{CellMetrics, LaunchOptions, RegistryConfig, TermSize};

pub const SETTING_TERM: &str = "term";
pub const SETTING_PROMPT: &str = "prompt";
pub const SETTING_SHELL: &str = "shell";
pub const SETTING_CELL_WIDTH: &str = "cell_width_px";
pub const SETTING_CELL_HEIGHT: &str = "cell_height_px";
pub const SETTING_POLL_INTERVAL: &str = "poll_interval_ms";
pub const SETTING_INITIAL_ROWS: &str = "initial_rows";
pub const SETTING_INITIAL_COLS: &str = "initial_cols";
pub const SETTING_LIB_DIR: &str = "lib_dir";
pub const SETTING_WORKING_DIR: &str = "working_dir";

/// Every key `:set` accepts.
pub const KNOWN_SETTINGS: &[&str] = &[
    SETTING_TERM,
    SETTING_PROMPT,
    SETTING_SHELL,
    SETTING_CELL_WIDTH,
    SETTING_CELL_HEIGHT,
    SETTING_POLL_INTERVAL,
    SETTING_INITIAL_ROWS,
    SETTING_INITIAL_COLS,
    SETTING_LIB_DIR,
    SETTING_WORKING_DIR,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelConfig {
    pub term: String,
    pub prompt: String,
    /// Interactive shell command line; empty means auto-detect.
    pub shell: Option<String>,
    pub cell_width_px: u32,
    pub cell_height_px: u32,
    pub poll_interval_ms: u64,
    pub initial_rows: u16,
    pub initial_cols: u16,
    /// Where `lib` presets live.
    pub lib_dir: PathBuf,
    /// Starting directory of new sessions; `None` means ours.
    pub working_dir: Option<PathBuf>,
}

impl PanelConfig {
    pub fn defaults(home: &Path) -> Self {
        let launch = LaunchOptions::default();
        let metrics = CellMetrics::default();
        let size = TermSize::default();
        Self {
            term: launch.term,
            prompt: launch.prompt,
            shell: None,
            cell_width_px: metrics.cell_width_px,
            cell_height_px: metrics.cell_height_px,
            poll_interval_ms: sshx_pty::DEFAULT_POLL_INTERVAL.as_millis() as u64,
            initial_rows: size.rows,
            initial_cols: size.cols,
            lib_dir: home.join("lib"),
            working_dir: None,
        }
    }

    /// Defaults overlaid with whatever the settings table holds.
    ///
    /// Values that do not parse are logged and ignored.
    pub fn load(conn: &Connection, home: &Path) -> rusqlite::Result<Self> {
        let defaults = Self::defaults(home);
        Ok(Self {
            term: settings::get(conn, SETTING_TERM)?.unwrap_or(defaults.term),
            prompt: settings::get(conn, SETTING_PROMPT)?.unwrap_or(defaults.prompt),
            shell: settings::get(conn, SETTING_SHELL)?.filter(|s| !s.trim().is_empty()),
            cell_width_px: parsed(conn, SETTING_CELL_WIDTH, defaults.cell_width_px)?,
            cell_height_px: parsed(conn, SETTING_CELL_HEIGHT, defaults.cell_height_px)?,
            poll_interval_ms: parsed(conn, SETTING_POLL_INTERVAL, defaults.poll_interval_ms)?,
            initial_rows: parsed(conn, SETTING_INITIAL_ROWS, defaults.initial_rows)?,
            initial_cols: parsed(conn, SETTING_INITIAL_COLS, defaults.initial_cols)?,
            lib_dir: settings::get(conn, SETTING_LIB_DIR)?
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.lib_dir),
            working_dir: settings::get(conn, SETTING_WORKING_DIR)?
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            launch: LaunchOptions {
                term: self.term.clone(),
                prompt: self.prompt.clone(),
                shell: self.shell.clone(),
                working_dir: self.working_dir.clone(),
            },
            initial_size: TermSize::new(self.initial_rows, self.initial_cols),
            cell_metrics: CellMetrics::new(self.cell_width_px, self.cell_height_px),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

/// Check that `value` is acceptable for `key` before it is stored.
pub fn validate(key: &str, value: &str) -> Result<(), String> {
    fn number<T: FromStr>(key: &str, value: &str) -> Result<(), String> {
        value
            .parse::<T>()
            .map(|_| ())
            .map_err(|_| format!("{key} must be a number, got {value:?}"))
    }

    match key {
        SETTING_CELL_WIDTH | SETTING_CELL_HEIGHT => number::<u32>(key, value),
        SETTING_POLL_INTERVAL => number::<u64>(key, value),
        SETTING_INITIAL_ROWS | SETTING_INITIAL_COLS => number::<u16>(key, value),
        SETTING_WORKING_DIR if !value.trim().is_empty() && !Path::new(value).is_dir() => {
            Err(format!("{key} must be an existing directory, got {value:?}"))
        }
        SETTING_TERM | SETTING_PROMPT | SETTING_SHELL | SETTING_LIB_DIR
        | SETTING_WORKING_DIR => Ok(()),
        other => Err(format!(
            "unknown setting {other:?} (known: {})",
            KNOWN_SETTINGS.join(", ")
        )),
    }
}

fn parsed<T: FromStr>(conn: &Connection, key: &str, default: T) -> rusqlite::Result<T> {
    let Some(raw) = settings::get(conn, key)? else {
        return Ok(default);
    };
    match raw.trim().parse() {
        Ok(value) => Ok(value),
        Err(_) => {
            log::warn!("ignoring unparsable setting {key}={raw:?}");
            Ok(default)
        }
    }
}
