use rusqlite::Connection;
use sshx_db::presets::{self, PresetKind};

/// Quick-launch entries created on first start.
const BUILTIN_PRESETS: &[(&str, PresetKind, &str)] = &[
    ("List", PresetKind::Shell, "sshx --list"),
    ("Menu", PresetKind::Argv, r#"["sshx", "--menu"]"#),
    ("Doctor", PresetKind::Shell, "sshx --doctor"),
    ("Version", PresetKind::Shell, "sshx --version"),
    ("Help", PresetKind::Shell, "sshx --help"),
    ("Git Auth", PresetKind::Lib, "git-auth"),
    ("SSHX Reset", PresetKind::Lib, "sshx-reset"),
];

/// Seed built-in presets if the presets table is empty.
pub fn seed_presets(conn: &Connection) -> rusqlite::Result<()> {
    if presets::count_presets(conn)? > 0 {
        return Ok(());
    }

    for (name, kind, command) in BUILTIN_PRESETS {
        presets::create_preset(conn, name, *kind, command)?;
    }
    log::debug!("seeded {} launch presets", BUILTIN_PRESETS.len());

    Ok(())
}
