use std::path::Path;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// How a preset's `command` column is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    /// A command line run by `bash -c`.
    Shell,
    /// A JSON array of program and arguments.
    Argv,
    /// The name of an executable inside the panel's lib directory.
    Lib,
}

impl PresetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Argv => "argv",
            Self::Lib => "lib",
        }
    }
}

impl FromStr for PresetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" => Ok(Self::Shell),
            "argv" => Ok(Self::Argv),
            "lib" => Ok(Self::Lib),
            other => Err(format!("unknown preset kind: {other}")),
        }
    }
}

impl FromSql for PresetKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchPreset {
    pub id: i64,
    pub name: String,
    pub kind: PresetKind,
    pub command: String,
}

impl LaunchPreset {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            command: row.get(3)?,
        })
    }

    /// Program and arguments this preset launches.
    ///
    /// `lib` presets must exist inside `lib_dir`.
    pub fn argv(&self, lib_dir: &Path) -> Result<Vec<String>, String> {
        match self.kind {
            PresetKind::Shell => Ok(vec![
                "bash".to_string(),
                "-c".to_string(),
                self.command.clone(),
            ]),
            PresetKind::Argv => {
                let argv: Vec<String> = serde_json::from_str(&self.command)
                    .map_err(|e| format!("preset {}: invalid argv: {e}", self.name))?;
                if argv.is_empty() {
                    return Err(format!("preset {}: empty argv", self.name));
                }
                Ok(argv)
            }
            PresetKind::Lib => {
                let path = lib_dir.join(&self.command);
                if !path.is_file() {
                    return Err(format!("{} not found", path.display()));
                }
                Ok(vec![path.to_string_lossy().into_owned()])
            }
        }
    }
}

pub fn list_presets(conn: &Connection) -> rusqlite::Result<Vec<LaunchPreset>> {
    let mut stmt =
        conn.prepare("SELECT id, name, kind, command FROM launch_presets ORDER BY id")?;
    let rows = stmt.query_map([], LaunchPreset::from_row)?;
    rows.collect()
}

pub fn get_preset_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<LaunchPreset>> {
    conn.query_row(
        "SELECT id, name, kind, command FROM launch_presets WHERE name = ?1 COLLATE NOCASE",
        params![name],
        LaunchPreset::from_row,
    )
    .optional()
}

pub fn create_preset(
    conn: &Connection,
    name: &str,
    kind: PresetKind,
    command: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO launch_presets (name, kind, command) VALUES (?1, ?2, ?3)",
        params![name, kind.as_str(), command],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_preset(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute("DELETE FROM launch_presets WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

pub fn count_presets(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM launch_presets", [], |row| row.get(0))
}
