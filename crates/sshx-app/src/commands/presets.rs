use sshx_db::presets::{self, LaunchPreset};
use sshx_db::PresetKind;
use sshx_pty::SessionId;

use crate::commands::terminal::create_terminal;
use crate::state::AppState;

pub async fn list_presets(state: &AppState) -> Result<Vec<LaunchPreset>, String> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        presets::list_presets(&conn).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}

/// Store a new preset. `kind` is `shell`, `argv` or `lib`.
pub async fn add_preset(
    state: &AppState,
    name: String,
    kind: &str,
    command: String,
) -> Result<i64, String> {
    let kind: PresetKind = kind.parse()?;
    if kind == PresetKind::Argv {
        let argv: Vec<String> = serde_json::from_str(&command)
            .map_err(|e| format!("argv presets take a JSON array of strings: {e}"))?;
        if argv.is_empty() {
            return Err("argv presets need at least a program".to_string());
        }
    }
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        if presets::get_preset_by_name(&conn, &name)
            .map_err(|e| e.to_string())?
            .is_some()
        {
            return Err(format!("a preset named {name:?} already exists"));
        }
        presets::create_preset(&conn, &name, kind, &command).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}

/// Delete the preset called `name`.
pub async fn remove_preset(state: &AppState, name: String) -> Result<(), String> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        let preset = presets::get_preset_by_name(&conn, &name)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no preset named {name:?} (see :presets)"))?;
        presets::delete_preset(&conn, preset.id).map_err(|e| e.to_string())?;
        log::info!("preset {} removed", preset.name);
        Ok(())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}

/// Start a new session running the preset called `name`.
pub async fn launch_preset(state: &AppState, name: &str) -> Result<SessionId, String> {
    let preset = {
        let conn = state.lock_db()?;
        presets::get_preset_by_name(&conn, name)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no preset named {name:?} (see :presets)"))?
    };
    let argv = preset.argv(&state.config.lib_dir)?;
    create_terminal(state, preset.name, Some(argv)).await
}
