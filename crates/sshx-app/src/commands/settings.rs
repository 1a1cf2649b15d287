use sshx_db::settings;

use crate::config;
use crate::state::AppState;

/// Validate and store a setting. Takes effect on the next start.
pub async fn set_setting(state: &AppState, key: String, value: String) -> Result<(), String> {
    config::validate(&key, &value)?;
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        settings::set(&conn, &key, &value).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}

/// Every stored setting, sorted by key.
pub async fn list_settings(state: &AppState) -> Result<Vec<(String, String)>, String> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        settings::all(&conn).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}

/// The configuration in effect for this run, as pretty JSON.
pub fn show_config(state: &AppState) -> Result<String, String> {
    serde_json::to_string_pretty(&state.config).map_err(|e| e.to_string())
}
