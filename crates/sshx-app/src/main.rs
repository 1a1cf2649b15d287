mod commands;
mod config;
mod console;
mod display;
mod seed;
mod state;

use std::path::PathBuf;

use config::PanelConfig;
use state::AppState;

#[tokio::main]
async fn main() {
    // Logs go to stderr so they never interleave with session output.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run().await {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    // Set up the panel home directory.
    let panel_home = panel_home().ok_or("could not determine home directory")?;
    std::fs::create_dir_all(panel_home.join("lib"))
        .map_err(|e| format!("failed to create {}: {e}", panel_home.join("lib").display()))?;

    // Open (or create) the SQLite database.
    let db_path = panel_home.join("panel.db");
    let db = sshx_db::open(&db_path).map_err(|e| format!("failed to open database: {e}"))?;

    // Seed built-in presets on first launch.
    seed::seed_presets(&db).map_err(|e| format!("failed to seed presets: {e}"))?;

    let config =
        PanelConfig::load(&db, &panel_home).map_err(|e| format!("failed to load settings: {e}"))?;
    log::debug!("configuration: {config:?}");

    let app_state = AppState::new(db, config, Box::new(std::io::stdout()));
    console::run(&app_state).await;

    commands::terminal::close_all(&app_state).await
}

/// `$SSHX_PANEL_HOME`, or `~/.sshx-panel`.
fn panel_home() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("SSHX_PANEL_HOME").filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".sshx-panel"))
}
