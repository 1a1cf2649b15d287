//! Operator console: reads lines from stdin and turns them into session
//! operations.
//!
//! A line starting with `:` is a command; anything else is typed into the
//! focused session followed by Enter. `::` types a literal leading colon.

use sshx_pty::{InputEvent, SessionId};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::{presets, settings, terminal};
use crate::state::AppState;

pub const HELP: &str = "\
commands:
  :new [label]              open an interactive shell
  :run <label> <argv...>    run a program in a new session
  :sh <command line>        run a command line with bash -c
  :connect <target>         open a shell and run `sshx <target>`
  :preset <name>            launch a saved preset
  :presets                  list saved presets
  :preset-add <name> <kind> <command>
                            save a preset; kind is shell, argv (JSON
                            array) or lib (file in the lib directory)
  :preset-rm <name>         delete a preset
  :list                     list sessions
  :focus <id>               switch the focused session
  :key <name>               send enter, backspace, delete or ctrl-c
  :paste <text>             send text without a trailing Enter
  :resize <rows> <cols>     resize the focused session
  :resize-px <w> <h>        resize from a display size in pixels
  :close [id]               close a session (default: focused)
  :set <key> <value>        store a setting for the next start
  :settings                 list stored settings
  :config                   show the configuration in effect
  :help                     show this help
  :quit                     close every session and exit
any other line is typed into the focused session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Type a line into the focused session.
    Type(String),
    New(Option<String>),
    Run { label: String, argv: Vec<String> },
    Sh(String),
    Connect(String),
    Preset(String),
    Presets,
    PresetAdd {
        name: String,
        kind: String,
        command: String,
    },
    PresetRm(String),
    List,
    Focus(SessionId),
    Key(InputEvent),
    Paste(String),
    Resize { rows: u16, cols: u16 },
    ResizePixels { width: u32, height: u32 },
    Close(Option<SessionId>),
    Set { key: String, value: String },
    Settings,
    Config,
    Help,
    Quit,
}

/// What the console loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(literal) = line.strip_prefix("::") {
        return Ok(Command::Type(format!(":{literal}")));
    }
    let Some(body) = line.strip_prefix(':') else {
        return Ok(Command::Type(line.to_string()));
    };

    let (name, rest) = match body.trim_start().split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body.trim(), ""),
    };
    let mut args = rest.split_whitespace();

    let command = match name {
        "new" => Command::New(non_empty(rest)),
        "run" => {
            let label = args.next().ok_or("usage: :run <label> <argv...>")?;
            let argv: Vec<String> = args.map(str::to_string).collect();
            if argv.is_empty() {
                return Err("usage: :run <label> <argv...>".to_string());
            }
            Command::Run {
                label: label.to_string(),
                argv,
            }
        }
        "sh" => Command::Sh(non_empty(rest).ok_or("usage: :sh <command line>")?),
        "connect" => Command::Connect(non_empty(rest).ok_or("usage: :connect <target>")?),
        "preset" => Command::Preset(non_empty(rest).ok_or("usage: :preset <name>")?),
        "presets" => Command::Presets,
        "preset-add" => {
            let usage = "usage: :preset-add <name> <shell|argv|lib> <command>";
            let (name, rest) = rest.split_once(char::is_whitespace).ok_or(usage)?;
            let (kind, command) = rest.trim().split_once(char::is_whitespace).ok_or(usage)?;
            Command::PresetAdd {
                name: name.to_string(),
                kind: kind.to_string(),
                command: command.trim().to_string(),
            }
        }
        "preset-rm" => Command::PresetRm(non_empty(rest).ok_or("usage: :preset-rm <name>")?),
        "list" | "ls" => Command::List,
        "focus" => Command::Focus(number(args.next(), "usage: :focus <id>")?),
        "key" => {
            let key = args.next().ok_or("usage: :key enter|backspace|delete|ctrl-c")?;
            Command::Key(
                InputEvent::from_key_name(key).ok_or_else(|| format!("unknown key {key:?}"))?,
            )
        }
        "paste" => Command::Paste(rest.to_string()),
        "resize" => {
            let usage = "usage: :resize <rows> <cols>";
            Command::Resize {
                rows: number(args.next(), usage)?,
                cols: number(args.next(), usage)?,
            }
        }
        "resize-px" => {
            let usage = "usage: :resize-px <width> <height>";
            Command::ResizePixels {
                width: number(args.next(), usage)?,
                height: number(args.next(), usage)?,
            }
        }
        "close" => Command::Close(match args.next() {
            Some(id) => Some(number(Some(id), "usage: :close [id]")?),
            None => None,
        }),
        "set" => {
            let usage = "usage: :set <key> <value>";
            let (key, value) = rest.split_once(char::is_whitespace).ok_or(usage)?;
            Command::Set {
                key: key.to_string(),
                value: value.trim().to_string(),
            }
        }
        "settings" => Command::Settings,
        "config" => Command::Config,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command :{other} (try :help)")),
    };
    Ok(command)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn number<T: std::str::FromStr>(arg: Option<&str>, usage: &str) -> Result<T, String> {
    arg.and_then(|a| a.parse().ok())
        .ok_or_else(|| usage.to_string())
}

pub async fn execute(state: &AppState, command: Command) -> Result<Flow, String> {
    match command {
        Command::Type(line) => terminal::write_line(state, &line)?,
        Command::New(label) => {
            let label = label.unwrap_or_else(|| "Terminal".to_string());
            let id = terminal::create_terminal(state, label.clone(), None).await?;
            state.display.notice(&format!("[session {id} ({label}) opened]"));
        }
        Command::Run { label, argv } => {
            let id = terminal::create_terminal(state, label.clone(), Some(argv)).await?;
            state.display.notice(&format!("[session {id} ({label}) started]"));
        }
        Command::Sh(line) => {
            let argv = vec!["bash".to_string(), "-c".to_string(), line];
            let id = terminal::create_terminal(state, "Command".to_string(), Some(argv)).await?;
            state.display.notice(&format!("[session {id} (Command) started]"));
        }
        Command::Connect(target) => {
            let id = terminal::connect(state, &target).await?;
            state.display.notice(&format!("[session {id} ({target}) opened]"));
        }
        Command::Preset(name) => {
            let id = presets::launch_preset(state, &name).await?;
            state.display.notice(&format!("[session {id} ({name}) started]"));
        }
        Command::Presets => {
            let list = presets::list_presets(state).await?;
            if list.is_empty() {
                state.display.notice("no presets");
            }
            for preset in list {
                state.display.notice(&format!(
                    "  {:<12} {:<6} {}",
                    preset.name,
                    preset.kind.as_str(),
                    preset.command
                ));
            }
        }
        Command::PresetAdd {
            name,
            kind,
            command,
        } => {
            presets::add_preset(state, name.clone(), &kind, command).await?;
            state.display.notice(&format!("[preset {name} saved]"));
        }
        Command::PresetRm(name) => {
            presets::remove_preset(state, name.clone()).await?;
            state.display.notice(&format!("[preset {name} removed]"));
        }
        Command::List => {
            let focus = state.display.focus();
            let sessions = terminal::list_terminals(state);
            if sessions.is_empty() {
                state.display.notice("no sessions");
            }
            for info in sessions {
                let marker = if focus == Some(info.id) { '*' } else { ' ' };
                let pid = info.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
                state.display.notice(&format!(
                    "{marker} {:>3}  {:<20} {:<11} pid {:<7} {}x{}",
                    info.id, info.label, info.state, pid, info.size.cols, info.size.rows
                ));
            }
        }
        Command::Focus(id) => {
            if !state.display.set_focus(id) {
                return Err(format!("Session {id} not found"));
            }
        }
        Command::Key(event) => terminal::send_key(state, event)?,
        Command::Paste(text) => terminal::send_key(state, InputEvent::Paste(text))?,
        Command::Resize { rows, cols } => {
            let size = terminal::resize_terminal(state, rows, cols)?;
            state.display.notice(&format!("[resized to {}x{}]", size.cols, size.rows));
        }
        Command::ResizePixels { width, height } => {
            let size = terminal::resize_pixels(state, width, height)?;
            state.display.notice(&format!("[resized to {}x{}]", size.cols, size.rows));
        }
        Command::Close(id) => {
            terminal::close_terminal(state, id).await?;
        }
        Command::Set { key, value } => {
            settings::set_setting(state, key.clone(), value).await?;
            state.display.notice(&format!("[{key} saved; takes effect on next start]"));
        }
        Command::Settings => {
            let stored = settings::list_settings(state).await?;
            if stored.is_empty() {
                state.display.notice("no stored settings (defaults in effect)");
            }
            for (key, value) in stored {
                state.display.notice(&format!("  {key:<16} {value}"));
            }
        }
        Command::Config => state.display.notice(&settings::show_config(state)?),
        Command::Help => state.display.notice(HELP),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Read commands from stdin until `:quit`, end of input, or Ctrl-C.
pub async fn run(state: &AppState) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    state.display.notice("sshx-panel: type :help for commands");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::warn!("stdin read failed: {e}");
                break;
            }
        };

        let result = match parse(&line) {
            Ok(command) => execute(state, command).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => state.display.notice(&format!("error: {e}")),
        }
    }
}
