//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Gesture control for the host editor.
///
/// Supervises an external perception engine (hand swipes, posture, winks)
/// and turns its event stream into editor actions. Sessions run under a
/// per-user daemon; every other command talks to it over a control socket.
#[derive(Debug, Parser)]
#[command(name = "kinetic", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start an engine session with the selected tracking modes
    #[command(after_help = "\
Modes:
  swipe       hand-swipe tab navigation
  posture     slouch/upright watching (shrinks the font while you slouch)
  wink        wink detection
  push        lean-back repository push (requires a confirming repeat)
  copy-paste  fist-driven copy/paste
  unified     hands, posture, and face together

Examples:
  kinetic start -m swipe                     # Tab switching only
  kinetic start -m swipe -m posture          # Two modes, one engine
  kinetic start -m unified --debug           # Engine preview window on
  kinetic start -m push --workspace ~/proj   # Push commits from ~/proj")]
    Start(StartArgs),

    /// Stop the running engine session
    Stop,

    /// Show supervisor and session state
    Status,

    /// Forward an editor selection change to the engine
    #[command(after_help = "\
Examples:
  kinetic selection-changed --selected true   # Text is selected
  kinetic selection-changed --selected false  # Selection cleared")]
    SelectionChanged(SelectionChangedArgs),

    /// Print the effective gesture mapping table
    Map,

    /// Show an end-to-end usage example
    Examples,

    /// Start the daemon process (usually auto-started)
    Daemon(DaemonArgs),

    /// Stop the daemon process
    StopDaemon,
}

#[derive(Debug, clap::Args)]
pub struct StartArgs {
    /// Tracking mode to enable (repeatable)
    #[arg(short = 'm', long = "mode", value_name = "MODE", required = true)]
    pub modes: Vec<String>,

    /// Show the engine's camera preview window
    #[arg(long)]
    pub debug: bool,

    /// Workspace root for the guarded repository push.
    /// If omitted, uses the daemon's current directory.
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct SelectionChangedArgs {
    /// Whether the editor currently has a selection
    #[arg(long, action = ArgAction::Set, value_name = "BOOL")]
    pub selected: bool,
}

#[derive(Debug, clap::Args)]
pub struct DaemonArgs {
    /// Path to the perception engine script [env: KINETIC_ENGINE]
    #[arg(long, value_name = "PATH")]
    pub engine: Option<PathBuf>,

    /// Interpreter to run the engine with [env: KINETIC_PYTHON] [default: python3]
    #[arg(long, value_name = "BIN")]
    pub python: Option<String>,

    /// Editor CLI used to invoke host commands [env: KINETIC_HOST_CMD] [default: code]
    #[arg(long, value_name = "BIN")]
    pub host_cmd: Option<String>,

    /// The editor's JSON settings file [env: KINETIC_HOST_SETTINGS]
    #[arg(long, value_name = "PATH")]
    pub host_settings: Option<PathBuf>,
}

/// End-to-end example text for the `examples` command.
pub const EXAMPLES_TEXT: &str = r#"End-to-end example: hands-free tab switching with posture watching

# 1. Point the daemon at the perception engine script
export KINETIC_ENGINE=~/engines/perception.py

# 2. Start tracking hand swipes and posture (auto-starts the daemon)
kinetic start -m swipe -m posture

# 3. Check what is running
kinetic status

# 4. Swipe left or right in front of the camera to switch editor tabs.
#    Slouch and the editor font shrinks until you sit upright again.

# 5. Enable the lean-back push in a specific repository
kinetic start -m swipe -m push --workspace ~/proj

# 6. Lean back to request a push, repeat within 5 seconds to confirm.
#    No repeat means no push.

# 7. Stop the session; any shrunken font returns to its baseline
kinetic stop

# Custom gestures live in ~/.config/kinetic/mappings.json:
#   {"fist": {"command": "workbench.action.toggleTerminal"}}
kinetic map
"#;
