//! kinetic CLI and daemon entry point.

mod args;
mod daemon;

use clap::Parser;
use kinetic_core::mapping::Origin;
use kinetic_core::protocol::{Command, Request, ResponseData};
use tracing::{error, info};
use uuid::Uuid;

use crate::args::{Cli, Commands, DaemonArgs};
use crate::daemon::client::DaemonClient;
use crate::daemon::dispatch::load_gesture_map;
use crate::daemon::engine::EngineLaunch;
use crate::daemon::host::EditorHost;
use crate::daemon::paths;
use crate::daemon::server::DaemonServer;
use crate::daemon::supervisor::{Supervisor, SupervisorConfig};

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Daemon command runs the server, all other commands are clients
    if let Commands::Daemon(daemon_args) = cli.command {
        run_daemon(daemon_args);
        return;
    }

    // All other commands talk to the daemon
    if let Err(e) = run_client_command(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Convert CLI args to a protocol Command.
///
/// Returns None for commands that don't require daemon communication.
fn cli_to_command(cli: &Cli) -> Option<Command> {
    match &cli.command {
        Commands::Start(args) => Some(Command::Start {
            modes: args.modes.clone(),
            debug: args.debug,
            workspace: args.workspace.clone(),
        }),
        Commands::Stop => Some(Command::Stop),
        Commands::Status => Some(Command::Status),
        Commands::SelectionChanged(args) => Some(Command::SelectionChanged {
            selected: args.selected,
        }),
        Commands::StopDaemon => Some(Command::Shutdown),
        Commands::Daemon(_) => unreachable!("Daemon command handled separately"),
        Commands::Map | Commands::Examples => None,
    }
}

/// Run a client command by connecting to the daemon.
fn run_client_command(cli: Cli) -> anyhow::Result<()> {
    // Handle commands that don't need daemon communication
    let Some(command) = cli_to_command(&cli) else {
        match cli.command {
            Commands::Map => print_gesture_map()?,
            Commands::Examples => println!("{}", crate::args::EXAMPLES_TEXT),
            _ => {}
        }
        return Ok(());
    };

    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        // Connect to daemon (auto-starts if not running)
        let mut client = DaemonClient::connect().await?;

        let request = Request {
            id: Uuid::new_v4().to_string(),
            command,
        };

        let response = client.request(request).await?;

        if response.success {
            if let Some(data) = response.data {
                match data {
                    ResponseData::Ok { message } => println!("{}", message),
                    _ => println!("{}", serde_json::to_string_pretty(&data)?),
                }
            }
        } else if let Some(err) = response.error {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }

        Ok(())
    })
}

/// Print the effective gesture mapping table: fixed bindings first, then
/// the user's custom ones from mappings.json.
fn print_gesture_map() -> anyhow::Result<()> {
    let map = load_gesture_map()?;
    let entries = map.entries();
    let width = entries
        .iter()
        .map(|(gesture, _, _)| gesture.len())
        .max()
        .unwrap_or(0);
    for (gesture, binding, origin) in entries {
        let origin = match origin {
            Origin::Fixed => "fixed",
            Origin::Custom => "custom",
        };
        match &binding.args {
            Some(args) => println!(
                "{:width$}  {:6}  {} {}",
                gesture, origin, binding.command, args
            ),
            None => println!("{:width$}  {:6}  {}", gesture, origin, binding.command),
        }
    }
    Ok(())
}

/// Run the daemon server with graceful signal handling.
///
/// Handles SIGINT (Ctrl+C) and SIGTERM for clean shutdown. The
/// DaemonServer's Drop impl cleans up socket and PID files, and the
/// shutdown path stops the engine so reversible settings are restored.
fn run_daemon(daemon_args: DaemonArgs) {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let launch = match EngineLaunch::resolve(daemon_args.engine, daemon_args.python) {
            Ok(launch) => launch,
            Err(e) => {
                error!("Failed to resolve engine: {:#}", e);
                std::process::exit(1);
            }
        };
        let map = match load_gesture_map() {
            Ok(map) => map,
            Err(e) => {
                error!("Failed to load gesture mappings: {:#}", e);
                std::process::exit(1);
            }
        };
        let host = EditorHost::resolve(daemon_args.host_cmd, daemon_args.host_settings);

        let config = SupervisorConfig::new(launch, map, paths::frame_path());
        let supervisor = Supervisor::spawn(host, config);

        let server = match DaemonServer::bind(supervisor.clone()).await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to start daemon: {:#}", e);
                std::process::exit(1);
            }
        };

        // Run server with signal handling
        tokio::select! {
            result = server.run() => {
                if let Err(e) = result {
                    error!("Daemon error: {:#}", e);
                    std::process::exit(1);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully");
            }
            _ = sigterm() => {
                info!("Received SIGTERM, shutting down gracefully");
            }
        }

        // Stop any engine session so settings restore before we exit.
        if let Err(e) = supervisor.stop().await {
            error!("Failed to stop engine during shutdown: {}", e);
        }
        // Server is dropped here, triggering cleanup of socket and PID files
    });
}

/// Wait for SIGTERM signal (Unix only).
///
/// If signal registration fails, logs a warning and waits indefinitely.
/// This graceful fallback prevents panics during daemon startup.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, daemon will only respond to SIGINT",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM is not available on non-Unix platforms; use a never-completing future.
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
