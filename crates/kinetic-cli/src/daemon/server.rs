//! Unix socket server for the daemon process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use kinetic_core::error::ApiError;
use kinetic_core::protocol::{Command, EngineState, Request, Response, ResponseData};

use crate::daemon::paths;
use crate::daemon::supervisor::SupervisorHandle;

/// Maximum concurrent client connections. The editor extension holds one;
/// the rest is headroom for CLI invocations.
const MAX_CONNECTIONS: usize = 16;

/// Maximum request size. Control requests are tiny; anything larger is a
/// confused client.
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// How long the daemon waits with no engine session before auto-shutdown.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How often to check the idle shutdown condition.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for in-flight connections during shutdown.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The daemon server that listens for control connections.
pub struct DaemonServer {
    listener: UnixListener,
    socket_path: PathBuf,
    pid_path: PathBuf,
    supervisor: SupervisorHandle,
    /// Limits concurrent connections.
    connection_semaphore: Arc<Semaphore>,
    /// Shutdown signal for graceful termination (lets Drop clean up files).
    shutdown: Arc<Notify>,
}

impl DaemonServer {
    /// Bind to the default socket path.
    pub async fn bind(supervisor: SupervisorHandle) -> Result<Self> {
        paths::ensure_runtime_dir().context("failed to create runtime directory")?;
        Self::bind_to(paths::socket_path(), paths::pid_path(), supervisor).await
    }

    /// Bind to a specific socket path.
    ///
    /// Binds first to avoid a TOCTOU race: only when the address is in
    /// use does it consult the PID file, and it removes the stale socket
    /// only after verifying the old daemon is dead and the path really is
    /// a socket (never following a symlink).
    pub async fn bind_to(
        socket_path: PathBuf,
        pid_path: PathBuf,
        supervisor: SupervisorHandle,
    ) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create socket directory {:?}", parent))?;
        }

        // The PID file is written immediately after a successful bind so
        // another starting daemon never sees our socket without it.
        let write_pid = |pid_path: &PathBuf| -> Result<()> {
            std::fs::write(pid_path, std::process::id().to_string())
                .with_context(|| format!("failed to write PID file {:?}", pid_path))
        };

        let listener = match UnixListener::bind(&socket_path) {
            Ok(listener) => {
                write_pid(&pid_path)?;
                listener
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if is_daemon_alive(&pid_path) {
                    anyhow::bail!(
                        "daemon already running (socket {:?} in use, PID file valid)",
                        socket_path
                    );
                }

                let metadata = std::fs::symlink_metadata(&socket_path)
                    .with_context(|| format!("failed to stat socket path {:?}", socket_path))?;
                if metadata.file_type().is_symlink() {
                    anyhow::bail!(
                        "socket path {:?} is a symlink, refusing to delete",
                        socket_path
                    );
                }
                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if !metadata.file_type().is_socket() {
                        anyhow::bail!(
                            "path {:?} exists but is not a socket (type: {:?})",
                            socket_path,
                            metadata.file_type()
                        );
                    }
                }

                info!("removing stale socket from dead daemon");
                std::fs::remove_file(&socket_path)
                    .with_context(|| format!("failed to remove stale socket {:?}", socket_path))?;

                let listener = UnixListener::bind(&socket_path)
                    .with_context(|| format!("failed to bind socket {:?}", socket_path))?;
                write_pid(&pid_path)?;
                listener
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to bind socket {:?}", socket_path));
            }
        };

        info!("daemon listening on {:?}", socket_path);

        Ok(Self {
            listener,
            socket_path,
            pid_path,
            supervisor,
            connection_semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.supervisor
    }

    /// Accept and serve connections until shutdown is signaled, then wait
    /// for in-flight connections (bounded by a timeout).
    pub async fn run(&self) -> Result<()> {
        self.spawn_idle_shutdown_task();

        let mut connection_tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        "connection limit ({}) reached, rejecting new connection",
                                        MAX_CONNECTIONS
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };

                            debug!("accepted control connection");
                            let supervisor = self.supervisor.clone();
                            let shutdown = self.shutdown.clone();
                            connection_tasks.spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, supervisor, shutdown).await {
                                    error!("connection error: {:#}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                // Reap finished handlers so the set doesn't grow unbounded.
                Some(_) = connection_tasks.join_next(), if !connection_tasks.is_empty() => {}
                _ = self.shutdown.notified() => {
                    info!("shutdown signal received, waiting for in-flight connections");
                    break;
                }
            }
        }

        if !connection_tasks.is_empty() {
            info!(
                "waiting for {} in-flight connection(s) to complete",
                connection_tasks.len()
            );
            let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
                while connection_tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    "graceful shutdown timed out after {:?}, aborting {} connection(s)",
                    GRACEFUL_SHUTDOWN_TIMEOUT,
                    connection_tasks.len()
                );
                connection_tasks.abort_all();
            }
        }

        Ok(())
    }

    /// Exit after [`IDLE_TIMEOUT`] with no engine session and no client
    /// connections. A connected editor keeps the daemon alive even with
    /// the engine stopped.
    fn spawn_idle_shutdown_task(&self) {
        let supervisor = self.supervisor.clone();
        let shutdown = self.shutdown.clone();
        let semaphore = self.connection_semaphore.clone();

        tokio::spawn(async move {
            let mut idle_since: Option<Instant> = None;

            loop {
                tokio::time::sleep(IDLE_CHECK_INTERVAL).await;

                let engine_active = match supervisor.status().await {
                    Ok(report) => report.state != EngineState::Stopped,
                    Err(_) => false,
                };
                let has_connections = semaphore.available_permits() < MAX_CONNECTIONS;

                if engine_active || has_connections {
                    idle_since = None;
                    continue;
                }

                let idle_start = *idle_since.get_or_insert_with(Instant::now);
                if idle_start.elapsed() >= IDLE_TIMEOUT {
                    info!(
                        "no engine session or connections for {}s, shutting down",
                        IDLE_TIMEOUT.as_secs()
                    );
                    shutdown.notify_waiters();
                    break;
                }

                debug!(
                    "idle for {}s (shutdown in {}s)",
                    idle_start.elapsed().as_secs(),
                    IDLE_TIMEOUT.saturating_sub(idle_start.elapsed()).as_secs()
                );
            }
        });
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() && std::fs::remove_file(&self.socket_path).is_err() {
            warn!("failed to remove socket on shutdown");
        }
        if self.pid_path.exists() && std::fs::remove_file(&self.pid_path).is_err() {
            warn!("failed to remove PID file on shutdown");
        }
    }
}

/// Check whether the daemon named by the PID file is still alive.
fn is_daemon_alive(pid_path: &Path) -> bool {
    let pid: i32 = match std::fs::read_to_string(pid_path) {
        Ok(s) => match s.trim().parse() {
            Ok(pid) => pid,
            Err(_) => return false,
        },
        Err(_) => return false,
    };

    // SAFETY: kill with signal 0 is the POSIX existence probe; no signal
    // is delivered.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Read one newline-terminated request, bounded so a confused client
/// cannot balloon daemon memory. Returns 0 at EOF.
async fn read_request_line(
    reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>,
    line: &mut String,
) -> Result<usize> {
    let mut limited = reader.take(MAX_REQUEST_SIZE as u64 + 1);
    let n = limited
        .read_line(line)
        .await
        .context("failed to read from client")?;
    if n > MAX_REQUEST_SIZE {
        anyhow::bail!("request exceeded {} byte limit", MAX_REQUEST_SIZE);
    }
    Ok(n)
}

/// Serve one client: a loop of JSON-line requests and responses.
async fn handle_connection(
    stream: UnixStream,
    supervisor: SupervisorHandle,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = read_request_line(&mut reader, &mut line).await?;
        if bytes_read == 0 {
            debug!("client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle_request(request, &supervisor, &shutdown).await,
            Err(e) => Response::error(
                "unknown",
                ApiError::invalid_input_with_suggestion(
                    format!("Invalid JSON request: {}", e),
                    "Send one JSON object per line with 'id' and 'command' fields, e.g. {\"id\":\"1\",\"command\":{\"action\":\"status\"}}",
                ),
            ),
        };

        let response_json =
            serde_json::to_string(&response).context("failed to serialize response")?;
        writer
            .write_all(response_json.as_bytes())
            .await
            .context("failed to write response")?;
        writer
            .write_all(b"\n")
            .await
            .context("failed to write newline")?;
        writer.flush().await.context("failed to flush")?;
    }

    Ok(())
}

/// Execute one control request.
async fn handle_request(
    request: Request,
    supervisor: &SupervisorHandle,
    shutdown: &Notify,
) -> Response {
    debug!("handling command: {:?}", request.command);

    match request.command {
        Command::Start {
            modes,
            debug,
            workspace,
        } => {
            match supervisor
                .start(modes, debug, workspace.map(PathBuf::from))
                .await
            {
                Ok(session) => {
                    info!(session = %session.id, "engine session started");
                    Response::success(&request.id, ResponseData::Started { session })
                }
                Err(e) => Response::error(&request.id, e),
            }
        }

        Command::Stop => match supervisor.stop().await {
            Ok(()) => Response::success(
                &request.id,
                ResponseData::Ok {
                    message: "engine stopped".to_string(),
                },
            ),
            Err(e) => Response::error(&request.id, e),
        },

        Command::Status => match supervisor.status().await {
            Ok(report) => Response::success(&request.id, ResponseData::Status(report)),
            Err(e) => Response::error(&request.id, e),
        },

        Command::SelectionChanged { selected } => {
            supervisor.selection_changed(selected).await;
            Response::success(
                &request.id,
                ResponseData::Ok {
                    message: "selection change forwarded".to_string(),
                },
            )
        }

        Command::Shutdown => {
            // Stop the engine first so reversible settings are restored
            // before the process exits.
            if let Err(e) = supervisor.stop().await {
                warn!("failed to stop engine during shutdown: {}", e);
            }
            shutdown.notify_waiters();
            Response::success(
                &request.id,
                ResponseData::Ok {
                    message: "daemon shutting down".to_string(),
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::engine::EngineLaunch;
    use crate::daemon::host::testing::RecordingHost;
    use crate::daemon::supervisor::{Supervisor, SupervisorConfig};
    use kinetic_core::mapping::GestureMap;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kinetic-srv-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_supervisor() -> SupervisorHandle {
        let config = SupervisorConfig::new(
            EngineLaunch {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "sleep 30".to_string()],
            },
            GestureMap::default(),
            temp_dir().join("preview.jpg"),
        );
        Supervisor::spawn(RecordingHost::default(), config)
    }

    async fn request_over_socket(stream: &mut UnixStream, request: &str) -> Response {
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_status_round_trip_over_socket() {
        let dir = temp_dir();
        let socket = dir.join("kineticd.sock");
        let pid = dir.join("kineticd.pid");
        let server = DaemonServer::bind_to(socket.clone(), pid.clone(), test_supervisor())
            .await
            .expect("bind");
        tokio::spawn(async move { server.run().await });

        let mut stream = UnixStream::connect(&socket).await.expect("connect");
        let response = request_over_socket(
            &mut stream,
            r#"{"id":"t1","command":{"action":"status"}}"#,
        )
        .await;
        assert!(response.success);
        assert_eq!(response.id, "t1");
        match response.data {
            Some(ResponseData::Status(report)) => {
                assert_eq!(report.state, EngineState::Stopped);
                assert!(report.session.is_none());
            }
            other => panic!("unexpected data: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_yields_typed_error() {
        let dir = temp_dir();
        let socket = dir.join("kineticd.sock");
        let server = DaemonServer::bind_to(socket.clone(), dir.join("pid"), test_supervisor())
            .await
            .expect("bind");
        tokio::spawn(async move { server.run().await });

        let mut stream = UnixStream::connect(&socket).await.expect("connect");
        let response = request_over_socket(&mut stream, "this is not json").await;
        assert!(!response.success);
        let error = response.error.expect("error payload");
        assert_eq!(error.code, kinetic_core::error::ErrorCode::InvalidInput);
        assert!(error.suggestion.is_some());
    }

    #[tokio::test]
    async fn test_second_bind_with_live_pid_fails() {
        let dir = temp_dir();
        let socket = dir.join("kineticd.sock");
        let pid = dir.join("kineticd.pid");
        let _server = DaemonServer::bind_to(socket.clone(), pid.clone(), test_supervisor())
            .await
            .expect("bind");

        // Our own PID is in the file and we are clearly alive.
        let result = DaemonServer::bind_to(socket, pid, test_supervisor()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stale_socket_is_taken_over() {
        let dir = temp_dir();
        let socket = dir.join("kineticd.sock");
        let pid = dir.join("kineticd.pid");
        {
            // Bind and drop without cleanup to fake a crashed daemon.
            let listener = UnixListener::bind(&socket).unwrap();
            std::fs::write(&pid, "999999999").unwrap();
            drop(listener);
        }
        assert!(socket.exists());

        let server = DaemonServer::bind_to(socket.clone(), pid, test_supervisor())
            .await
            .expect("takeover");
        drop(server);
        assert!(!socket.exists());
    }
}
