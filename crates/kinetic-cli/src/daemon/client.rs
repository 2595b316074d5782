//! Client for connecting to the daemon process.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info};

use kinetic_core::protocol::{Request, Response};

use crate::daemon::paths;

/// Maximum time to wait for the daemon to start up.
const DAEMON_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between socket connection attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for communicating with the daemon.
pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Connect to the daemon, starting it if necessary.
    pub async fn connect() -> Result<Self> {
        let socket_path = paths::socket_path();

        if let Ok(stream) = UnixStream::connect(&socket_path).await {
            debug!("connected to existing daemon");
            return Ok(Self { stream });
        }

        info!("daemon not running, starting...");
        let child = Self::start_daemon()?;
        let stream = Self::wait_for_daemon(&socket_path, child).await?;
        Ok(Self { stream })
    }

    /// Start the daemon as a detached background process.
    ///
    /// Returns the child handle so an early crash surfaces immediately
    /// instead of after the full startup timeout.
    fn start_daemon() -> Result<std::process::Child> {
        use std::os::unix::process::CommandExt;

        let exe = std::env::current_exe().context("failed to get current executable path")?;

        // process_group(0) detaches the daemon from this terminal so it
        // survives the CLI's exit and never receives its SIGHUP.
        let child = std::process::Command::new(exe)
            .arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .context("failed to spawn daemon process")?;

        Ok(child)
    }

    /// Wait for the daemon socket to accept a connection.
    async fn wait_for_daemon(
        socket_path: &PathBuf,
        mut child: std::process::Child,
    ) -> Result<UnixStream> {
        let start = std::time::Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    bail!(
                        "daemon exited immediately with {} (run 'kinetic daemon' directly to diagnose; is KINETIC_ENGINE set?)",
                        status
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("error checking daemon status: {}", e);
                }
            }

            match UnixStream::connect(socket_path).await {
                Ok(stream) => {
                    debug!("connected to daemon after {:?}", start.elapsed());
                    return Ok(stream);
                }
                Err(_) => {
                    if start.elapsed() > DAEMON_STARTUP_TIMEOUT {
                        bail!(
                            "daemon failed to start within {:?}",
                            DAEMON_STARTUP_TIMEOUT
                        );
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Send a request and wait for its response.
    pub async fn request(&mut self, request: Request) -> Result<Response> {
        self.request_with_timeout(request, REQUEST_TIMEOUT).await
    }

    /// Send a request with a custom timeout.
    pub async fn request_with_timeout(
        &mut self,
        request: Request,
        limit: Duration,
    ) -> Result<Response> {
        let payload = serde_json::to_string(&request).context("failed to serialize request")?;

        timeout(limit, async {
            self.stream
                .write_all(payload.as_bytes())
                .await
                .context("failed to send request")?;
            self.stream
                .write_all(b"\n")
                .await
                .context("failed to send newline")?;
            self.stream.flush().await.context("failed to flush")?;

            let mut reader = BufReader::new(&mut self.stream);
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .context("failed to read response")?;
            if n == 0 {
                bail!("daemon closed the connection");
            }

            serde_json::from_str(line.trim()).context("malformed response from daemon")
        })
        .await
        .with_context(|| format!("daemon did not respond within {:?}", limit))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::engine::EngineLaunch;
    use crate::daemon::host::testing::RecordingHost;
    use crate::daemon::server::DaemonServer;
    use crate::daemon::supervisor::{Supervisor, SupervisorConfig};
    use kinetic_core::mapping::GestureMap;
    use kinetic_core::protocol::{Command, EngineState, ResponseData};

    #[tokio::test]
    async fn test_client_requests_against_a_running_daemon() {
        let dir = std::env::temp_dir().join(format!("kinetic-client-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let socket_path = dir.join("kineticd.sock");
        let pid_path = dir.join("kineticd.pid");

        let config = SupervisorConfig::new(
            EngineLaunch {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "sleep 30".to_string()],
            },
            GestureMap::default(),
            dir.join("preview.jpg"),
        );
        let supervisor = Supervisor::spawn(RecordingHost::default(), config);
        let server = DaemonServer::bind_to(socket_path.clone(), pid_path, supervisor)
            .await
            .expect("bind server");
        let server_handle = tokio::spawn(async move { server.run().await });

        // Connect directly, bypassing auto-start: the daemon is already up
        // on this temp socket.
        let stream = UnixStream::connect(&socket_path).await.expect("connect");
        let mut client = DaemonClient { stream };

        let response = client
            .request(Request {
                id: "client-test-1".to_string(),
                command: Command::Status,
            })
            .await
            .expect("request");
        assert!(response.success);
        assert_eq!(response.id, "client-test-1");
        match response.data {
            Some(ResponseData::Status(report)) => {
                assert_eq!(report.state, EngineState::Stopped);
                assert!(report.session.is_none());
            }
            other => panic!("unexpected data: {:?}", other),
        }

        // Same connection serves a second request.
        let response = client
            .request(Request {
                id: "client-test-2".to_string(),
                command: Command::SelectionChanged { selected: true },
            })
            .await
            .expect("second request");
        assert!(response.success);
        assert_eq!(response.id, "client-test-2");

        server_handle.abort();
    }
}
