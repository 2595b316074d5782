//! Engine child process: launch arguments and async stdio plumbing.
//!
//! The engine is a plain piped child process speaking the wire protocol
//! on stdout/stdin. Reading, stderr logging, and stdin writing each run
//! in their own task; everything the process emits funnels into the
//! supervisor's message channel tagged with the spawn epoch, so output
//! from a replaced process can never be attributed to its successor.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use kinetic_core::capability::CapabilitySet;

use crate::daemon::supervisor::SupervisorMsg;

/// Buffer size for reading engine stdout.
const READ_BUFFER_SIZE: usize = 8192;

/// Queue depth for stdin records; selection changes are low-rate.
const STDIN_CHANNEL_CAPACITY: usize = 16;

/// How the engine executable is launched.
#[derive(Debug, Clone)]
pub struct EngineLaunch {
    /// Interpreter or executable, e.g. `python3`.
    pub program: String,
    /// Leading arguments, e.g. the engine script path.
    pub args: Vec<String>,
}

impl EngineLaunch {
    /// Resolve from explicit overrides, then environment. `KINETIC_ENGINE`
    /// points at the engine script; `KINETIC_PYTHON` overrides the
    /// interpreter.
    pub fn resolve(engine: Option<std::path::PathBuf>, python: Option<String>) -> Result<Self> {
        let script = match engine {
            Some(path) => path.to_string_lossy().into_owned(),
            None => std::env::var("KINETIC_ENGINE").context(
                "KINETIC_ENGINE is not set; point it at the perception engine script or pass --engine",
            )?,
        };
        let program = python
            .or_else(|| std::env::var("KINETIC_PYTHON").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "python3".to_string());
        Ok(Self {
            program,
            args: vec![script],
        })
    }

    /// Full argument vector for a session: leading args, capability
    /// flags, then the protocol and preview-window toggles.
    pub fn argv(&self, capabilities: &CapabilitySet, debug: bool) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.extend(capabilities.launch_flags());
        argv.push("--extension".to_string());
        argv.push("--debug".to_string());
        argv.push(if debug { "true" } else { "false" }.to_string());
        argv
    }
}

/// A running engine process. Owned exclusively by the supervisor actor;
/// consumed on shutdown so a handle can never outlive its child.
pub struct EngineProcess {
    child: Child,
    stdin_tx: mpsc::Sender<Vec<u8>>,
}

impl EngineProcess {
    /// Spawn the engine and wire its stdio to the supervisor channel.
    /// Output and EOF messages carry `epoch` for staleness checks.
    pub fn spawn(
        program: &str,
        args: &[String],
        epoch: u64,
        events: mpsc::Sender<SupervisorMsg>,
    ) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn engine '{}'", program))?;

        let stdout = child.stdout.take().context("engine stdout not captured")?;
        let stderr = child.stderr.take().context("engine stderr not captured")?;
        let stdin = child.stdin.take().context("engine stdin not captured")?;

        tokio::spawn(read_stdout(stdout, epoch, events));
        tokio::spawn(log_stderr(stderr));

        let (stdin_tx, stdin_rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
        tokio::spawn(write_stdin(stdin, stdin_rx));

        Ok(Self { child, stdin_tx })
    }

    /// Queue one protocol record for the engine's stdin. Records are
    /// written whole by the writer task, never interleaved.
    pub async fn write(&self, record: Vec<u8>) -> Result<()> {
        self.stdin_tx
            .send(record)
            .await
            .map_err(|_| anyhow::anyhow!("engine stdin writer has exited"))
    }

    /// Ask the engine to exit. SIGTERM first so it can release the
    /// capture device.
    fn terminate(&self) {
        if let Some(pid) = self.child.id() {
            // SAFETY: signaling a child pid we own; a stale pid yields
            // ESRCH, which is harmless here.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    /// Stop the process and reap it: SIGTERM, a grace period, then
    /// SIGKILL. Returns the exit status when the child could be reaped.
    pub async fn shutdown(mut self, grace: Duration) -> Option<ExitStatus> {
        self.terminate();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("failed to reap engine: {}", e);
                None
            }
            Err(_) => {
                warn!("engine ignored SIGTERM after {:?}, killing", grace);
                if let Err(e) = self.child.start_kill() {
                    warn!("failed to kill engine: {}", e);
                }
                match self.child.wait().await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!("failed to reap engine after kill: {}", e);
                        None
                    }
                }
            }
        }
    }
}

/// Forward stdout chunks to the supervisor, then signal EOF. Chunks are
/// delivered exactly as read; the codec owns line framing.
async fn read_stdout(mut stdout: ChildStdout, epoch: u64, events: mpsc::Sender<SupervisorMsg>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = buf[..n].to_vec();
                if events
                    .send(SupervisorMsg::EngineOutput { epoch, chunk })
                    .await
                    .is_err()
                {
                    debug!("supervisor channel closed, stdout reader exiting");
                    return;
                }
            }
            Err(e) => {
                warn!("engine stdout read error: {}", e);
                break;
            }
        }
    }
    debug!("engine stdout closed");
    let _ = events.send(SupervisorMsg::EngineEof { epoch }).await;
}

/// The engine logs diagnostics on stderr; keep them out of the protocol
/// stream but visible in the daemon log.
async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "kinetic::engine", "{}", line);
    }
}

async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(record) = rx.recv().await {
        if let Err(e) = stdin.write_all(&record).await {
            warn!("engine stdin write error: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!("engine stdin flush error: {}", e);
            break;
        }
    }
    debug!("engine stdin writer exiting");
}
