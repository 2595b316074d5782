//! The supervisor actor owning all engine session state.
//!
//! One task owns the child process handle, the capability set, the
//! confirmation machine, and the reversible-setting baselines. Control
//! requests, engine output chunks, EOF, and confirmation-deadline timers
//! all arrive on one channel and are processed strictly in order, so a
//! chunk's messages are fully dispatched before the next message and a
//! timer can never race a late confirm. Stopping is synchronous inside
//! the actor: by the time a stop reply goes out, the child is reaped and
//! host state restored.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use kinetic_core::capability::{compose, Capability, CapabilitySet, Mode};
use kinetic_core::codec::{encode, EngineAction, HostSignal, LineDecoder, Posture, WireMessage};
use kinetic_core::confirm::{Armed, Confirmation, ConfirmableAction, CONFIRM_WINDOW};
use kinetic_core::error::ApiError;
use kinetic_core::mapping::GestureMap;
use kinetic_core::protocol::{EngineState, SessionInfo, StatusReport};
use kinetic_core::settings::ReversibleSettings;

use crate::daemon::dispatch;
use crate::daemon::engine::{EngineLaunch, EngineProcess};
use crate::daemon::frame::FrameSink;
use crate::daemon::host::{Host, Notice};

/// Host setting temporarily mutated while posture tracking is active.
pub const FONT_SIZE_KEY: &str = "editor.fontSize";

/// Font size applied while the user is slouching.
const SLOUCH_FONT_SIZE: i64 = 8;

/// Baseline used when the host has no explicit font size configured.
const DEFAULT_FONT_SIZE: i64 = 14;

/// Grace period between SIGTERM and SIGKILL when stopping the engine.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Supervisor queue depth; engine output chunks dominate the traffic.
const CHANNEL_CAPACITY: usize = 256;

/// Messages processed by the supervisor actor, in arrival order.
#[derive(Debug)]
pub enum SupervisorMsg {
    Start {
        modes: Vec<String>,
        debug: bool,
        workspace: Option<PathBuf>,
        reply: oneshot::Sender<Result<SessionInfo, ApiError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    SelectionChanged {
        selected: bool,
    },
    /// A stdout chunk from the engine spawned at `epoch`.
    EngineOutput {
        epoch: u64,
        chunk: Vec<u8>,
    },
    /// The engine's stdout closed.
    EngineEof {
        epoch: u64,
    },
    /// The confirmation deadline armed at `generation` elapsed.
    ConfirmDeadline {
        generation: u64,
    },
}

/// Cheap, clonable front for the supervisor actor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorMsg>,
}

impl SupervisorHandle {
    pub async fn start(
        &self,
        modes: Vec<String>,
        debug: bool,
        workspace: Option<PathBuf>,
    ) -> Result<SessionInfo, ApiError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SupervisorMsg::Start {
                modes,
                debug,
                workspace,
                reply,
            })
            .await
            .map_err(|_| ApiError::internal("supervisor is not running"))?;
        rx.await
            .map_err(|_| ApiError::internal("supervisor dropped the request"))?
    }

    pub async fn stop(&self) -> Result<(), ApiError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SupervisorMsg::Stop { reply })
            .await
            .map_err(|_| ApiError::internal("supervisor is not running"))?;
        rx.await
            .map_err(|_| ApiError::internal("supervisor dropped the request"))
    }

    pub async fn status(&self) -> Result<StatusReport, ApiError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SupervisorMsg::Status { reply })
            .await
            .map_err(|_| ApiError::internal("supervisor is not running"))?;
        rx.await
            .map_err(|_| ApiError::internal("supervisor dropped the request"))
    }

    /// Fire-and-forget: selection changes are advisory.
    pub async fn selection_changed(&self, selected: bool) {
        if self
            .tx
            .send(SupervisorMsg::SelectionChanged { selected })
            .await
            .is_err()
        {
            debug!("selection change dropped, supervisor not running");
        }
    }
}

/// Supervisor construction parameters.
pub struct SupervisorConfig {
    pub launch: EngineLaunch,
    pub map: GestureMap,
    pub frame_path: PathBuf,
    /// Confirmation window for guarded actions.
    pub confirm_window: Duration,
}

impl SupervisorConfig {
    pub fn new(launch: EngineLaunch, map: GestureMap, frame_path: PathBuf) -> Self {
        Self {
            launch,
            map,
            frame_path,
            confirm_window: CONFIRM_WINDOW,
        }
    }
}

/// Everything owned for one engine session, dropped together on teardown.
struct EngineSession {
    info: SessionInfo,
    capabilities: CapabilitySet,
    workspace: PathBuf,
    epoch: u64,
    process: EngineProcess,
}

/// Why a session ended; selects the teardown log line.
#[derive(Debug)]
enum SessionEnd {
    Stopped,
    Crashed,
    EngineError,
}

pub struct Supervisor<H: Host> {
    rx: mpsc::Receiver<SupervisorMsg>,
    tx: mpsc::Sender<SupervisorMsg>,
    host: Arc<H>,
    config: SupervisorConfig,
    frames: FrameSink,
    state: EngineState,
    session: Option<EngineSession>,
    /// Spawn counter; output tagged with an older epoch is stale.
    epoch: u64,
    last_crash: Option<String>,
    decoder: LineDecoder,
    settings: ReversibleSettings,
    confirm: ConfirmableAction,
}

impl<H: Host> Supervisor<H> {
    /// Spawn the supervisor actor and return its handle.
    pub fn spawn(host: H, config: SupervisorConfig) -> SupervisorHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let frames = FrameSink::new(config.frame_path.clone());
        let confirm = ConfirmableAction::with_window(config.confirm_window);
        let actor = Supervisor {
            rx,
            tx: tx.clone(),
            host: Arc::new(host),
            config,
            frames,
            state: EngineState::Stopped,
            session: None,
            epoch: 0,
            last_crash: None,
            decoder: LineDecoder::new(),
            settings: ReversibleSettings::new(),
            confirm,
        };
        tokio::spawn(actor.run());
        SupervisorHandle { tx }
    }

    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                SupervisorMsg::Start {
                    modes,
                    debug,
                    workspace,
                    reply,
                } => {
                    let result = self.handle_start(modes, debug, workspace).await;
                    let _ = reply.send(result);
                }
                SupervisorMsg::Stop { reply } => {
                    self.handle_stop().await;
                    let _ = reply.send(());
                }
                SupervisorMsg::Status { reply } => {
                    let _ = reply.send(self.status_report());
                }
                SupervisorMsg::SelectionChanged { selected } => {
                    self.handle_selection(selected).await;
                }
                SupervisorMsg::EngineOutput { epoch, chunk } => {
                    self.handle_output(epoch, chunk).await;
                }
                SupervisorMsg::EngineEof { epoch } => {
                    self.handle_engine_eof(epoch).await;
                }
                SupervisorMsg::ConfirmDeadline { generation } => {
                    self.handle_deadline(generation);
                }
            }
        }
        debug!("supervisor channel closed, actor exiting");
    }

    /// Start a session. A running engine is fully stopped first, so at
    /// most one process exists at any instant and the two never contend
    /// for the capture device.
    async fn handle_start(
        &mut self,
        modes: Vec<String>,
        debug: bool,
        workspace: Option<PathBuf>,
    ) -> Result<SessionInfo, ApiError> {
        if self.session.is_some() {
            info!("stopping running engine before new start");
            self.stop_and_teardown(SessionEnd::Stopped).await;
        }

        let mut accepted = Vec::new();
        let mut parsed = Vec::new();
        for raw in &modes {
            match Mode::parse(raw) {
                Some(mode) => {
                    parsed.push(mode);
                    accepted.push(mode.to_string());
                }
                None => warn!("ignoring unknown mode '{}'", raw),
            }
        }
        let capabilities = compose(&parsed);
        if capabilities.is_empty() {
            return Err(ApiError::no_modes(&modes));
        }

        let workspace = workspace
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let argv = self.config.launch.argv(&capabilities, debug);
        self.epoch += 1;
        let process = match EngineProcess::spawn(
            &self.config.launch.program,
            &argv,
            self.epoch,
            self.tx.clone(),
        ) {
            Ok(process) => process,
            Err(e) => {
                // Reported once, never retried; the mode stays stopped.
                self.state = EngineState::Stopped;
                self.host
                    .notify(Notice::Error, &format!("failed to launch engine: {:#}", e));
                return Err(ApiError::spawn_failed(
                    &self.config.launch.program,
                    &e.to_string(),
                ));
            }
        };

        self.decoder.reset();
        self.last_crash = None;
        self.state = EngineState::Starting;

        if capabilities.contains(Capability::Posture) {
            self.capture_font_baseline().await;
        }

        let info = SessionInfo {
            id: uuid::Uuid::new_v4().to_string(),
            modes: accepted,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            started_at: Utc::now().to_rfc3339(),
        };
        info!(session = %info.id, capabilities = ?info.capabilities, "engine starting");
        self.session = Some(EngineSession {
            info: info.clone(),
            capabilities,
            workspace,
            epoch: self.epoch,
            process,
        });
        Ok(info)
    }

    /// Explicit stop. Idempotent: stopping a stopped supervisor is a
    /// no-op, and the resulting clean exit is never reported as a crash.
    async fn handle_stop(&mut self) {
        if self.session.is_none() {
            debug!("stop requested with no active session");
            return;
        }
        self.stop_and_teardown(SessionEnd::Stopped).await;
    }

    /// Kill and reap the current process, then run the common teardown.
    async fn stop_and_teardown(&mut self, reason: SessionEnd) {
        if let Some(session) = self.session.take() {
            let status = session.process.shutdown(STOP_GRACE).await;
            debug!(?status, "engine exited");
        }
        self.teardown(reason).await;
    }

    /// Common teardown: restore reversible settings, disarm the confirm
    /// machine (stranding its timer), clear the preview, forget partial
    /// protocol data. Runs on every session end so no state leaks into
    /// the next session.
    async fn teardown(&mut self, reason: SessionEnd) {
        for (key, baseline) in self.settings.end_all() {
            if let Err(e) = self.host.write_setting(&key, &baseline).await {
                warn!("failed to restore setting {}: {:#}", key, e);
            }
        }
        if self.confirm.cancel() {
            debug!("pending confirmation cancelled by teardown");
        }
        self.frames.clear();
        self.decoder.reset();
        self.state = EngineState::Stopped;
        match reason {
            SessionEnd::Stopped => info!("session stopped"),
            SessionEnd::Crashed => info!("session torn down after crash"),
            SessionEnd::EngineError => info!("session torn down after engine error"),
        }
    }

    async fn capture_font_baseline(&mut self) {
        match self.host.read_setting(FONT_SIZE_KEY).await {
            Ok(value) => {
                let current = value.unwrap_or_else(|| Value::from(DEFAULT_FONT_SIZE));
                self.settings.begin(FONT_SIZE_KEY, current);
            }
            Err(e) => {
                self.host.notify(
                    Notice::Warning,
                    &format!(
                        "could not read {}: {:#}; posture font control disabled",
                        FONT_SIZE_KEY, e
                    ),
                );
            }
        }
    }

    async fn handle_output(&mut self, epoch: u64, chunk: Vec<u8>) {
        if self.session.as_ref().map(|s| s.epoch) != Some(epoch) {
            debug!("dropping output from stale engine (epoch {})", epoch);
            return;
        }
        for message in self.decoder.feed(&chunk) {
            self.route(message).await;
            if self.session.is_none() {
                // An error message tore the session down mid-chunk.
                break;
            }
        }
    }

    async fn route(&mut self, message: WireMessage) {
        match message {
            WireMessage::Status(status) => self.handle_status_message(&status),
            WireMessage::Gesture(gesture) => self.handle_gesture(&gesture).await,
            WireMessage::Posture(posture) => self.handle_posture(posture).await,
            WireMessage::Action(action) => self.handle_action(action).await,
            WireMessage::Frame(frame) => {
                if let Err(e) = self.frames.push(&frame) {
                    warn!("failed to publish preview frame: {:#}", e);
                }
            }
            WireMessage::Error(message) => {
                self.host
                    .notify(Notice::Error, &format!("engine error: {}", message));
                self.stop_and_teardown(SessionEnd::EngineError).await;
            }
        }
    }

    fn handle_status_message(&mut self, status: &str) {
        if status == "ready" || status.ends_with("_ready") {
            if self.state == EngineState::Starting {
                self.state = EngineState::Running;
                self.host.notify(Notice::Info, "engine ready");
            }
        } else if status == "awaiting_confirmation" {
            debug!("engine echoed awaiting_confirmation");
        } else {
            debug!("engine status: {}", status);
        }
    }

    async fn handle_gesture(&mut self, gesture: &str) {
        match dispatch::dispatch_gesture(self.host.as_ref(), &self.config.map, gesture).await {
            Ok(true) => debug!("dispatched gesture '{}'", gesture),
            Ok(false) => debug!("no mapping for gesture '{}'", gesture),
            Err(e) => {
                // Dispatch failures are session-local: report and move on.
                warn!("{}", e);
                self.host.notify(Notice::Warning, &e.to_string());
            }
        }
    }

    async fn handle_posture(&mut self, posture: Posture) {
        if !self.settings.is_active(FONT_SIZE_KEY) {
            return;
        }
        let target = match posture {
            Posture::Slouch => Value::from(SLOUCH_FONT_SIZE),
            Posture::Upright => match self.settings.baseline(FONT_SIZE_KEY) {
                Some(baseline) => baseline.clone(),
                None => return,
            },
        };
        self.settings.apply(FONT_SIZE_KEY, target.clone());
        if let Err(e) = self.host.write_setting(FONT_SIZE_KEY, &target).await {
            warn!("failed to apply {}: {:#}", FONT_SIZE_KEY, e);
        }
    }

    async fn handle_action(&mut self, action: EngineAction) {
        match action {
            EngineAction::GitPushTrigger => self.handle_push_trigger(),
            EngineAction::Cancel => {
                if self.confirm.cancel() {
                    self.host.notify(Notice::Info, "repository push cancelled");
                }
            }
            EngineAction::Copy | EngineAction::Paste | EngineAction::Undo => {
                if let Err(e) = dispatch::dispatch_action(self.host.as_ref(), &action).await {
                    warn!("{}", e);
                    self.host.notify(Notice::Warning, &e.to_string());
                }
            }
            EngineAction::Other(name) => debug!("ignoring unrecognized action '{}'", name),
        }
    }

    /// First trigger arms the machine; a second inside the window
    /// confirms. The push itself runs detached so a slow remote never
    /// stalls event processing, and the machine guarantees it runs at
    /// most once per trigger.
    fn handle_push_trigger(&mut self) {
        let now = Instant::now();
        match self.confirm.confirm(now) {
            Confirmation::Confirmed => {
                self.host
                    .notify(Notice::Info, "push confirmed, running repository push");
                self.run_guarded_push();
            }
            Confirmation::Expired => {
                self.host
                    .notify(Notice::Info, "push confirmation window elapsed");
            }
            Confirmation::NotArmed => {
                let armed = self.confirm.trigger(now);
                self.arm_deadline_timer(armed);
                self.host.notify(
                    Notice::Info,
                    "push requested, repeat the gesture to confirm",
                );
            }
        }
    }

    fn arm_deadline_timer(&self, armed: Armed) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(armed.deadline)).await;
            let _ = tx
                .send(SupervisorMsg::ConfirmDeadline {
                    generation: armed.generation,
                })
                .await;
        });
    }

    fn run_guarded_push(&self) {
        let Some(session) = &self.session else { return };
        let host = Arc::clone(&self.host);
        let workspace = session.workspace.clone();
        tokio::spawn(async move {
            match host.push_repository(&workspace).await {
                Ok(()) => host.notify(Notice::Info, "repository push complete"),
                Err(e) => {
                    host.notify(Notice::Error, &format!("repository push failed: {:#}", e))
                }
            }
        });
    }

    fn handle_deadline(&mut self, generation: u64) {
        // A stale generation means the trigger was already resolved;
        // the machine makes the late firing a no-op.
        if self.confirm.expire(generation) {
            self.host
                .notify(Notice::Info, "push not confirmed in time, aborted");
        }
    }

    async fn handle_selection(&mut self, selected: bool) {
        let Some(session) = &self.session else { return };
        if !session.capabilities.contains(Capability::CopyPaste) {
            return;
        }
        match encode(&HostSignal::SelectionChanged {
            has_selection: selected,
        }) {
            Ok(record) => {
                if let Err(e) = session.process.write(record).await {
                    warn!("failed to forward selection change: {:#}", e);
                }
            }
            Err(e) => warn!("failed to encode selection change: {}", e),
        }
    }

    /// Unexpected EOF on the engine's stdout. An explicit stop reaps the
    /// child before its EOF message is handled, so reaching here with a
    /// live session means nobody asked for this exit: it's a crash,
    /// whatever the exit code.
    async fn handle_engine_eof(&mut self, epoch: u64) {
        if self.session.as_ref().map(|s| s.epoch) != Some(epoch) {
            return;
        }
        let Some(session) = self.session.take() else {
            return;
        };
        let status = session.process.shutdown(STOP_GRACE).await;
        self.state = EngineState::Crashed;
        let message = match status.and_then(|s| s.code()) {
            Some(code) => format!("engine exited unexpectedly (exit code {})", code),
            None => "engine exited unexpectedly (killed by signal)".to_string(),
        };
        self.host.notify(Notice::Error, &message);
        self.last_crash = Some(message);
        self.teardown(SessionEnd::Crashed).await;
    }

    fn status_report(&self) -> StatusReport {
        StatusReport {
            state: self.state,
            session: self.session.as_ref().map(|s| s.info.clone()),
            awaiting_confirmation: self.confirm.is_armed(),
            last_crash: self.last_crash.clone(),
        }
    }
}
