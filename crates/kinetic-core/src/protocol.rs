//! Control protocol between the host/CLI and the daemon.
//!
//! One JSON request per line over the control socket, one JSON response
//! back. Distinct from the engine wire protocol in [`crate::codec`]: this
//! is how sessions are started and observed, not how the engine reports
//! events.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// A request from the host or CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: Command,
}

/// Commands the daemon can execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Start an engine session with the selected tracking modes.
    Start {
        modes: Vec<String>,
        #[serde(default)]
        debug: bool,
        /// Workspace root for the guarded repository push.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace: Option<String>,
    },
    /// Stop the running engine session. Idempotent.
    Stop,
    /// Report supervisor and session state.
    Status,
    /// Forward an editor selection change to the engine.
    SelectionChanged { selected: bool },
    /// Shut the daemon down gracefully.
    Shutdown,
}

/// A response from the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    pub fn success(id: impl Into<String>, data: ResponseData) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: ApiError) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Response payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// An engine session was started.
    Started { session: SessionInfo },
    /// Supervisor status report.
    Status(StatusReport),
    /// Generic success message.
    Ok { message: String },
}

/// Engine process lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Crashed,
}

/// Information about the active engine session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    /// Accepted mode identifiers, as requested.
    pub modes: Vec<String>,
    /// Derived detector capabilities, launch order.
    pub capabilities: Vec<String>,
    pub started_at: String,
}

/// The daemon's answer to a status request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: EngineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    pub awaiting_confirmation: bool,
    /// Human-readable report of the most recent crash, cleared on the
    /// next successful start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_crash: Option<String>,
}
