//! Engine wire protocol: newline-delimited JSON over the engine's stdio.
//!
//! The engine prints one JSON object per line on stdout. Each line carries
//! exactly one of the recognized fields (`status`, `gesture`, `posture`,
//! `action`, `frame`, `error`); lines that carry none of them, more than
//! one, or that fail to parse are dropped without disturbing the stream.
//! The decoder is stateful: output arrives in arbitrary chunks, so a
//! trailing partial line is buffered until its newline shows up.

use serde::{Deserialize, Serialize};

/// Posture classification reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posture {
    Slouch,
    Upright,
}

impl Posture {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "slouch" => Some(Posture::Slouch),
            "upright" => Some(Posture::Upright),
            _ => None,
        }
    }
}

/// A direct action requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    Copy,
    Paste,
    Undo,
    /// Guarded repository push request; feeds the confirmation machine.
    GitPushTrigger,
    /// Explicit cancel of a pending confirmation.
    Cancel,
    /// Anything else; dispatched as a no-op.
    Other(String),
}

impl EngineAction {
    fn from_name(name: &str) -> Self {
        match name {
            "copy" => EngineAction::Copy,
            "paste" => EngineAction::Paste,
            "undo" => EngineAction::Undo,
            // Older engine builds emit "git_push" for the same request.
            "git_push_trigger" | "git_push" => EngineAction::GitPushTrigger,
            "cancel" => EngineAction::Cancel,
            other => EngineAction::Other(other.to_string()),
        }
    }

    /// The wire name of this action.
    pub fn name(&self) -> &str {
        match self {
            EngineAction::Copy => "copy",
            EngineAction::Paste => "paste",
            EngineAction::Undo => "undo",
            EngineAction::GitPushTrigger => "git_push_trigger",
            EngineAction::Cancel => "cancel",
            EngineAction::Other(name) => name,
        }
    }
}

/// One decoded protocol line from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Engine lifecycle status, e.g. `ready` or `awaiting_confirmation`.
    Status(String),
    /// A discrete recognized gesture.
    Gesture(String),
    /// Posture classification change.
    Posture(Posture),
    /// A requested host-side action.
    Action(EngineAction),
    /// Base64-encoded preview frame.
    Frame(String),
    /// Fatal engine-side error; the session is torn down.
    Error(String),
}

/// Raw field view of a protocol line. Extra fields (confidence ratios,
/// debug payloads) are ignored.
#[derive(Debug, Deserialize)]
struct RawLine {
    status: Option<String>,
    gesture: Option<String>,
    posture: Option<String>,
    action: Option<String>,
    frame: Option<String>,
    error: Option<String>,
}

impl RawLine {
    /// Classify into a message if exactly one recognized field is set.
    fn classify(self) -> Option<WireMessage> {
        let set = [
            self.status.is_some(),
            self.gesture.is_some(),
            self.posture.is_some(),
            self.action.is_some(),
            self.frame.is_some(),
            self.error.is_some(),
        ]
        .iter()
        .filter(|&&b| b)
        .count();
        if set != 1 {
            return None;
        }
        if let Some(status) = self.status {
            return Some(WireMessage::Status(status));
        }
        if let Some(gesture) = self.gesture {
            return Some(WireMessage::Gesture(gesture));
        }
        if let Some(posture) = self.posture {
            return Posture::parse(&posture).map(WireMessage::Posture);
        }
        if let Some(action) = self.action {
            return Some(WireMessage::Action(EngineAction::from_name(&action)));
        }
        if let Some(frame) = self.frame {
            return Some(WireMessage::Frame(frame));
        }
        self.error.map(WireMessage::Error)
    }
}

/// Parse one newline-stripped protocol line. `None` means the line is
/// malformed or unrecognized and should be dropped.
fn parse_line(line: &[u8]) -> Option<WireMessage> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let raw: RawLine = serde_json::from_str(text).ok()?;
    raw.classify()
}

/// Stateful decoder for the engine's output stream.
///
/// `feed` accepts chunks exactly as they arrive from the pipe and emits
/// only complete, newline-terminated records; a trailing partial line is
/// carried over to the next call. No line-length limit is imposed:
/// embedded preview frames make lines arbitrarily large.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode all complete lines contained in `chunk` plus any carried
    /// partial data, in order. Malformed lines are dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<WireMessage> {
        self.buf.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(message) = parse_line(&line[..line.len() - 1]) {
                messages.push(message);
            }
        }
        messages
    }

    /// Drop buffered partial data. Called between engine sessions so a
    /// dead process's tail can never prefix the next session's stream.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// A signal written to the engine's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostSignal {
    /// The host editor's selection changed.
    SelectionChanged {
        #[serde(rename = "hasSelection")]
        has_selection: bool,
    },
}

/// Encode a signal as one newline-terminated protocol record.
pub fn encode(signal: &HostSignal) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(signal)?;
    bytes.push(b'\n');
    Ok(bytes)
}
