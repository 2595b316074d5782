//! Routing decoded gestures and actions to host effects.
//!
//! Fixed gestures dispatch unconditionally; customizable ones resolve
//! through the user's mappings table with lazy validation, so a bad
//! entry surfaces when (and only when) its gesture fires. A failed
//! dispatch is reported and the session keeps running.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Context;
use regex::Regex;
use thiserror::Error;

use kinetic_core::codec::EngineAction;
use kinetic_core::mapping::{Binding, GestureMap, Origin};

use crate::daemon::host::Host;
use crate::daemon::paths;

/// Host command invoked for `{"action":"copy"}`.
pub const COPY_COMMAND: &str = "editor.action.clipboardCopyAction";
/// Host command invoked for `{"action":"paste"}`.
pub const PASTE_COMMAND: &str = "editor.action.clipboardPasteAction";
/// Host command invoked for `{"action":"undo"}`.
pub const UNDO_COMMAND: &str = "undo";

/// Command ids follow the editor's dotted-identifier grammar.
fn command_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.:-]*$").expect("static pattern"))
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("gesture '{gesture}' is bound to invalid command id '{command}'")]
    InvalidCommand { gesture: String, command: String },
    #[error("command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },
}

/// Dispatch a recognized gesture. `Ok(false)` means nothing is bound to
/// it; per the mapping contract that is a silent no-op, not an error.
pub async fn dispatch_gesture<H: Host>(
    host: &H,
    map: &GestureMap,
    gesture: &str,
) -> Result<bool, DispatchError> {
    let Some((binding, origin)) = map.resolve(gesture) else {
        return Ok(false);
    };
    if origin == Origin::Custom && !command_id_pattern().is_match(&binding.command) {
        return Err(DispatchError::InvalidCommand {
            gesture: gesture.to_string(),
            command: binding.command,
        });
    }
    host.execute(&binding.command, binding.args.as_ref())
        .await
        .map_err(|e| DispatchError::CommandFailed {
            command: binding.command.clone(),
            message: format!("{:#}", e),
        })?;
    Ok(true)
}

/// Dispatch a direct clipboard/editor action.
pub async fn dispatch_action<H: Host>(host: &H, action: &EngineAction) -> Result<(), DispatchError> {
    let command = match action {
        EngineAction::Copy => COPY_COMMAND,
        EngineAction::Paste => PASTE_COMMAND,
        EngineAction::Undo => UNDO_COMMAND,
        _ => return Ok(()),
    };
    host.execute(command, None)
        .await
        .map_err(|e| DispatchError::CommandFailed {
            command: command.to_string(),
            message: format!("{:#}", e),
        })
}

/// Load the user's custom gesture bindings from the mappings file. A
/// missing file is an empty table; a malformed one is an error so a typo
/// doesn't silently disable every custom gesture.
pub fn load_gesture_map() -> anyhow::Result<GestureMap> {
    let path = paths::mappings_path();
    match std::fs::read_to_string(&path) {
        Ok(raw) => {
            let custom: HashMap<String, Binding> = serde_json::from_str(&raw)
                .with_context(|| format!("malformed mappings file {}", path.display()))?;
            Ok(GestureMap::with_custom(custom))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GestureMap::default()),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::host::testing::RecordingHost;
    use serde_json::json;
    use std::collections::HashMap;

    fn custom_map(entries: &[(&str, &str)]) -> GestureMap {
        let custom: HashMap<String, Binding> = entries
            .iter()
            .map(|(gesture, command)| (gesture.to_string(), Binding::command(*command)))
            .collect();
        GestureMap::with_custom(custom)
    }

    #[tokio::test]
    async fn test_fixed_gesture_dispatches() {
        let host = RecordingHost::default();
        let dispatched = dispatch_gesture(&host, &GestureMap::default(), "swipe_right")
            .await
            .unwrap();
        assert!(dispatched);
        assert_eq!(
            host.executed(),
            vec![("workbench.action.nextEditor".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_unmapped_gesture_is_a_silent_noop() {
        let host = RecordingHost::default();
        let dispatched = dispatch_gesture(&host, &GestureMap::default(), "fist")
            .await
            .unwrap();
        assert!(!dispatched);
        assert!(host.executed().is_empty());
    }

    #[tokio::test]
    async fn test_custom_gesture_passes_args() {
        let mut custom = HashMap::new();
        custom.insert(
            "fist".to_string(),
            Binding {
                command: "workbench.action.tasks.runTask".to_string(),
                args: Some(json!("build")),
            },
        );
        let host = RecordingHost::default();
        dispatch_gesture(&host, &GestureMap::with_custom(custom), "fist")
            .await
            .unwrap();
        assert_eq!(
            host.executed(),
            vec![(
                "workbench.action.tasks.runTask".to_string(),
                Some(json!("build"))
            )]
        );
    }

    #[tokio::test]
    async fn test_invalid_command_id_is_rejected_before_invocation() {
        let host = RecordingHost::default();
        let map = custom_map(&[("fist", "rm -rf /")]);
        let err = dispatch_gesture(&host, &map, "fist").await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidCommand { .. }));
        assert!(host.executed().is_empty());
    }

    #[tokio::test]
    async fn test_failed_command_reports_but_is_not_fatal() {
        let host = RecordingHost::default();
        host.fail_command("broken.command");
        let map = custom_map(&[("fist", "broken.command")]);
        let err = dispatch_gesture(&host, &map, "fist").await.unwrap_err();
        assert!(matches!(err, DispatchError::CommandFailed { .. }));
        // The failure is an error value, not a panic or teardown; a later
        // dispatch on the same host still works.
        assert!(dispatch_gesture(&host, &map, "swipe_left").await.unwrap());
    }

    #[tokio::test]
    async fn test_clipboard_actions_map_to_host_commands() {
        let host = RecordingHost::default();
        dispatch_action(&host, &EngineAction::Copy).await.unwrap();
        dispatch_action(&host, &EngineAction::Paste).await.unwrap();
        dispatch_action(&host, &EngineAction::Undo).await.unwrap();
        let commands: Vec<String> = host.executed().into_iter().map(|(c, _)| c).collect();
        assert_eq!(commands, vec![COPY_COMMAND, PASTE_COMMAND, UNDO_COMMAND]);
    }

    #[tokio::test]
    async fn test_unknown_action_dispatches_nothing() {
        let host = RecordingHost::default();
        dispatch_action(&host, &EngineAction::Other("spotify_play".into()))
            .await
            .unwrap();
        assert!(host.executed().is_empty());
    }
}
