//! Gesture-to-command mapping: fixed defaults plus user overrides.
//!
//! Tab navigation and file creation are wired to fixed host commands and
//! cannot be overridden. Every other gesture id resolves through the
//! user's mappings table; an unmapped gesture is a silent no-op. Custom
//! command ids are validated lazily at dispatch time, not at load time,
//! so one bad entry never blocks the rest of the table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A host command bound to a gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl Binding {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: None,
        }
    }
}

/// Where a resolved binding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Fixed,
    Custom,
}

/// Built-in gesture bindings. Unconditional and not overridable.
const FIXED: &[(&str, &str)] = &[
    ("swipe_left", "workbench.action.previousEditor"),
    ("swipe_right", "workbench.action.nextEditor"),
    ("clap", "workbench.action.files.newUntitledFile"),
];

/// The effective mapping table for a daemon lifetime.
#[derive(Debug, Clone, Default)]
pub struct GestureMap {
    custom: HashMap<String, Binding>,
}

impl GestureMap {
    /// Build a table over the user's custom bindings.
    pub fn with_custom(custom: HashMap<String, Binding>) -> Self {
        Self { custom }
    }

    /// Resolve a gesture id to its binding. Fixed entries shadow custom
    /// ones; `None` means the gesture dispatches nothing.
    pub fn resolve(&self, gesture: &str) -> Option<(Binding, Origin)> {
        if let Some((_, command)) = FIXED.iter().find(|(id, _)| *id == gesture) {
            return Some((Binding::command(*command), Origin::Fixed));
        }
        self.custom
            .get(gesture)
            .map(|binding| (binding.clone(), Origin::Custom))
    }

    /// Fixed entries followed by custom ones, for display.
    pub fn entries(&self) -> Vec<(String, Binding, Origin)> {
        let mut entries: Vec<_> = FIXED
            .iter()
            .map(|(id, command)| (id.to_string(), Binding::command(*command), Origin::Fixed))
            .collect();
        let mut custom: Vec<_> = self
            .custom
            .iter()
            .filter(|(id, _)| FIXED.iter().all(|(fixed, _)| fixed != &id.as_str()))
            .map(|(id, binding)| (id.clone(), binding.clone(), Origin::Custom))
            .collect();
        custom.sort_by(|a, b| a.0.cmp(&b.0));
        entries.extend(custom);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fixed_defaults_resolve() {
        let map = GestureMap::default();
        let (binding, origin) = map.resolve("swipe_left").unwrap();
        assert_eq!(binding.command, "workbench.action.previousEditor");
        assert_eq!(origin, Origin::Fixed);
        let (binding, _) = map.resolve("clap").unwrap();
        assert_eq!(binding.command, "workbench.action.files.newUntitledFile");
    }

    #[test]
    fn test_unmapped_gesture_resolves_nothing() {
        let map = GestureMap::default();
        assert!(map.resolve("fist").is_none());
    }

    #[test]
    fn test_custom_binding_resolves() {
        let mut custom = HashMap::new();
        custom.insert(
            "fist".to_string(),
            Binding {
                command: "workbench.action.terminal.toggleTerminal".to_string(),
                args: Some(json!({"cwd": "/tmp"})),
            },
        );
        let map = GestureMap::with_custom(custom);
        let (binding, origin) = map.resolve("fist").unwrap();
        assert_eq!(origin, Origin::Custom);
        assert_eq!(binding.command, "workbench.action.terminal.toggleTerminal");
        assert_eq!(binding.args, Some(json!({"cwd": "/tmp"})));
    }

    #[test]
    fn test_fixed_entries_shadow_custom() {
        let mut custom = HashMap::new();
        custom.insert("swipe_left".to_string(), Binding::command("evil.command"));
        let map = GestureMap::with_custom(custom);
        let (binding, origin) = map.resolve("swipe_left").unwrap();
        assert_eq!(origin, Origin::Fixed);
        assert_eq!(binding.command, "workbench.action.previousEditor");
    }

    #[test]
    fn test_mappings_file_shape() {
        // The shape users write in mappings.json.
        let raw = r#"{
            "fist": {"command": "editor.action.formatDocument"},
            "open_palm": {"command": "workbench.action.showCommands", "args": null}
        }"#;
        let custom: HashMap<String, Binding> = serde_json::from_str(raw).unwrap();
        let map = GestureMap::with_custom(custom);
        let (binding, _) = map.resolve("fist").unwrap();
        assert_eq!(binding.command, "editor.action.formatDocument");
    }

    #[test]
    fn test_entries_lists_fixed_then_custom() {
        let mut custom = HashMap::new();
        custom.insert("fist".to_string(), Binding::command("a.b"));
        custom.insert("swipe_left".to_string(), Binding::command("shadowed"));
        let map = GestureMap::with_custom(custom);
        let entries = map.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].0, "swipe_left");
        assert_eq!(entries[0].2, Origin::Fixed);
        assert_eq!(entries[3].0, "fist");
        assert_eq!(entries[3].2, Origin::Custom);
    }
}
