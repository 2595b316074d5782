//! Reversible host settings: capture a baseline, guarantee restoration.
//!
//! A mode that mutates host state (posture tracking shrinking the font)
//! captures the setting's pre-session value exactly once, tracks what it
//! applies, and hands the baseline back exactly once at teardown.
//! Restoration is idempotent: ending an already-ended session yields
//! nothing, so a double teardown can never clobber the restored value.

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone)]
struct Held {
    baseline: Value,
    current: Value,
}

/// Tracks one baseline per setting key. Nested sessions for the same key
/// do not stack; the first captured baseline wins.
#[derive(Debug, Default)]
pub struct ReversibleSettings {
    held: HashMap<String, Held>,
}

impl ReversibleSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `current` as the baseline for `key` unless one is already
    /// held. Returns whether a new baseline was captured.
    pub fn begin(&mut self, key: &str, current: Value) -> bool {
        if self.held.contains_key(key) {
            return false;
        }
        self.held.insert(
            key.to_string(),
            Held {
                baseline: current.clone(),
                current,
            },
        );
        true
    }

    /// Record an applied mutation. Returns false (and records nothing)
    /// when no session is active for `key`.
    pub fn apply(&mut self, key: &str, value: Value) -> bool {
        match self.held.get_mut(key) {
            Some(held) => {
                held.current = value;
                true
            }
            None => false,
        }
    }

    /// The captured baseline for `key`, if a session holds one.
    pub fn baseline(&self, key: &str) -> Option<&Value> {
        self.held.get(key).map(|h| &h.baseline)
    }

    /// The most recently applied value for `key`.
    pub fn current(&self, key: &str) -> Option<&Value> {
        self.held.get(key).map(|h| &h.current)
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }

    /// End the session for `key`, yielding the baseline to restore.
    /// Safe with no active session; every call after the first yields
    /// `None`.
    pub fn end(&mut self, key: &str) -> Option<Value> {
        self.held.remove(key).map(|h| h.baseline)
    }

    /// Drain every held baseline. The supervisor teardown path restores
    /// each returned pair.
    pub fn end_all(&mut self) -> Vec<(String, Value)> {
        self.held
            .drain()
            .map(|(key, held)| (key, held.baseline))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_baseline_captured_once() {
        let mut settings = ReversibleSettings::new();
        assert!(settings.begin("editor.fontSize", json!(14)));
        // A nested begin does not stack or replace.
        assert!(!settings.begin("editor.fontSize", json!(8)));
        assert_eq!(settings.baseline("editor.fontSize"), Some(&json!(14)));
    }

    #[test]
    fn test_end_restores_exactly_once() {
        let mut settings = ReversibleSettings::new();
        settings.begin("editor.fontSize", json!(14));
        settings.apply("editor.fontSize", json!(8));
        assert_eq!(settings.end("editor.fontSize"), Some(json!(14)));
        // Idempotent: further ends change nothing.
        assert_eq!(settings.end("editor.fontSize"), None);
        assert_eq!(settings.end("editor.fontSize"), None);
    }

    #[test]
    fn test_end_without_session_is_noop() {
        let mut settings = ReversibleSettings::new();
        assert_eq!(settings.end("editor.fontSize"), None);
    }

    #[test]
    fn test_apply_requires_active_session() {
        let mut settings = ReversibleSettings::new();
        assert!(!settings.apply("editor.fontSize", json!(8)));
        settings.begin("editor.fontSize", json!(14));
        assert!(settings.apply("editor.fontSize", json!(8)));
        assert_eq!(settings.current("editor.fontSize"), Some(&json!(8)));
        assert_eq!(settings.baseline("editor.fontSize"), Some(&json!(14)));
    }

    #[test]
    fn test_end_all_drains_every_key() {
        let mut settings = ReversibleSettings::new();
        settings.begin("editor.fontSize", json!(14));
        settings.begin("workbench.colorTheme", json!("Default Dark"));
        let mut restored = settings.end_all();
        restored.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            restored,
            vec![
                ("editor.fontSize".to_string(), json!(14)),
                ("workbench.colorTheme".to_string(), json!("Default Dark")),
            ]
        );
        assert!(settings.end_all().is_empty());
    }

    #[test]
    fn test_many_applies_do_not_disturb_baseline() {
        let mut settings = ReversibleSettings::new();
        settings.begin("editor.fontSize", json!(14));
        for size in [8, 10, 8, 12, 8] {
            settings.apply("editor.fontSize", json!(size));
        }
        assert_eq!(settings.end("editor.fontSize"), Some(json!(14)));
    }
}
