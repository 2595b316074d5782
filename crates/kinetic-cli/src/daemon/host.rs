//! The host editor seam: command invocation, settings, notices.
//!
//! The supervisor never talks to the editor directly; everything goes
//! through [`Host`]. The production implementation drives the editor's
//! CLI for command invocation and edits its JSON settings file for
//! reversible settings. Tests swap in a recording implementation.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::daemon::push;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Info,
    Warning,
    Error,
}

/// Host-side effects, as the supervisor sees them.
///
/// Methods return `Send` futures so the supervisor actor can run on the
/// multi-threaded runtime; implementations just write `async fn`.
pub trait Host: Send + Sync + 'static {
    /// Invoke a host editor command by id. Opaque side effect with a
    /// success/failure outcome.
    fn execute(
        &self,
        command: &str,
        args: Option<&Value>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Read a host setting. `Ok(None)` means the key has no explicit
    /// value.
    fn read_setting(&self, key: &str) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Write a host setting.
    fn write_setting(&self, key: &str, value: &Value) -> impl Future<Output = Result<()>> + Send;

    /// Run the guarded repository push sequence in `workspace`.
    fn push_repository(&self, workspace: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Surface a user-facing notice.
    fn notify(&self, notice: Notice, message: &str);
}

/// Production host: invokes the editor CLI and edits its settings file.
#[derive(Debug, Clone)]
pub struct EditorHost {
    /// Editor CLI binary, e.g. `code`.
    command: String,
    /// The editor's JSON settings file. The editor watches it and applies
    /// changes live, which is what makes settings reversible from outside.
    settings_path: PathBuf,
}

impl EditorHost {
    pub fn new(command: impl Into<String>, settings_path: PathBuf) -> Self {
        Self {
            command: command.into(),
            settings_path,
        }
    }

    /// Resolve from explicit overrides, then environment, then defaults.
    /// `KINETIC_HOST_CMD` names the editor CLI; `KINETIC_HOST_SETTINGS`
    /// points at its settings file.
    pub fn resolve(command: Option<String>, settings_path: Option<PathBuf>) -> Self {
        let command = command
            .or_else(|| std::env::var("KINETIC_HOST_CMD").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "code".to_string());
        let settings_path = settings_path
            .or_else(|| {
                std::env::var("KINETIC_HOST_SETTINGS")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("Code")
                    .join("User")
                    .join("settings.json")
            });
        Self {
            command,
            settings_path,
        }
    }

    async fn read_settings_object(&self) -> Result<Map<String, Value>> {
        let raw = match tokio::fs::read_to_string(&self.settings_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read {}", self.settings_path.display())
                })
            }
        };
        let value: Value = serde_json::from_str(&raw).with_context(|| {
            format!("malformed settings file {}", self.settings_path.display())
        })?;
        match value {
            Value::Object(map) => Ok(map),
            _ => bail!(
                "settings file {} is not a JSON object",
                self.settings_path.display()
            ),
        }
    }
}

impl Host for EditorHost {
    async fn execute(&self, command: &str, args: Option<&Value>) -> Result<()> {
        let mut invocation = tokio::process::Command::new(&self.command);
        invocation.arg("--command").arg(command);
        if let Some(args_value) = args {
            invocation.arg(serde_json::to_string(args_value)?);
        }
        let output = invocation
            .output()
            .await
            .with_context(|| format!("failed to run host CLI '{}'", self.command))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "host command '{}' exited with {}: {}",
                command,
                output.status,
                stderr.trim()
            );
        }
        debug!("host command '{}' invoked", command);
        Ok(())
    }

    async fn read_setting(&self, key: &str) -> Result<Option<Value>> {
        let settings = self.read_settings_object().await?;
        Ok(settings.get(key).cloned())
    }

    async fn write_setting(&self, key: &str, value: &Value) -> Result<()> {
        let mut settings = self.read_settings_object().await?;
        settings.insert(key.to_string(), value.clone());
        let rendered = serde_json::to_string_pretty(&Value::Object(settings))?;
        if let Some(parent) = self.settings_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        // Write-then-rename so the editor's file watcher never sees a
        // half-written settings file.
        let tmp = self.settings_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, rendered.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.settings_path)
            .await
            .with_context(|| format!("failed to update {}", self.settings_path.display()))?;
        debug!("host setting {} = {}", key, value);
        Ok(())
    }

    async fn push_repository(&self, workspace: &Path) -> Result<()> {
        push::run_git_push(workspace).await
    }

    fn notify(&self, notice: Notice, message: &str) {
        match notice {
            Notice::Info => info!(target: "kinetic::notice", "{}", message),
            Notice::Warning => warn!(target: "kinetic::notice", "{}", message),
            Notice::Error => error!(target: "kinetic::notice", "{}", message),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A host double that records every effect for assertions.

    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use anyhow::{bail, Result};
    use serde_json::Value;

    use super::{Host, Notice};

    #[derive(Debug, Default)]
    struct RecordingState {
        executed: Vec<(String, Option<Value>)>,
        settings: serde_json::Map<String, Value>,
        setting_writes: Vec<(String, Value)>,
        pushes: Vec<std::path::PathBuf>,
        notices: Vec<(Notice, String)>,
        failing_commands: HashSet<String>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct RecordingHost {
        state: Arc<Mutex<RecordingState>>,
    }

    impl RecordingHost {
        pub fn with_setting(self, key: &str, value: Value) -> Self {
            self.state
                .lock()
                .unwrap()
                .settings
                .insert(key.to_string(), value);
            self
        }

        pub fn fail_command(&self, command: &str) {
            self.state
                .lock()
                .unwrap()
                .failing_commands
                .insert(command.to_string());
        }

        pub fn executed(&self) -> Vec<(String, Option<Value>)> {
            self.state.lock().unwrap().executed.clone()
        }

        pub fn setting(&self, key: &str) -> Option<Value> {
            self.state.lock().unwrap().settings.get(key).cloned()
        }

        pub fn setting_writes(&self) -> Vec<(String, Value)> {
            self.state.lock().unwrap().setting_writes.clone()
        }

        pub fn push_count(&self) -> usize {
            self.state.lock().unwrap().pushes.len()
        }

        pub fn notices(&self) -> Vec<(Notice, String)> {
            self.state.lock().unwrap().notices.clone()
        }
    }

    impl Host for RecordingHost {
        async fn execute(&self, command: &str, args: Option<&Value>) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state
                .executed
                .push((command.to_string(), args.cloned()));
            if state.failing_commands.contains(command) {
                bail!("host command '{}' exited with 1", command);
            }
            Ok(())
        }

        async fn read_setting(&self, key: &str) -> Result<Option<Value>> {
            Ok(self.state.lock().unwrap().settings.get(key).cloned())
        }

        async fn write_setting(&self, key: &str, value: &Value) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.settings.insert(key.to_string(), value.clone());
            state.setting_writes.push((key.to_string(), value.clone()));
            Ok(())
        }

        async fn push_repository(&self, workspace: &Path) -> Result<()> {
            self.state.lock().unwrap().pushes.push(workspace.to_path_buf());
            Ok(())
        }

        fn notify(&self, notice: Notice, message: &str) {
            self.state
                .lock()
                .unwrap()
                .notices
                .push((notice, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_settings_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("kinetic-host-{}", uuid::Uuid::new_v4()))
            .join("settings.json")
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let host = EditorHost::new("true", temp_settings_path());
        assert_eq!(host.read_setting("editor.fontSize").await.unwrap(), None);

        host.write_setting("editor.fontSize", &json!(14)).await.unwrap();
        assert_eq!(
            host.read_setting("editor.fontSize").await.unwrap(),
            Some(json!(14))
        );

        // Other keys survive an update.
        host.write_setting("editor.wordWrap", &json!("on")).await.unwrap();
        host.write_setting("editor.fontSize", &json!(8)).await.unwrap();
        assert_eq!(
            host.read_setting("editor.wordWrap").await.unwrap(),
            Some(json!("on"))
        );
        assert_eq!(
            host.read_setting("editor.fontSize").await.unwrap(),
            Some(json!(8))
        );
    }

    #[tokio::test]
    async fn test_execute_reports_command_failure() {
        // `true` ignores its arguments and exits 0; `false` exits 1.
        let ok_host = EditorHost::new("true", temp_settings_path());
        assert!(ok_host.execute("workbench.action.nextEditor", None).await.is_ok());

        let failing_host = EditorHost::new("false", temp_settings_path());
        let err = failing_host
            .execute("workbench.action.nextEditor", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("workbench.action.nextEditor"));
    }

    #[tokio::test]
    async fn test_execute_missing_host_cli_is_an_error() {
        let host = EditorHost::new("/nonexistent/editor-cli", temp_settings_path());
        assert!(host.execute("undo", None).await.is_err());
    }
}
