//! Preview frame sink: publishes the latest engine frame for the host UI.
//!
//! Frames arrive as base64-encoded JPEG payloads at whatever rate the
//! engine produces them; only the latest matters. The sink writes each
//! frame to a well-known file that the host's preview surface watches,
//! and removes it on clear so a terminated session never leaves a stale
//! image behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, warn};

pub struct FrameSink {
    path: PathBuf,
}

impl FrameSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Decode and publish a frame. The write goes through a sibling temp
    /// file and a rename so a reader never observes a torn image.
    pub fn push(&self, frame_b64: &str) -> Result<()> {
        let bytes = BASE64
            .decode(frame_b64.trim())
            .context("frame payload is not valid base64")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to publish {}", self.path.display()))?;
        Ok(())
    }

    /// Remove the published frame. Called on every teardown, whatever the
    /// reason, so the preview surface goes blank with the session.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("cleared preview frame"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to clear preview frame: {}", e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
