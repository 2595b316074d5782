//! The guarded repository push sequence.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, info};

/// Run `git add`, `git commit`, `git push` sequentially in `workspace`.
/// Any failing step aborts the rest of the sequence.
pub async fn run_git_push(workspace: &Path) -> Result<()> {
    run_git(workspace, &["add", "-A"]).await?;
    let message = format!(
        "kinetic: pushed by gesture at {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    run_git(workspace, &["commit", "-m", &message]).await?;
    run_git(workspace, &["push"]).await?;
    info!("repository push complete in {}", workspace.display());
    Ok(())
}

async fn run_git(workspace: &Path, args: &[&str]) -> Result<()> {
    debug!("running git {} in {}", args.join(" "), workspace.display());
    let output = Command::new("git")
        .args(args)
        .current_dir(workspace)
        .output()
        .await
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(())
}
