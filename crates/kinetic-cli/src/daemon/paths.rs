//! Runtime and config path resolution.
//!
//! Priority for the runtime directory (control socket, PID file, preview
//! frame):
//! 1. `KINETIC_RUNTIME_DIR` (explicit override)
//! 2. `XDG_RUNTIME_DIR/kinetic` (Linux standard)
//! 3. `~/.kinetic` (home directory fallback)
//! 4. System temp dir (last resort)
//!
//! User gesture mappings live in the config directory:
//! `KINETIC_CONFIG_DIR`, falling back to the platform config dir
//! (`~/.config/kinetic` on Linux).

use std::env;
use std::path::PathBuf;

/// Get the runtime directory with priority fallback.
pub fn runtime_dir() -> PathBuf {
    // 1. Explicit override (ignore empty)
    if let Ok(dir) = env::var("KINETIC_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    // 2. XDG_RUNTIME_DIR (ignore empty)
    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("kinetic");
        }
    }

    // 3. Home directory fallback
    if let Some(home) = dirs::home_dir() {
        return home.join(".kinetic");
    }

    // 4. Last resort: temp dir
    env::temp_dir().join("kinetic")
}

/// Create the runtime directory with owner-only permissions. The socket
/// and preview frame are per-user surfaces.
pub fn ensure_runtime_dir() -> std::io::Result<PathBuf> {
    let dir = runtime_dir();
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(dir)
}

/// Control socket path.
pub fn socket_path() -> PathBuf {
    runtime_dir().join("kineticd.sock")
}

/// Daemon PID file path.
pub fn pid_path() -> PathBuf {
    runtime_dir().join("kineticd.pid")
}

/// Where the latest preview frame is published for the host UI.
pub fn frame_path() -> PathBuf {
    runtime_dir().join("preview.jpg")
}

/// Config directory holding the user's gesture mappings.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = env::var("KINETIC_CONFIG_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(config) = dirs::config_dir() {
        return config.join("kinetic");
    }
    runtime_dir()
}

/// The user's gesture mappings file.
pub fn mappings_path() -> PathBuf {
    config_dir().join("mappings.json")
}
