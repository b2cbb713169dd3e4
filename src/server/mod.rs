//! Long-running index server
//!
//! This module provides a daemon that owns one [`SearchService`] so that
//! indexing runs outlive the command that started them and searches hit a
//! warm result cache.
//!
//! Architecture:
//! - Daemon: owns the service, listens on a Unix socket, one thread per connection
//! - Client: connects to the socket, sends requests, receives responses
//! - Fallback: if the daemon is not running, the CLI uses an in-process service
//!
//! [`SearchService`]: crate::service::SearchService

mod client;
pub mod daemon;
pub mod protocol;

pub use client::{ClientError, ClientResult, IndexClient};

use std::path::PathBuf;

/// Get the socket path for the index server
/// Uses a per-user runtime directory for security
pub fn get_socket_path() -> PathBuf {
    runtime_file("seekql.sock")
}

/// Get the PID file path for the daemon
pub fn get_pid_path() -> PathBuf {
    runtime_file("seekql.pid")
}

fn runtime_file(name: &str) -> PathBuf {
    // Try XDG_RUNTIME_DIR first (most secure, tmpfs-backed)
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(name);
    }

    // Fall back to user's home directory
    if let Some(home) = dirs::home_dir() {
        return home.join(".local").join("run").join(name);
    }

    // Last resort: /tmp with user ID
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", uid, name))
}

/// Check if the daemon is running
pub fn is_daemon_running() -> bool {
    let pid_path = get_pid_path();
    if !pid_path.exists() {
        return false;
    }

    // Read PID and check if process exists
    if let Ok(pid_str) = std::fs::read_to_string(&pid_path)
        && let Ok(pid) = pid_str.trim().parse::<i32>()
    {
        // Check if process exists using kill(pid, 0)
        return unsafe { libc::kill(pid, 0) } == 0;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_files_share_directory() {
        let socket = get_socket_path();
        let pid = get_pid_path();
        assert_eq!(socket.parent(), pid.parent());
        assert!(socket.to_string_lossy().ends_with("seekql.sock"));
        assert!(pid.to_string_lossy().ends_with("seekql.pid"));
    }
}
