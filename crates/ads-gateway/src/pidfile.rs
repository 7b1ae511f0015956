// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! At-most-one gateway per workspace via `.ads/run/web.pid`.
//!
//! On startup: if the recorded PID is alive and its command line looks
//! like this server, it is asked to terminate (SIGTERM) and given a short
//! grace period — a cooperative handover, not a lock-out.  The file is
//! removed again on drop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

/// Grace period for the previous owner to exit.
const HANDOVER_WAIT: Duration = Duration::from_secs(2);

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Take over the workspace gateway slot and record our PID.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(previous) = read_pid(path) {
            if pid_is_ours_and_alive(previous) {
                info!(pid = previous, "asking previous gateway to hand over");
                terminate(previous);
                let deadline = std::time::Instant::now() + HANDOVER_WAIT;
                while pid_alive(previous) && std::time::Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(100));
                }
                if pid_alive(previous) {
                    warn!(pid = previous, "previous gateway did not exit in time");
                }
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, std::process::id().to_string())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if it still records our PID.
        if read_pid(&self.path) == Some(std::process::id() as i32) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<i32>()
        .ok()
}

fn pid_alive(pid: i32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Alive and recognizably one of ours (command line mentions `ads`).
fn pid_is_ours_and_alive(pid: i32) -> bool {
    if pid <= 0 || pid == std::process::id() as i32 || !pid_alive(pid) {
        return false;
    }
    match std::fs::read(format!("/proc/{pid}/cmdline")) {
        Ok(cmdline) => {
            let text = String::from_utf8_lossy(&cmdline);
            text.split('\0')
                .next()
                .map(|argv0| argv0.contains("ads"))
                .unwrap_or(false)
        }
        // No procfs (macOS etc.): trust the recorded pid.
        Err(_) => true,
    }
}

fn terminate(pid: i32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
