//! App blocker (§4.9). Grounded in `original_source/agent/blocker.py`;
//! the actual termination syscalls run on the blocking-task pool via
//! `tokio::task::spawn_blocking`, mirroring the Python's
//! `loop.run_in_executor` offload.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use heimdall_types::ids::AppGroupId;
use sysinfo::System;

use crate::monitor::AppSession;

const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(3);
const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);

/// Emitted by `enforce` when a session was killed, so the orchestrator
/// can show the blocking overlay (§4.12 "WebSocket message dispatch").
#[derive(Debug, Clone)]
pub struct BlockEvent {
    pub executable: String,
    pub group_id: AppGroupId,
}

#[derive(Default)]
pub struct AppBlocker {
    blocked_groups: Mutex<HashSet<AppGroupId>>,
}

impl AppBlocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_group(&self, group_id: AppGroupId) {
        self.blocked_groups.lock().unwrap().insert(group_id);
    }

    pub fn unblock_group(&self, group_id: AppGroupId) {
        self.blocked_groups.lock().unwrap().remove(&group_id);
    }

    pub fn is_blocked(&self, group_id: AppGroupId) -> bool {
        self.blocked_groups.lock().unwrap().contains(&group_id)
    }

    pub fn unblock_all(&self) {
        self.blocked_groups.lock().unwrap().clear();
    }

    /// Per-tick enforcement hook. `None` sessions or sessions in an
    /// untracked group are no-ops.
    pub async fn enforce(&self, session: Option<&AppSession>) -> Option<BlockEvent> {
        let session = session?;
        let group_id = session.app_group_id?;
        if !self.is_blocked(group_id) {
            return None;
        }

        kill_by_executable(&session.executable).await;

        Some(BlockEvent {
            executable: session.executable.clone(),
            group_id,
        })
    }
}

/// Kills every running process whose executable matches `name`
/// (case-insensitive exact match), returning the number killed.
pub async fn kill_by_executable(name: &str) -> usize {
    let name = name.to_lowercase();
    tokio::task::spawn_blocking(move || {
        let mut system = System::new_all();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        system
            .processes()
            .iter()
            .filter(|(_, process)| process.name().to_string_lossy().to_lowercase() == name)
            .map(|(pid, _)| pid.as_u32())
            .collect::<Vec<_>>()
    })
    .await
    .unwrap_or_default()
    .into_iter()
    .filter(|&pid| kill_process_sync(pid))
    .count()
}

/// Sends terminate, waits up to `graceful_timeout`, then force-kills
/// and waits up to 2s. A missing process on initial lookup counts as
/// success (already gone). Runs on the blocking pool.
pub async fn kill_process(pid: u32) -> bool {
    tokio::task::spawn_blocking(move || kill_process_sync(pid))
        .await
        .unwrap_or(false)
}

fn kill_process_sync(pid: u32) -> bool {
    if !process_alive(pid) {
        return true;
    }

    terminate(pid);
    let deadline = std::time::Instant::now() + GRACEFUL_TIMEOUT;
    while std::time::Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    force_kill(pid);
    let deadline = std::time::Instant::now() + FORCE_KILL_WAIT;
    while std::time::Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    !process_alive(pid)
}

fn process_alive(pid: u32) -> bool {
    let mut system = System::new_all();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    system.process(sysinfo::Pid::from_u32(pid)).is_some()
}

#[cfg(target_os = "windows")]
fn terminate(pid: u32) {
    force_kill(pid);
}

#[cfg(not(target_os = "windows"))]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(target_os = "windows")]
fn force_kill(pid: u32) {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};
    unsafe {
        if let Ok(handle) = OpenProcess(PROCESS_TERMINATE, false, pid) {
            let _ = TerminateProcess(handle, 1);
            let _ = CloseHandle(handle);
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn force_kill(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_unblock_is_idempotent() {
        let blocker = AppBlocker::new();
        let group = AppGroupId::new();
        blocker.block_group(group);
        blocker.block_group(group);
        assert!(blocker.is_blocked(group));
        blocker.unblock_group(group);
        blocker.unblock_group(group);
        assert!(!blocker.is_blocked(group));
    }

    #[tokio::test]
    async fn enforce_is_noop_for_untracked_group() {
        let blocker = AppBlocker::new();
        let session = AppSession {
            executable: "notepad.exe".to_string(),
            window_title: "Notepad".to_string(),
            app_group_id: None,
            pid: 1,
            started_at: chrono::Utc::now(),
        };
        assert!(blocker.enforce(Some(&session)).await.is_none());
    }

    #[tokio::test]
    async fn kill_process_reports_success_when_already_gone() {
        assert!(kill_process(4_000_000_000).await);
    }
}
