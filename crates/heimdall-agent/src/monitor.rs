//! Process monitor (§4.8). Grounded in
//! `original_source/agent/monitor.py`: samples the foreground window on
//! a cooperative interval and emits `(old_session, new_session)`
//! transitions to the orchestrator.

use std::sync::Mutex;

use heimdall_types::ids::AppGroupId;
use uuid::Uuid;

/// One foreground-window observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSession {
    pub executable: String,
    pub window_title: String,
    pub app_group_id: Option<AppGroupId>,
    pub pid: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ForegroundDescriptor {
    executable: String,
    window_title: String,
    pid: u32,
}

fn placeholder_descriptor() -> ForegroundDescriptor {
    ForegroundDescriptor {
        executable: "dummy.exe".to_string(),
        window_title: "Dummy Window".to_string(),
        pid: 0,
    }
}

#[cfg(target_os = "windows")]
fn detect_foreground() -> ForegroundDescriptor {
    use windows::Win32::Foundation::{CloseHandle, HWND, MAX_PATH};
    use windows::Win32::System::ProcessStatus::K32GetModuleBaseNameW;
    use windows::Win32::System::Threading::{
        OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_VM_READ,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId,
    };

    unsafe {
        let hwnd: HWND = GetForegroundWindow();
        if hwnd.is_invalid() {
            return placeholder_descriptor();
        }

        let mut title_buf = [0u16; 512];
        let title_len = GetWindowTextW(hwnd, &mut title_buf);
        let window_title = String::from_utf16_lossy(&title_buf[..title_len.max(0) as usize]);

        let mut pid: u32 = 0;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
        if pid == 0 {
            return placeholder_descriptor();
        }

        let executable = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_VM_READ, false, pid) {
            Ok(handle) => {
                let mut name_buf = [0u16; MAX_PATH as usize];
                let len = K32GetModuleBaseNameW(handle, None, &mut name_buf);
                let _ = CloseHandle(handle);
                if len == 0 {
                    "unknown.exe".to_string()
                } else {
                    String::from_utf16_lossy(&name_buf[..len as usize])
                }
            }
            Err(_) => "unknown.exe".to_string(),
        };

        ForegroundDescriptor { executable, window_title, pid }
    }
}

#[cfg(not(target_os = "windows"))]
fn detect_foreground() -> ForegroundDescriptor {
    placeholder_descriptor()
}

/// Samples the foreground application on a fixed interval, tracking
/// the current session and diffing against the previous sample.
pub struct ProcessMonitor {
    simulation_override: Mutex<Option<ForegroundDescriptor>>,
    current: Mutex<Option<AppSession>>,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self {
            simulation_override: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    /// Installs a deterministic foreground override for tests and the
    /// remote-control surface (§6), taking precedence over real
    /// detection until cleared with `None`.
    pub fn set_simulation(&self, executable: Option<&str>, window_title: Option<&str>, pid: u32) {
        let mut slot = self.simulation_override.lock().unwrap();
        *slot = executable.map(|exe| ForegroundDescriptor {
            executable: exe.to_string(),
            window_title: window_title.unwrap_or_default().to_string(),
            pid,
        });
    }

    pub fn current_session(&self) -> Option<AppSession> {
        self.current.lock().unwrap().clone()
    }

    /// One sampling iteration. Returns `Some((old, new))` when the
    /// foreground descriptor changed since the previous call, `None`
    /// otherwise.
    pub fn sample(&self, app_group_map: &std::collections::HashMap<String, Uuid>) -> Option<(Option<AppSession>, Option<AppSession>)> {
        let descriptor = self
            .simulation_override
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(detect_foreground);

        let mut current = self.current.lock().unwrap();
        if let Some(session) = current.as_ref() {
            if session.executable == descriptor.executable && session.pid == descriptor.pid {
                return None;
            }
        }

        let app_group_id = app_group_map
            .get(&descriptor.executable.to_lowercase())
            .copied()
            .map(AppGroupId::from);

        let new_session = AppSession {
            executable: descriptor.executable,
            window_title: descriptor.window_title,
            app_group_id,
            pid: descriptor.pid,
            started_at: chrono::Utc::now(),
        };

        let old_session = current.replace(new_session.clone());
        Some((old_session, Some(new_session)))
    }

    /// Called on shutdown: if a session is active, emits its closing
    /// transition so the orchestrator can report the final usage event.
    pub fn take_final_transition(&self) -> Option<(Option<AppSession>, Option<AppSession>)> {
        let mut current = self.current.lock().unwrap();
        current.take().map(|session| (Some(session), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_descriptor_yields_no_transition() {
        let monitor = ProcessMonitor::new();
        let map = std::collections::HashMap::new();
        monitor.set_simulation(Some("game.exe"), Some("Game"), 42);
        let first = monitor.sample(&map);
        assert!(first.is_some());
        let second = monitor.sample(&map);
        assert!(second.is_none());
    }

    #[test]
    fn changed_descriptor_yields_old_and_new() {
        let monitor = ProcessMonitor::new();
        let map = std::collections::HashMap::new();
        monitor.set_simulation(Some("game.exe"), Some("Game"), 42);
        monitor.sample(&map);
        monitor.set_simulation(Some("browser.exe"), Some("Browser"), 99);
        let (old, new) = monitor.sample(&map).unwrap();
        assert_eq!(old.unwrap().executable, "game.exe");
        assert_eq!(new.unwrap().executable, "browser.exe");
    }

    #[test]
    fn final_transition_closes_active_session() {
        let monitor = ProcessMonitor::new();
        let map = std::collections::HashMap::new();
        monitor.set_simulation(Some("game.exe"), Some("Game"), 42);
        monitor.sample(&map);
        let (old, new) = monitor.take_final_transition().unwrap();
        assert_eq!(old.unwrap().executable, "game.exe");
        assert!(new.is_none());
    }
}
