//! Agent configuration store (§4.7). One JSON record persisted under a
//! platform-appropriate per-machine directory, mirroring the server's
//! own `default_data_dir` convention in `heimdall-server::config`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;
const DEFAULT_RULE_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub server_url: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default)]
    pub device_token: String,
    #[serde(default)]
    pub device_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub child_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub device_name: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_rule_poll_interval")]
    pub rule_poll_interval_secs: u64,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    /// Lowercased executable name → app group id, refreshed from every
    /// `ResolvedRules.app_group_map` the agent receives.
    #[serde(default)]
    pub app_group_map: HashMap<String, uuid::Uuid>,
}

fn default_api_prefix() -> String {
    String::new()
}
fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}
fn default_rule_poll_interval() -> u64 {
    DEFAULT_RULE_POLL_INTERVAL_SECS
}
fn default_monitor_interval() -> u64 {
    DEFAULT_MONITOR_INTERVAL_SECS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            api_prefix: default_api_prefix(),
            device_token: String::new(),
            device_id: None,
            child_id: None,
            device_name: String::new(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            rule_poll_interval_secs: DEFAULT_RULE_POLL_INTERVAL_SECS,
            monitor_interval_secs: DEFAULT_MONITOR_INTERVAL_SECS,
            app_group_map: HashMap::new(),
        }
    }
}

impl AgentConfig {
    /// True once a device token has been issued by `--register`.
    pub fn is_registered(&self) -> bool {
        !self.device_token.is_empty()
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn rule_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rule_poll_interval_secs)
    }

    pub fn monitor_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.monitor_interval_secs)
    }

    /// `server_url` + `api_prefix`, the base every REST call is built from.
    pub fn api_base(&self) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), self.api_prefix)
    }

    /// `api_base` with the scheme rewritten `http→ws`/`https→wss` and
    /// suffixed `/agent/ws`.
    pub fn ws_url(&self) -> String {
        let base = self.api_base();
        let rewritten = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base
        };
        format!("{rewritten}/agent/ws")
    }

    /// Loads the config from `{config_dir}/agent_config.json`, applying
    /// `HEIMDALL_SERVER_URL`/`HEIMDALL_DEVICE_TOKEN` env overrides on
    /// top of whatever was persisted (§4.7 "Environment overrides").
    pub fn load(config_dir: &Path) -> anyhow::Result<Self> {
        let path = config_dir.join("agent_config.json");
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(_) => Self::default(),
        };

        if let Ok(url) = std::env::var("HEIMDALL_SERVER_URL") {
            config.server_url = url;
        }
        if let Ok(token) = std::env::var("HEIMDALL_DEVICE_TOKEN") {
            config.device_token = token;
        }

        Ok(config)
    }

    pub fn save(&self, config_dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(config_dir)?;
        let path = config_dir.join("agent_config.json");
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Per-platform per-machine config directory, matching the server's
/// `default_data_dir` convention so both halves of the system follow
/// the same OS-appropriate-directory idiom.
pub fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("heimdall-agent");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("heimdall-agent");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join("heimdall-agent");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("HeimdallAgent");
        }
    }
    PathBuf::from(".heimdall-agent")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_unregistered() {
        let config = AgentConfig::default();
        assert!(!config.is_registered());
        assert_eq!(config.heartbeat_interval_secs, 60);
    }

    #[test]
    fn ws_url_rewrites_scheme() {
        let mut config = AgentConfig::default();
        config.server_url = "https://heimdall.example".to_string();
        assert_eq!(config.ws_url(), "wss://heimdall.example/agent/ws");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::default();
        config.server_url = "https://example.invalid".to_string();
        config.device_token = "tok123".to_string();
        config.save(dir.path()).unwrap();

        std::env::remove_var("HEIMDALL_SERVER_URL");
        std::env::remove_var("HEIMDALL_DEVICE_TOKEN");
        let loaded = AgentConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.server_url, "https://example.invalid");
        assert!(loaded.is_registered());
    }
}
