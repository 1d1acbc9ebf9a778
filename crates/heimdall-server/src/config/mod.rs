use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_HOLIDAY_API_BASE_URL: &str = "https://openholidaysapi.org";

/// `{data_dir}/heimdall-server.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    port: Option<u16>,
    log: Option<String>,
    holiday_api_base_url: Option<String>,
    holiday_country_code: Option<String>,
    holiday_subdivision_code: Option<String>,
    tan_code_retry_limit: Option<u32>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("heimdall-server.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::error!(path = %path.display(), err = %e, "failed to parse heimdall-server.toml — using defaults");
            None
        }
    }
}

/// Resolved server configuration: built-in default, then TOML file, then
/// environment variable / CLI flag, matching the reference daemon's
/// `DaemonConfig` override order.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Base URL of the public/school holiday provider (§4.6 holiday sync).
    pub holiday_api_base_url: String,
    pub holiday_country_code: String,
    pub holiday_subdivision_code: Option<String>,
    /// Retries on TAN code collision before failing with an internal error.
    pub tan_code_retry_limit: u32,
}

impl ServerConfig {
    pub fn new(port: Option<u16>, data_dir: Option<PathBuf>, log: Option<String>) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let holiday_api_base_url = std::env::var("HEIMDALL_HOLIDAY_API_BASE_URL")
            .ok()
            .or(toml.holiday_api_base_url)
            .unwrap_or_else(|| DEFAULT_HOLIDAY_API_BASE_URL.to_string());

        let holiday_country_code = std::env::var("HEIMDALL_HOLIDAY_COUNTRY_CODE")
            .ok()
            .or(toml.holiday_country_code)
            .unwrap_or_else(|| "DE".to_string());

        let holiday_subdivision_code = std::env::var("HEIMDALL_HOLIDAY_SUBDIVISION_CODE")
            .ok()
            .or(toml.holiday_subdivision_code);

        let tan_code_retry_limit = toml.tan_code_retry_limit.unwrap_or(10);

        Self {
            port,
            data_dir,
            log,
            holiday_api_base_url,
            holiday_country_code,
            holiday_subdivision_code,
            tan_code_retry_limit,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("heimdall");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("heimdall");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("heimdall");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("Heimdall");
        }
    }
    PathBuf::from(".heimdall")
}
