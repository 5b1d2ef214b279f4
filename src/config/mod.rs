use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "CINEMA_";
const MAX_STEP_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tms: TmsConfig,
    pub device: DeviceConfig,
    pub audit: AuditConfig,
    pub halls: Vec<HallConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub greetings_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5059,
            greetings_path: "greetings.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TmsConfig {
    pub enabled: bool,
    pub base_url: String,
    pub action_timeout_ms: u64,
    pub proxy_timeout_ms: u64,
}

impl Default for TmsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:8089".to_string(),
            action_timeout_ms: 5000,
            proxy_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub connect_timeout_ms: u64,
    pub lock_wait_ms: u64,
    pub ack_settle_ms: u64,
    pub ack_read_timeout_ms: u64,
    pub shutdown_step_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            lock_wait_ms: 10_000,
            ack_settle_ms: 100,
            ack_read_timeout_ms: 5000,
            shutdown_step_delay_ms: 500,
        }
    }
}

impl DeviceConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_step_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    pub log_dir: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
        }
    }
}

fn default_device_port() -> u16 {
    43748
}

fn default_protocol() -> String {
    "barco".to_string()
}

/// One `[[halls]]` entry. `tms_id` falls back to `id` when omitted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HallConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub ip: String,
    #[serde(default = "default_device_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tms_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp750_id: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

impl HallConfig {
    pub fn tms_id(&self) -> &str {
        self.tms_id.as_deref().unwrap_or(&self.id)
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        match fs::read_to_string(&config_path) {
            Ok(raw) => {
                config = toml::from_str::<Config>(&raw)?;
            }
            Err(err) => {
                tracing::warn!(path = %config_path.display(), error = %err, "config file not readable, using defaults");
            }
        }

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var(format!("{}SERVER_BIND", ENV_PREFIX)) {
            self.server.bind = val;
        }
        if let Ok(val) = env::var(format!("{}SERVER_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var(format!("{}TMS_ENABLED", ENV_PREFIX)) {
            self.tms.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var(format!("{}TMS_API_BASE", ENV_PREFIX)) {
            self.tms.base_url = val;
        }

        if let Ok(val) = env::var(format!("{}AUDIT_LOG_DIR", ENV_PREFIX)) {
            self.audit.log_dir = val;
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        if self.tms.enabled && self.tms.base_url.trim().is_empty() {
            return Err("tms.base_url is required when tms.enabled = true".into());
        }
        if self.device.shutdown_step_delay_ms > MAX_STEP_DELAY_MS {
            return Err(format!(
                "device.shutdown_step_delay_ms must be <= {}",
                MAX_STEP_DELAY_MS
            )
            .into());
        }

        let mut seen = HashSet::new();
        for hall in &self.halls {
            if hall.id.trim().is_empty() {
                return Err("halls[].id must be set".into());
            }
            if !seen.insert(hall.id.as_str()) {
                return Err(format!("duplicate hall id: {}", hall.id).into());
            }
            if hall.ip.trim().is_empty() {
                return Err(format!("hall {}: ip must be set", hall.id).into());
            }
            if hall.port == 0 {
                return Err(format!("hall {}: port must be non-zero", hall.id).into());
            }
        }
        Ok(())
    }

    /// Default config plus one example hall, written by `config-init`.
    pub fn example() -> Self {
        Self {
            halls: vec![HallConfig {
                id: "hall1".to_string(),
                name: "Hall 1".to_string(),
                ip: "192.168.1.100".to_string(),
                port: default_device_port(),
                tms_id: None,
                cp750_id: Some("HALL1_cp750".to_string()),
                protocol: default_protocol(),
            }],
            ..Self::default()
        }
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::example())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        active_config_path()
    }
}

fn active_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    PathBuf::from(CONFIG_FILE)
}
