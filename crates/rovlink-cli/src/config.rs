//! Operator configuration – reads/writes `~/.rovlink/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use rovlink_middleware::LinkOptions;
use rovlink_types::{DEFAULT_SENSOR_ANGLES_DEG, SensorGeometry};
use serde::{Deserialize, Serialize};

/// Persisted connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Robot or simulator host name.
    #[serde(default = "default_host")]
    pub host: String,

    /// Robot or simulator TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Range sensor mounting angles in degrees, in `sense` order.
    #[serde(default = "default_sensor_angles")]
    pub sensor_angles_deg: Vec<f64>,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    rovlink_middleware::link::DEFAULT_PORT
}
fn default_sensor_angles() -> Vec<f64> {
    DEFAULT_SENSOR_ANGLES_DEG.to_vec()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            sensor_angles_deg: default_sensor_angles(),
        }
    }
}

impl Config {
    pub fn geometry(&self) -> SensorGeometry {
        SensorGeometry::from_degrees(&self.sensor_angles_deg)
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions::new(self.host.clone(), self.port).with_geometry(self.geometry())
    }
}

/// Return the path to `~/.rovlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rovlink").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ROVLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVLINK_HOST` | `host` |
/// | `ROVLINK_PORT` | `port` (ignored unless a valid port number) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROVLINK_HOST") {
        cfg.host = v;
    }
    if let Ok(v) = std::env::var("ROVLINK_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
}

/// Save the config to disk, creating `~/.rovlink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    // Owner-only on Unix; the file names hosts on the operator's network.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| format!("Failed to set config permissions: {}", e))?;
    }
    Ok(())
}
