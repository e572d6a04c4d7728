//! Configuration management for the bundle server.
//!
//! Loads settings from a TOML file (or defaults), then applies environment
//! overrides. The result is read once at startup and passed by reference.

use crate::error::{OtaError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/ota/config.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "OTA_CONFIG";

/// Accepted bundle extension (RAUC bundle images)
pub const BUNDLE_EXTENSION: &str = ".raucb";

/// Manifest file name inside the data directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Bundle directory name inside the data directory
pub const BUNDLES_DIR: &str = "bundles";

/// Listener addresses for the two HTTP surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Device API, expected behind the mTLS-terminating proxy
    #[serde(default = "default_device_addr")]
    pub device_addr: String,

    /// Dashboard, expected on a trusted network only
    #[serde(default = "default_dashboard_addr")]
    pub dashboard_addr: String,
}

fn default_device_addr() -> String {
    "127.0.0.1:8443".to_string()
}

fn default_dashboard_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            device_addr: default_device_addr(),
            dashboard_addr: default_dashboard_addr(),
        }
    }
}

/// Full server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root of all persistent state (bundles and manifest)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Externally visible base URL used to build `bundle_url`
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Device family tag written into every manifest
    #[serde(default = "default_compatible")]
    pub compatible: String,

    /// Dashboard static assets
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Upper bound for a single upload request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    #[serde(default)]
    pub listen: ListenConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_server_url() -> String {
    "https://localhost:8443".to_string()
}

fn default_compatible() -> String {
    "iot-gateway-raspberrypi5".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("/app/static")
}

fn default_max_upload_bytes() -> u64 {
    4 * 1024 * 1024 * 1024 // 4 GiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_url: default_server_url(),
            compatible: default_compatible(),
            static_dir: default_static_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            listen: ListenConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Directory holding the bundle files
    pub fn bundles_dir(&self) -> PathBuf {
        self.data_dir.join(BUNDLES_DIR)
    }

    /// Path of the persisted manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join(MANIFEST_FILE)
    }

    /// Public URL of a bundle by its sanitized name
    pub fn bundle_url(&self, filename: &str) -> String {
        format!("{}/bundles/{}", self.server_url.trim_end_matches('/'), filename)
    }

    /// Load config for the process: file (explicit path, `OTA_CONFIG`, or
    /// the default location), then environment overrides, then validation.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let path = explicit_path
            .map(Path::to_path_buf)
            .or(env_path)
            .unwrap_or_else(|| PathBuf::from(CONFIG_PATH));

        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            warn!("Config not found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OtaError::Config(e.to_string()))
    }

    /// Apply environment-style overrides. The lookup is injected so tests
    /// never touch the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("COMPATIBLE") {
            self.compatible = v;
        }
        if let Some(v) = lookup("STATIC_DIR") {
            self.static_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEVICE_ADDR") {
            self.listen.device_addr = v;
        }
        if let Some(v) = lookup("DASHBOARD_ADDR") {
            self.listen.dashboard_addr = v;
        }
        if let Some(v) = lookup("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = v
                .trim()
                .parse()
                .map_err(|_| OtaError::Config(format!("MAX_UPLOAD_BYTES is not a number: {}", v)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(OtaError::Config("server_url must not be empty".to_string()));
        }
        if self.compatible.trim().is_empty() {
            return Err(OtaError::Config("compatible must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.server_url, "https://localhost:8443");
        assert_eq!(config.compatible, "iot-gateway-raspberrypi5");
        assert_eq!(config.bundles_dir(), PathBuf::from("/data/bundles"));
        assert_eq!(config.manifest_path(), PathBuf::from("/data/manifest.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
data_dir = "/srv/ota"
compatible = "rpi4-gateway"

[listen]
dashboard_addr = "0.0.0.0:9090"
"#;
        let config = ServerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/ota"));
        assert_eq!(config.compatible, "rpi4-gateway");
        assert_eq!(config.listen.dashboard_addr, "0.0.0.0:9090");
        // Defaults for missing fields
        assert_eq!(config.listen.device_addr, "127.0.0.1:8443");
        assert_eq!(config.server_url, "https://localhost:8443");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = ServerConfig::from_toml_str("data_dir = [").unwrap_err();
        assert!(matches!(err, OtaError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DATA_DIR", "/tmp/ota"),
            ("SERVER_URL", "https://updates.example.com/"),
            ("COMPATIBLE", "edge-box"),
            ("MAX_UPLOAD_BYTES", "1024"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/ota"));
        assert_eq!(config.compatible, "edge-box");
        assert_eq!(config.max_upload_bytes, 1024);
        // Trailing slash never doubles up in bundle URLs
        assert_eq!(
            config.bundle_url("a.raucb"),
            "https://updates.example.com/bundles/a.raucb"
        );
    }

    #[test]
    fn test_upload_limit_beyond_u32() {
        assert_eq!(ServerConfig::default().max_upload_bytes, 4 * 1024 * 1024 * 1024);

        let mut config = ServerConfig::default();
        config
            .apply_overrides(|k| (k == "MAX_UPLOAD_BYTES").then(|| "8589934592".to_string()))
            .unwrap();
        assert_eq!(config.max_upload_bytes, 8 * 1024 * 1024 * 1024);

        let parsed = ServerConfig::from_toml_str("max_upload_bytes = 17179869184").unwrap();
        assert_eq!(parsed.max_upload_bytes, 16 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_bad_upload_limit_rejected() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_overrides(|k| (k == "MAX_UPLOAD_BYTES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, OtaError::Config(_)));
    }

    #[test]
    fn test_empty_compatible_rejected() {
        let config = ServerConfig {
            compatible: "  ".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = ServerConfig::load(Some(&temp.path().join("absent.toml")));
        // Environment may override fields, but loading must not fail
        assert!(config.is_ok());
    }
}
