use crate::error::{GateError, GateResult};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/usbgate.toml";

/// Where the authorization registry lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RegistryCfg {
    #[serde(default = "default_registry_path")]
    pub path: String,
}

fn default_registry_path() -> String {
    "/var/lib/usbgate/authorized_devices.txt".to_string()
}

impl Default for RegistryCfg {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

/// Controls how device events are reduced to identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IdentityCfg {
    /// Accept the device path as an identifier when no serial is exposed.
    /// Path identifiers change with the port a device is plugged into.
    #[serde(default)]
    pub allow_path_fallback: bool,

    /// Only act on partitions that sit on the USB bus.
    #[serde(default = "default_true")]
    pub require_usb_bus: bool,
}

fn default_true() -> bool {
    true
}

impl Default for IdentityCfg {
    fn default() -> Self {
        Self {
            allow_path_fallback: false,
            require_usb_bus: true,
        }
    }
}

/// Optional commands run when access changes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnforcementCfg {
    #[serde(default)]
    pub grant_command: Option<Vec<String>>,

    #[serde(default)]
    pub deny_command: Option<Vec<String>>,

    #[serde(default)]
    pub revoke_command: Option<Vec<String>>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl EnforcementCfg {
    /// Deadline for a single hook run; never shorter than one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for EnforcementCfg {
    fn default() -> Self {
        Self {
            grant_command: None,
            deny_command: None,
            revoke_command: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DaemonCfg {
    #[serde(default = "default_status_addr")]
    pub status_addr: String,
}

fn default_status_addr() -> String {
    "127.0.0.1:8788".to_string()
}

impl Default for DaemonCfg {
    fn default() -> Self {
        Self {
            status_addr: default_status_addr(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GateConfig {
    #[serde(default)]
    pub registry: RegistryCfg,

    #[serde(default)]
    pub identity: IdentityCfg,

    #[serde(default)]
    pub enforcement: EnforcementCfg,

    #[serde(default)]
    pub daemon: DaemonCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

impl GateConfig {
    /// Parse a TOML or YAML file, picking the format from the extension.
    pub fn load<P: AsRef<Path>>(path: P) -> GateResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let format = format_for(path);
        let mut cfg = match format {
            ConfigFormat::Toml => toml::from_str::<Self>(&contents)?,
            ConfigFormat::Yaml => serde_yaml::from_str::<Self>(&contents)?,
        };

        cfg.path = path.to_path_buf();
        cfg.format = format;

        if let Some(issue) = cfg.validate().into_iter().next() {
            return Err(GateError::InvalidConfig(issue));
        }

        Ok(cfg)
    }

    /// Like [`GateConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> GateResult<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(GateError::Io(err)) if err.kind() == ErrorKind::NotFound => {
                info!(
                    "config {} not found; using built-in defaults",
                    path.display()
                );
                Ok(Self {
                    path: path.to_path_buf(),
                    format: format_for(path),
                    ..Self::default()
                })
            }
            other => other,
        }
    }

    /// Collect every problem with the configuration instead of stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.registry.path.trim().is_empty() {
            issues.push("registry.path must not be empty".to_string());
        }

        for (name, command) in [
            ("enforcement.grant_command", &self.enforcement.grant_command),
            ("enforcement.deny_command", &self.enforcement.deny_command),
            ("enforcement.revoke_command", &self.enforcement.revoke_command),
        ] {
            if let Some(argv) = command {
                if argv.first().map(|prog| prog.trim().is_empty()).unwrap_or(true) {
                    issues.push(format!("{name} must name a program as its first element"));
                }
            }
        }

        if self.enforcement.timeout_secs == 0 {
            issues.push("enforcement.timeout_secs must be greater than zero".to_string());
        }

        if self.daemon.status_addr.parse::<SocketAddr>().is_err() {
            issues.push(format!(
                "daemon.status_addr `{}` is not a socket address",
                self.daemon.status_addr
            ));
        }

        issues
    }

    pub fn registry_path(&self) -> PathBuf {
        PathBuf::from(&self.registry.path)
    }
}

fn format_for(path: &Path) -> ConfigFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            ConfigFormat::Yaml
        }
        _ => ConfigFormat::Toml,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn toml_overrides_merge_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usbgate.toml");
        fs::write(
            &path,
            r#"
[registry]
path = "/tmp/devices.txt"

[enforcement]
grant_command = ["loginctl", "unlock-sessions"]
"#,
        )
        .unwrap();

        let cfg = GateConfig::load(&path).unwrap();
        assert_eq!(cfg.registry_path(), PathBuf::from("/tmp/devices.txt"));
        assert!(!cfg.identity.allow_path_fallback);
        assert!(cfg.identity.require_usb_bus);
        assert_eq!(cfg.enforcement.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.daemon.status_addr, "127.0.0.1:8788");
        assert_eq!(cfg.format, ConfigFormat::Toml);
    }

    #[test]
    fn yaml_is_selected_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usbgate.yaml");
        fs::write(
            &path,
            "identity:\n  allow_path_fallback: true\n  require_usb_bus: false\n",
        )
        .unwrap();

        let cfg = GateConfig::load(&path).unwrap();
        assert!(cfg.identity.allow_path_fallback);
        assert!(!cfg.identity.require_usb_bus);
        assert_eq!(cfg.format, ConfigFormat::Yaml);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let cfg = GateConfig::load_or_default(&path).unwrap();
        assert_eq!(cfg.path, path);
        assert_eq!(cfg.registry.path, default_registry_path());
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usbgate.toml");
        fs::write(
            &path,
            "[enforcement]\ndeny_command = []\ntimeout_secs = 0\n",
        )
        .unwrap();

        let err = GateConfig::load(&path).unwrap_err();
        assert!(matches!(err, GateError::InvalidConfig(_)));
    }

    #[test]
    fn validate_lists_every_issue() {
        let mut cfg = GateConfig::default();
        cfg.registry.path = " ".into();
        cfg.enforcement.timeout_secs = 0;
        cfg.daemon.status_addr = "not-an-addr".into();
        assert_eq!(cfg.validate().len(), 3);
    }
}
