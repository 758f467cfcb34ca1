//! Server configuration: a JSON file under the XDG config dir, merged with
//! defaults and command-line overrides.
//! Stored at $XDG_CONFIG_HOME/syspeek/config.json (fallback: platform config dir).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{AuthSettings, Credential};
use crate::error::ConfigError;
use crate::stream::{Category, Intervals};

/// Refresh periods below this are rejected.
pub const MIN_REFRESH_MS: u64 = 250;

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("syspeek")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syspeek")
    }
}

pub fn default_path() -> PathBuf {
    config_dir().join("config.json")
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SslConfig {
    pub enabled: bool,
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ssl: SslConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9876,
            ssl: SslConfig::default(),
        }
    }
}

/// Passwords hold the transformed value printed by `--hash-password`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub read_only_username: String,
    pub read_only_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct UiConfig {
    pub title: String,
    pub hostname: String,
    pub header_color: String,
    pub theme: String,
    pub compact_mode: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        let host = local_hostname();
        Self {
            title: host.clone(),
            hostname: host,
            header_color: "#1a1a2e".into(),
            theme: "dark".into(),
            compact_mode: false,
        }
    }
}

/// Per-category refresh periods in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub cpu: u64,
    pub memory: u64,
    pub disk: u64,
    pub network: u64,
    pub gpu: u64,
    pub processes: u64,
    pub sockets: u64,
    pub firewall: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cpu: 5000,
            memory: 5000,
            disk: 5000,
            network: 5000,
            gpu: 5000,
            processes: 5000,
            sockets: 5000,
            firewall: 10_000,
        }
    }
}

impl RefreshConfig {
    pub fn millis(&self, category: Category) -> u64 {
        match category {
            Category::Cpu => self.cpu,
            Category::Memory => self.memory,
            Category::Disk => self.disk,
            Category::Network => self.network,
            Category::Gpu => self.gpu,
            Category::Processes => self.processes,
            Category::Sockets => self.sockets,
            Category::Firewall => self.firewall,
        }
    }

    pub fn interval(&self, category: Category) -> Duration {
        Duration::from_millis(self.millis(category))
    }

    pub fn intervals(&self) -> Intervals {
        Intervals::new(
            Category::ALL
                .into_iter()
                .map(|c| (c, self.interval(c)))
                .collect::<HashMap<_, _>>(),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub ui: UiConfig,
    pub refresh: RefreshConfig,
}

impl Config {
    /// Reads `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json_pretty(&self) -> String {
        // plain data structs: serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for c in Category::ALL {
            let ms = self.refresh.millis(c);
            if ms < MIN_REFRESH_MS {
                return Err(ConfigError::Invalid(format!(
                    "refresh.{c} is {ms} ms; minimum is {MIN_REFRESH_MS} ms"
                )));
            }
        }
        if self.server.ssl.cert.is_empty() != self.server.ssl.key.is_empty() {
            return Err(ConfigError::Invalid(
                "server.ssl.cert and server.ssl.key must be given together".into(),
            ));
        }
        Ok(())
    }

    /// Credential tiers plus the override flags.
    pub fn auth_settings(&self, public: bool, admin: bool) -> AuthSettings {
        AuthSettings {
            read_write: Credential::new(&self.auth.username, &self.auth.password),
            read_only: Credential::new(
                &self.auth.read_only_username,
                &self.auth.read_only_password,
            ),
            public,
            admin,
        }
    }

    pub fn has_auth(&self) -> bool {
        let a = &self.auth;
        (!a.username.is_empty() && !a.password.is_empty())
            || (!a.read_only_username.is_empty() && !a.read_only_password.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.server.host, "127.0.0.1");
        assert_eq!(c.server.port, 9876);
        assert_eq!(c.refresh.interval(Category::Cpu), Duration::from_secs(5));
        assert_eq!(c.refresh.interval(Category::Firewall), Duration::from_secs(10));
        assert!(!c.has_auth());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c = Config::from_json(
            r#"{"server":{"port":8080},"auth":{"readOnlyUsername":"bob","readOnlyPassword":"ab"},"refresh":{"cpu":1000}}"#,
        )
        .unwrap();
        assert_eq!(c.server.port, 8080);
        assert_eq!(c.server.host, "127.0.0.1");
        assert_eq!(c.refresh.cpu, 1000);
        assert_eq!(c.refresh.memory, 5000);
        assert!(c.has_auth());
        let s = c.auth_settings(false, false);
        assert!(s.read_write.is_none());
        assert_eq!(s.read_only.unwrap().username, "bob");
    }

    #[test]
    fn too_fast_refresh_is_invalid() {
        let c = Config::from_json(r#"{"refresh":{"sockets":100}}"#).unwrap();
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_default_and_bad_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(c, Config::default());
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn pretty_json_round_trips() {
        let c = Config::default();
        let back = Config::from_json(&c.to_json_pretty()).unwrap();
        assert_eq!(back, c);
        assert!(c.to_json_pretty().contains("\"readOnlyUsername\""));
    }
}
