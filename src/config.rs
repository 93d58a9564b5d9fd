use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const ENV_MODEL: &str = "STUDY_PLANNER_MODEL";
pub const ENV_HOST: &str = "STUDY_PLANNER_HOST";
pub const ENV_PORT: &str = "STUDY_PLANNER_PORT";
pub const ENV_SERVER_BIN: &str = "STUDY_PLANNER_SERVER_BIN";
pub const ENV_AUTOSTART: &str = "STUDY_PLANNER_AUTOSTART";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "STUDY_PLANNER_CONNECT_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Settings for the local inference server and how the app talks to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: String,
    pub host: String,
    pub port: u16,
    pub server_binary: String,
    /// Spawn `<server_binary> run <model>` before the first generation.
    pub autostart: bool,
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "mistral".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            server_binary: "ollama".to_string(),
            autostart: true,
            connect_timeout_ms: 5_000,
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    home_dir().join(".study-planner").join("config.json")
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Defaults, then `~/.study-planner/config.json` if present, then the
    /// `STUDY_PLANNER_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        if let Some(model) = get(ENV_MODEL) {
            self.model = model.trim().to_string();
        }
        if let Some(host) = get(ENV_HOST) {
            self.host = host.trim().to_string();
        }
        if let Some(binary) = get(ENV_SERVER_BIN) {
            self.server_binary = binary.trim().to_string();
        }
        if let Some(port) = get(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_PORT,
                value: port.clone(),
            })?;
        }
        if let Some(autostart) = get(ENV_AUTOSTART) {
            self.autostart = parse_bool(&autostart).ok_or(ConfigError::InvalidEnv {
                var: ENV_AUTOSTART,
                value: autostart.clone(),
            })?;
        }
        if let Some(timeout) = get(ENV_CONNECT_TIMEOUT_MS) {
            self.connect_timeout_ms =
                timeout.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_CONNECT_TIMEOUT_MS,
                    value: timeout.clone(),
                })?;
        }

        Ok(())
    }

    pub fn generate_url(&self) -> String {
        format!("http://{}:{}/api/generate", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_point_at_local_ollama() {
        let config = Config::default();
        assert_eq!(config.model, "mistral");
        assert_eq!(config.generate_url(), "http://localhost:11434/api/generate");
        assert!(config.autostart);
    }

    #[test]
    fn env_overrides_replace_defaults() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                (ENV_MODEL, "llama3"),
                (ENV_PORT, "8080"),
                (ENV_AUTOSTART, "off"),
                (ENV_HOST, " 127.0.0.1 "),
            ]))
            .expect("overrides should apply");

        assert_eq!(config.model, "llama3");
        assert_eq!(config.port, 8080);
        assert!(!config.autostart);
        assert_eq!(config.generate_url(), "http://127.0.0.1:8080/api/generate");
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[(ENV_MODEL, "  "), (ENV_PORT, "")]))
            .expect("empty overrides should be skipped");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut config = Config::default();
        let error = config
            .apply_overrides(lookup(&[(ENV_PORT, "not-a-port")]))
            .expect_err("invalid port should fail");
        assert!(matches!(error, ConfigError::InvalidEnv { var: ENV_PORT, .. }));
    }

    #[test]
    fn config_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "model": "phi3", "port": 9000 }"#)
            .expect("config fixture should write");

        let config = Config::load_from_file(&path).expect("partial config should load");
        assert_eq!(config.model, "phi3");
        assert_eq!(config.port, 9000);
        assert_eq!(config.server_binary, "ollama");
    }

    #[test]
    fn malformed_config_file_reports_parse_error() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ model: ").expect("config fixture should write");

        let error = Config::load_from_file(&path).expect_err("malformed config should fail");
        assert!(matches!(error, ConfigError::Parse { .. }));
    }
}
