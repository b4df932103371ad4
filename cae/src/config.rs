//! Configuration for the alignment engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaeError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaeConfig {
    /// Constitution document (JSON or YAML)
    pub constitution_path: PathBuf,
    /// Parameters document (JSON or YAML); re-read on every state mutation
    pub parameters_path: PathBuf,
    /// Directory receiving audit bundles
    pub audit_dir: PathBuf,
    /// Agent state store settings
    pub state: StateConfig,
    /// General settings
    pub general: GeneralConfig,
}

impl Default for CaeConfig {
    fn default() -> Self {
        Self {
            constitution_path: PathBuf::from("main.json"),
            parameters_path: PathBuf::from("parameters.json"),
            audit_dir: PathBuf::from("audit"),
            state: StateConfig::default(),
            general: GeneralConfig::default(),
        }
    }
}

impl CaeConfig {
    /// Config with every path rooted under `base`.
    pub fn rooted_at(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            constitution_path: base.join("main.json"),
            parameters_path: base.join("parameters.json"),
            audit_dir: base.join("audit"),
            state: StateConfig {
                state_dir: base.join("state"),
                ..Default::default()
            },
            general: GeneralConfig::default(),
        }
    }

    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Load config from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CaeError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw).map_err(|e| {
            CaeError::ConfigError(format!("failed to parse {}: {}", path.display(), e))
        })
    }
}

/// Agent state store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding registry, log, lock marker and optional schema
    pub state_dir: PathBuf,
    pub registry_file: String,
    pub log_file: String,
    pub lock_file: String,
    pub schema_file: String,
    /// Lock acquisition attempts before giving up
    pub lock_retries: u32,
    /// Fixed wait between lock attempts (milliseconds)
    pub lock_wait_ms: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
            registry_file: "agent_registry.json".to_string(),
            log_file: "state_log.jsonl".to_string(),
            lock_file: ".lock".to_string(),
            schema_file: "state_schema.json".to_string(),
            lock_retries: 200,
            lock_wait_ms: 25,
        }
    }
}

impl StateConfig {
    /// Defaults under a given directory.
    pub fn in_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Default::default()
        }
    }

    /// Builder: override the lock retry budget.
    pub fn with_lock_budget(mut self, retries: u32, wait_ms: u64) -> Self {
        self.lock_retries = retries;
        self.lock_wait_ms = wait_ms;
        self
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join(&self.registry_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join(&self.log_file)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(&self.lock_file)
    }

    pub fn schema_path(&self) -> PathBuf {
        self.state_dir.join(&self.schema_file)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

/// General settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Precedence at which a failing kill-switch article overrides mode resolution
    pub kill_switch_precedence: f64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "cae=info".to_string(),
            kill_switch_precedence: 95.0,
        }
    }
}
