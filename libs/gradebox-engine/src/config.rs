// Runtime image configuration for the sandbox
use anyhow::{bail, Context, Result};
use gradebox_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub name: String,
    pub version: String,
    pub image: String,
    /// Interpreter argv; the harness bootstrap is appended as the last argument
    pub command: Vec<String>,
    pub cpu_limit: f32,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    #[serde(default = "default_tmpfs_mb")]
    pub tmpfs_mb: u32,
}

fn default_pids_limit() -> i64 {
    64
}

fn default_tmpfs_mb() -> u32 {
    16
}

impl RuntimeConfig {
    /// Built-in profile used when no runtimes file is present
    pub fn python_default() -> Self {
        Self {
            name: "python".to_string(),
            version: "3.11".to_string(),
            image: "python:3.11-slim".to_string(),
            command: vec![
                "python3".to_string(),
                "-I".to_string(),
                "-B".to_string(),
                "-u".to_string(),
                "-c".to_string(),
            ],
            cpu_limit: 0.5,
            pids_limit: default_pids_limit(),
            tmpfs_mb: default_tmpfs_mb(),
        }
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit as f64 * 1_000_000_000.0) as i64
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RuntimesJson {
    runtimes: Vec<RuntimeConfig>,
}

/// Runtime registry
#[derive(Debug, Clone)]
pub struct RuntimeRegistry {
    configs: HashMap<Language, RuntimeConfig>,
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        let mut configs = HashMap::new();
        configs.insert(Language::Python, RuntimeConfig::python_default());
        Self { configs }
    }
}

impl RuntimeRegistry {
    /// Load runtime configurations from a runtimes.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let runtimes_json: RuntimesJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let mut configs = HashMap::new();
        for runtime in runtimes_json.runtimes {
            let language = match Language::from_str(&runtime.name) {
                Some(language) => language,
                None => bail!("Unknown runtime '{}' in {}", runtime.name, config_path.display()),
            };
            if runtime.command.is_empty() {
                bail!("Runtime '{}' has an empty command", runtime.name);
            }
            if runtime.cpu_limit <= 0.0 {
                bail!("Runtime '{}' must have a positive cpu_limit", runtime.name);
            }
            configs.insert(language, runtime);
        }

        if configs.is_empty() {
            bail!("No runtimes configured in {}", config_path.display());
        }

        Ok(Self { configs })
    }

    /// Load from `config_path` when it exists, otherwise use the built-in profile
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let registry = Self::load(config_path)?;
            info!(path = %config_path.display(), runtimes = ?registry.list_languages(), "Loaded runtime configuration");
            Ok(registry)
        } else {
            warn!(path = %config_path.display(), "Runtime config not found, using built-in python profile");
            Ok(Self::default())
        }
    }

    /// Get configuration for a specific language
    pub fn get(&self, language: &Language) -> Result<&RuntimeConfig> {
        self.configs
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("No runtime configured for language: {}", language))
    }

    pub fn runtimes(&self) -> impl Iterator<Item = &RuntimeConfig> {
        self.configs.values()
    }

    pub fn list_languages(&self) -> Vec<String> {
        self.configs.keys().map(|l| l.to_string()).collect()
    }
}
