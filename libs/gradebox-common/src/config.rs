// Service configuration, read from the environment

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub redis_url: String,
    pub runtimes_path: PathBuf,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub memory_limit_mb: u32,
    pub max_memory_limit_mb: u32,
    pub max_code_bytes: usize,
    pub max_input_bytes: usize,
    pub max_output_bytes: usize,
    pub max_concurrent: usize,
    pub queue_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            runtimes_path: PathBuf::from("config/runtimes.json"),
            default_timeout_secs: 10,
            max_timeout_secs: 60,
            test_timeout_secs: 10,
            memory_limit_mb: 128,
            max_memory_limit_mb: 512,
            max_code_bytes: 64 * 1024,
            max_input_bytes: 64 * 1024,
            max_output_bytes: 10 * 1024,
            max_concurrent: 10,
            queue_timeout: Duration::from_millis(5000),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl ServiceConfig {
    /// Load configuration from `GRADEBOX_*` variables (and `REDIS_URL`),
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            bind_addr: env_or("GRADEBOX_BIND_ADDR", defaults.bind_addr)?,
            redis_url: env_or("REDIS_URL", defaults.redis_url)?,
            runtimes_path: env_or("GRADEBOX_RUNTIMES", defaults.runtimes_path)?,
            default_timeout_secs: env_or("GRADEBOX_DEFAULT_TIMEOUT_SECS", defaults.default_timeout_secs)?,
            max_timeout_secs: env_or("GRADEBOX_MAX_TIMEOUT_SECS", defaults.max_timeout_secs)?,
            test_timeout_secs: env_or("GRADEBOX_TEST_TIMEOUT_SECS", defaults.test_timeout_secs)?,
            memory_limit_mb: env_or("GRADEBOX_MEMORY_LIMIT_MB", defaults.memory_limit_mb)?,
            max_memory_limit_mb: env_or("GRADEBOX_MAX_MEMORY_LIMIT_MB", defaults.max_memory_limit_mb)?,
            max_code_bytes: env_or("GRADEBOX_MAX_CODE_BYTES", defaults.max_code_bytes)?,
            max_input_bytes: env_or("GRADEBOX_MAX_INPUT_BYTES", defaults.max_input_bytes)?,
            max_output_bytes: env_or("GRADEBOX_MAX_OUTPUT_BYTES", defaults.max_output_bytes)?,
            max_concurrent: env_or("GRADEBOX_MAX_CONCURRENT", defaults.max_concurrent)?,
            queue_timeout: Duration::from_millis(env_or(
                "GRADEBOX_QUEUE_TIMEOUT_MS",
                defaults.queue_timeout.as_millis() as u64,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would make every request fail
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            anyhow::bail!("GRADEBOX_MAX_CONCURRENT must be at least 1");
        }
        if self.default_timeout_secs == 0 || self.test_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be at least one second");
        }
        if self.default_timeout_secs > self.max_timeout_secs {
            anyhow::bail!(
                "Default timeout ({}s) exceeds maximum timeout ({}s)",
                self.default_timeout_secs,
                self.max_timeout_secs
            );
        }
        if self.memory_limit_mb == 0 {
            anyhow::bail!("GRADEBOX_MEMORY_LIMIT_MB must be at least 1");
        }
        if self.memory_limit_mb > self.max_memory_limit_mb {
            anyhow::bail!(
                "Memory limit ({} MB) exceeds maximum memory limit ({} MB)",
                self.memory_limit_mb,
                self.max_memory_limit_mb
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.queue_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_zero_pool() {
        let config = ServiceConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_default_above_max_timeout() {
        let config = ServiceConfig {
            default_timeout_secs: 90,
            max_timeout_secs: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_or_falls_back_when_unset() {
        let value: u64 = env_or("GRADEBOX_TEST_SURELY_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
