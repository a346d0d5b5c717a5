//! Configuration management with environment variable support.
//!
//! This module provides [`Config`] for loading and validating kms-secrets
//! settings from an optional JSON file and environment variables. The binary
//! applies its command-line flags on top before calling [`Config::validate`].
//!
//! ## Environment Variables
//!
//! - `KMS_KEY_ID`: KMS key ARN, alias or id
//! - `AWS_DEFAULT_REGION`: AWS region
//! - `AWS_PROFILE`: AWS profile
//! - `KMS_SECRETS_FILTER`: Filter regex for file paths
//! - `KMS_SECRETS_KEY_FILE`: Key file for the local backend
//! - `KMS_SECRETS_CONFIG`: Override config file path

use crate::walk::{FileFilter, MATCH_ALL};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable names for configuration overrides
pub const ENV_KEY_ID: &str = "KMS_KEY_ID";
pub const ENV_REGION: &str = "AWS_DEFAULT_REGION";
pub const ENV_PROFILE: &str = "AWS_PROFILE";
pub const ENV_FILTER: &str = "KMS_SECRETS_FILTER";
pub const ENV_KEY_FILE: &str = "KMS_SECRETS_KEY_FILE";
pub const ENV_CONFIG_PATH: &str = "KMS_SECRETS_CONFIG";

/// Which key service performs the per-chunk encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Aws,
    Local,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(Backend::Aws),
            "local" => Ok(Backend::Local),
            other => Err(format!("unknown backend '{}' (expected aws or local)", other)),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Aws => f.write_str("aws"),
            Backend::Local => f.write_str("local"),
        }
    }
}

/// Operation being configured; encryption needs a key id, decryption does not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub key_id: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub key_file: String,
    pub filter: String,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Aws,
            key_id: None,
            region: None,
            profile: None,
            key_file: "./kms-secrets.key".to_string(),
            filter: MATCH_ALL.to_string(),
            retry_attempts: 3,
            retry_base_delay_ms: 200,
        }
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: &str) -> Result<Self> {
        let s =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config =
            serde_json::from_str(&s).with_context(|| format!("parsing config file {}", path))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config with environment variable overrides
    /// Priority: ENV vars > config file > defaults
    pub fn load_with_env(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(String::from)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok());

        let mut config = match config_path {
            Some(ref p) if Path::new(p).exists() => {
                info!(path = p, "loading config from file");
                let s = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p))?;
                serde_json::from_str(&s).with_context(|| format!("parsing config file {}", p))?
            }
            Some(ref p) => {
                warn!(path = p, "config file not found, using defaults");
                Config::default()
            }
            None => {
                debug!("using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    fn apply_env_overrides(&mut self) {
        if let Some(key_id) = non_empty_env(ENV_KEY_ID) {
            debug!(key_id = %key_id, "overriding key_id from environment");
            self.key_id = Some(key_id);
        }

        if let Some(region) = non_empty_env(ENV_REGION) {
            debug!(region = %region, "overriding region from environment");
            self.region = Some(region);
        }

        if let Some(profile) = non_empty_env(ENV_PROFILE) {
            debug!(profile = %profile, "overriding profile from environment");
            self.profile = Some(profile);
        }

        if let Some(filter) = non_empty_env(ENV_FILTER) {
            debug!(filter = %filter, "overriding filter from environment");
            self.filter = filter;
        }

        if let Some(key_file) = non_empty_env(ENV_KEY_FILE) {
            debug!(key_file = %key_file, "overriding key_file from environment");
            self.key_file = key_file;
        }
    }

    /// Validate that everything `op` needs is present
    pub fn validate(&self, op: Operation) -> Result<()> {
        if self.backend == Backend::Aws {
            if op == Operation::Encrypt && is_blank(&self.key_id) {
                bail!("--key-id must be set");
            }
            if is_blank(&self.region) {
                bail!("--region must be set");
            }
            if is_blank(&self.profile) {
                bail!("--profile must be set");
            }
        }

        if self.backend == Backend::Local {
            if self.key_file.trim().is_empty() {
                bail!("--key-file cannot be empty");
            }
            if self.key_file.contains("..") {
                warn!("key_file contains '..' - consider using absolute paths");
            }
        }

        if self.retry_attempts == 0 {
            bail!("retry_attempts must be at least 1");
        }

        self.file_filter()?;
        Ok(())
    }

    /// Compiled form of [`Config::filter`]
    pub fn file_filter(&self) -> Result<FileFilter> {
        FileFilter::new(&self.filter).map_err(anyhow::Error::from)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn aws_config() -> Config {
        Config {
            key_id: Some("alias/secrets".to_string()),
            region: Some("eu-west-1".to_string()),
            profile: Some("default".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_aws_encrypt_requires_key_id() {
        let mut cfg = aws_config();
        assert!(cfg.validate(Operation::Encrypt).is_ok());

        cfg.key_id = None;
        let err = cfg.validate(Operation::Encrypt).unwrap_err();
        assert!(err.to_string().contains("--key-id"));
        assert!(cfg.validate(Operation::Decrypt).is_ok());
    }

    #[test]
    fn test_aws_requires_region_and_profile() {
        let mut cfg = aws_config();
        cfg.region = Some("  ".to_string());
        assert!(cfg.validate(Operation::Decrypt).unwrap_err().to_string().contains("--region"));

        let mut cfg = aws_config();
        cfg.profile = None;
        assert!(cfg.validate(Operation::Decrypt).unwrap_err().to_string().contains("--profile"));
    }

    #[test]
    fn test_local_backend_needs_no_aws_settings() {
        let cfg = Config {
            backend: Backend::Local,
            ..Config::default()
        };
        assert!(cfg.validate(Operation::Encrypt).is_ok());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let cfg = Config {
            filter: "[".to_string(),
            ..aws_config()
        };
        assert!(cfg.validate(Operation::Encrypt).is_err());
    }

    #[test]
    fn test_load_partial_json_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{ "backend": "local", "retry_attempts": 5 }"#).unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.backend, Backend::Local);
        assert_eq!(cfg.retry_attempts, 5);
        assert_eq!(cfg.retry_base_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("AWS".parse::<Backend>().unwrap(), Backend::Aws);
        assert_eq!("local".parse::<Backend>().unwrap(), Backend::Local);
        assert!("gcp".parse::<Backend>().is_err());
    }
}
