//! bera.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::DeployPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeraConfig {
    pub server: ServerConfig,
    pub deploy: DeployConfig,
    pub stream: StreamConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Simulated build latency between two log lines.
    pub step_delay_ms: u64,
    pub policy: DeployPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Outbound frames buffered per live viewer before it is dropped.
    pub subscriber_buffer: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer tokens accepted on `/api/admin/*`. Issued elsewhere.
    pub tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: PathBuf::from("/var/lib/bera"),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 800,
            policy: DeployPolicy::Reject,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}

impl BeraConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BeraConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Append comma-separated admin tokens (the `BERA_ADMIN_TOKENS` format).
    pub fn extend_admin_tokens(&mut self, raw: &str) {
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !self.admin.tokens.iter().any(|t| t == token) {
                self.admin.tokens.push(token.to_string());
            }
        }
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.deploy.step_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BeraConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.step_delay(), Duration::from_millis(800));
        assert_eq!(config.deploy.policy, DeployPolicy::Reject);
        assert!(config.admin.tokens.is_empty());
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[server]
port = 8080

[deploy]
policy = "queue"
"#;
        let config: BeraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.deploy.policy, DeployPolicy::Queue);
        // Untouched sections keep their defaults.
        assert_eq!(config.deploy.step_delay_ms, 800);
        assert_eq!(config.stream.subscriber_buffer, 256);
    }

    #[test]
    fn test_from_file_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bera.toml");
        let mut config = BeraConfig::default();
        config.admin.tokens.push("t0ken".to_string());
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = BeraConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.admin.tokens, vec!["t0ken".to_string()]);
    }

    #[test]
    fn test_extend_admin_tokens_skips_blanks_and_duplicates() {
        let mut config = BeraConfig::default();
        config.extend_admin_tokens("a, b,,a ,");
        assert_eq!(config.admin.tokens, vec!["a".to_string(), "b".to_string()]);
    }
}
