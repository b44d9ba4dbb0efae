//! Manager configuration loaded from `config.toml` in the store root

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Global settings for the environment manager.
///
/// Every field has a default so a missing or empty `config.toml` yields a
/// working setup; the file only exists to override individual knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Local top-level suffix appended to site names (default: "local")
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,

    /// Name of the shared bridge network all sites and the proxy join
    #[serde(default = "default_network")]
    pub network: String,

    /// Static host-name resolution table to register sites in
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,

    /// Age in days after which backup files are pruned
    #[serde(default = "default_retention_days")]
    pub backup_retention_days: u64,

    /// Attempts when polling a freshly created site through the proxy
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    /// Fixed sleep between readiness attempts, in seconds
    #[serde(default = "default_readiness_interval_secs")]
    pub readiness_interval_secs: u64,

    /// Cron expression for the backup scheduler singleton
    #[serde(default = "default_backup_schedule")]
    pub backup_schedule: String,

    /// Host port the shared proxy publishes for HTTP
    #[serde(default = "default_proxy_http_port")]
    pub proxy_http_port: u16,

    /// Host port the shared proxy publishes for HTTPS
    #[serde(default = "default_proxy_https_port")]
    pub proxy_https_port: u16,
}

fn default_domain_suffix() -> String {
    "local".to_string()
}

fn default_network() -> String {
    "siteforge".to_string()
}

fn default_hosts_file() -> PathBuf {
    PathBuf::from("/etc/hosts")
}

fn default_retention_days() -> u64 {
    7
}

fn default_readiness_attempts() -> u32 {
    30
}

fn default_readiness_interval_secs() -> u64 {
    2
}

fn default_backup_schedule() -> String {
    "0 3 * * *".to_string()
}

fn default_proxy_http_port() -> u16 {
    80
}

fn default_proxy_https_port() -> u16 {
    443
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("empty config deserializes via field defaults")
    }
}

impl Config {
    /// Load configuration from `<root>/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let path = root.join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Fixed well-known host-name of the mail-capture UI
    pub fn mail_domain(&self) -> String {
        format!("mail.{}", self.domain_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.domain_suffix, "local");
        assert_eq!(config.network, "siteforge");
        assert_eq!(config.hosts_file, PathBuf::from("/etc/hosts"));
        assert_eq!(config.backup_retention_days, 7);
        assert_eq!(config.readiness_attempts, 30);
        assert_eq!(config.readiness_interval_secs, 2);
        assert_eq!(config.proxy_http_port, 80);
        assert_eq!(config.mail_domain(), "mail.local");
    }

    #[test]
    fn test_partial_override() {
        let toml = r#"
domain_suffix = "dev"
backup_retention_days = 14
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.domain_suffix, "dev");
        assert_eq!(config.backup_retention_days, 14);
        assert_eq!(config.network, "siteforge");
        assert_eq!(config.mail_domain(), "mail.dev");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.domain_suffix, "local");
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "domain_suffix = [").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
