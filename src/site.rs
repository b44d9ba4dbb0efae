//! Site (environment) model: names, database engines, credentials

use crate::error::SiteError;
use serde::{Deserialize, Serialize};

/// Directory names reserved for shared infrastructure inside the store root
pub const RESERVED_NAMES: [&str; 4] = ["proxy", "mail", "scheduler", "backups"];

/// Database engine backing a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Mariadb,
    Postgres,
}

impl DatabaseEngine {
    /// Docker image for the database service
    pub fn image(&self) -> &'static str {
        match self {
            DatabaseEngine::Mariadb => "mariadb:11.4",
            DatabaseEngine::Postgres => "postgres:16-alpine",
        }
    }

    /// Port the database listens on inside the shared network
    pub fn port(&self) -> u16 {
        match self {
            DatabaseEngine::Mariadb => 3306,
            DatabaseEngine::Postgres => 5432,
        }
    }

    /// Data directory inside the database container (mounted from `data/`)
    pub fn data_mount(&self) -> &'static str {
        match self {
            DatabaseEngine::Mariadb => "/var/lib/mysql",
            DatabaseEngine::Postgres => "/var/lib/postgresql/data",
        }
    }

    /// Docker image for the database admin tool
    pub fn admin_image(&self) -> &'static str {
        match self {
            DatabaseEngine::Mariadb => "phpmyadmin/phpmyadmin:5",
            DatabaseEngine::Postgres => "adminer:4",
        }
    }

    /// Interactive client binary shipped in the database image
    pub fn client_binary(&self) -> &'static str {
        match self {
            DatabaseEngine::Mariadb => "mariadb",
            DatabaseEngine::Postgres => "psql",
        }
    }

    /// Dump tool shipped in the database image
    pub fn dump_binary(&self) -> &'static str {
        match self {
            DatabaseEngine::Mariadb => "mariadb-dump",
            DatabaseEngine::Postgres => "pg_dump",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mariadb" | "mysql" => Some(DatabaseEngine::Mariadb),
            "postgres" | "postgresql" => Some(DatabaseEngine::Postgres),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseEngine::Mariadb => write!(f, "mariadb"),
            DatabaseEngine::Postgres => write!(f, "postgres"),
        }
    }
}

/// How the site's application tree is populated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    /// Write a minimal starter tree into `app/`
    FreshScaffold,
    /// Leave `app/` empty for the operator to populate
    ImportedExisting,
}

/// Generated secrets for one site.
///
/// Generated once at creation time and persisted in the site's `.env`;
/// re-rendering never regenerates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Password for the application's database user
    pub db_password: String,
    /// Password for the database root/superuser
    pub db_root_password: String,
    /// Password for the cache service, when the site has one
    pub cache_password: Option<String>,
}

/// Fully resolved description of one site.
///
/// This is the sole input to the template renderer; everything rendered for
/// a site is a pure function of this value plus the shared network name.
#[derive(Debug, Clone)]
pub struct EnvironmentSpec {
    /// Normalized site name: DNS label and container-name prefix
    pub name: String,
    /// `<name>.<suffix>`
    pub domain: String,
    pub engine: DatabaseEngine,
    pub cache_enabled: bool,
    pub source_mode: SourceMode,
    pub credentials: Credentials,
}

impl EnvironmentSpec {
    pub fn new(
        name: &str,
        suffix: &str,
        engine: DatabaseEngine,
        cache_enabled: bool,
        source_mode: SourceMode,
        credentials: Credentials,
    ) -> Self {
        Self {
            name: name.to_string(),
            domain: format!("{}.{}", name, suffix),
            engine,
            cache_enabled,
            source_mode,
            credentials,
        }
    }

    /// Host-name of the database admin tool
    pub fn admin_domain(&self) -> String {
        format!("admin.{}", self.domain)
    }

    pub fn app_container(&self) -> String {
        format!("{}-app", self.name)
    }

    pub fn db_container(&self) -> String {
        format!("{}-db", self.name)
    }

    pub fn cache_container(&self) -> String {
        format!("{}-cache", self.name)
    }

    pub fn admin_container(&self) -> String {
        format!("{}-admin", self.name)
    }

    /// Database name derived from the site name (identifier-safe)
    pub fn db_name(&self) -> String {
        self.name.replace('-', "_")
    }

    /// Application database user
    pub fn db_user(&self) -> String {
        format!("{}_user", self.db_name())
    }
}

/// Normalize and validate a raw site name.
///
/// Lowercases, converts whitespace runs to single hyphens, and rejects
/// anything that would not work as a DNS label, a container-name prefix,
/// or a directory name. Reserved infrastructure names are refused so a
/// site can never shadow a singleton directory.
pub fn normalize_name(raw: &str) -> Result<String, SiteError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SiteError::Validation {
            name: raw.to_string(),
            reason: "name must not be empty".to_string(),
        });
    }

    let name = trimmed
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(SiteError::Validation {
            name: raw.to_string(),
            reason: "only letters, digits, hyphens and spaces are allowed".to_string(),
        });
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(SiteError::Validation {
            name: raw.to_string(),
            reason: "name must not start or end with a hyphen".to_string(),
        });
    }

    if RESERVED_NAMES.contains(&name.as_str()) {
        return Err(SiteError::Validation {
            name: raw.to_string(),
            reason: format!("'{}' is reserved for shared infrastructure", name),
        });
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            db_password: "a".repeat(24),
            db_root_password: "b".repeat(24),
            cache_password: None,
        }
    }

    #[test]
    fn test_normalize_lowercases_and_hyphenates() {
        assert_eq!(normalize_name("Demo Site").unwrap(), "demo-site");
        assert_eq!(normalize_name("  My  App  ").unwrap(), "my-app");
        assert_eq!(normalize_name("blog2").unwrap(), "blog2");
    }

    #[test]
    fn test_normalize_rejects_empty_and_bad_chars() {
        assert!(normalize_name("").is_err());
        assert!(normalize_name("   ").is_err());
        assert!(normalize_name("foo_bar").is_err());
        assert!(normalize_name("foo.bar").is_err());
        assert!(normalize_name("-edge").is_err());
    }

    #[test]
    fn test_normalize_rejects_reserved_names() {
        for reserved in RESERVED_NAMES {
            let err = normalize_name(reserved).unwrap_err();
            assert!(err.to_string().contains("reserved"));
        }
    }

    #[test]
    fn test_engine_table_is_consistent() {
        assert_eq!(DatabaseEngine::Mariadb.port(), 3306);
        assert_eq!(DatabaseEngine::Postgres.port(), 5432);
        assert!(DatabaseEngine::Mariadb.image().starts_with("mariadb:"));
        assert!(DatabaseEngine::Postgres.image().starts_with("postgres:"));
        assert_eq!(DatabaseEngine::parse("MySQL"), Some(DatabaseEngine::Mariadb));
        assert_eq!(
            DatabaseEngine::parse("postgresql"),
            Some(DatabaseEngine::Postgres)
        );
        assert_eq!(DatabaseEngine::parse("oracle"), None);
    }

    #[test]
    fn test_spec_derived_names() {
        let spec = EnvironmentSpec::new(
            "demo-site",
            "local",
            DatabaseEngine::Mariadb,
            true,
            SourceMode::FreshScaffold,
            creds(),
        );
        assert_eq!(spec.domain, "demo-site.local");
        assert_eq!(spec.admin_domain(), "admin.demo-site.local");
        assert_eq!(spec.db_container(), "demo-site-db");
        assert_eq!(spec.db_name(), "demo_site");
        assert_eq!(spec.db_user(), "demo_site_user");
    }
}
