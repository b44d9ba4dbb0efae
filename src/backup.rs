//! Database backups: per-site SQL dumps with retention pruning

use crate::error::{Result, SiteError};
use crate::fleet::FleetDriver;
use crate::site::DatabaseEngine;
use crate::store::{Store, BACKUPS_DIR};
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Result of one backup attempt that did not error.
///
/// A site whose database container is not running is skipped, which is a
/// status distinct from a failed dump.
#[derive(Debug, Clone)]
pub enum BackupOutcome {
    Written { path: PathBuf },
    Skipped { reason: String },
}

/// Aggregated result of a `backup_all` sweep
#[derive(Debug, Default)]
pub struct BackupSweep {
    pub outcomes: Vec<(String, BackupOutcome)>,
    /// (site, error) pairs; the sweep never aborts on a single failure
    pub failures: Vec<(String, String)>,
    pub pruned: Vec<PathBuf>,
}

/// Database connection descriptor resolved from a site's `.env`.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub engine: DatabaseEngine,
    pub container: String,
    pub db_name: String,
    pub user: String,
    pub password: String,
    pub root_password: String,
}

impl ConnectionDescriptor {
    /// Resolve from parsed `.env` values, falling back to engine defaults
    /// for anything missing.
    pub fn from_env(values: Option<BTreeMap<String, String>>, name: &str) -> Self {
        let mut descriptor = Self::fallback(name);
        let Some(values) = values else {
            return descriptor;
        };
        if let Some(engine) = values.get("DB_ENGINE").and_then(|s| DatabaseEngine::parse(s)) {
            descriptor.engine = engine;
        }
        if let Some(host) = values.get("DB_HOST") {
            descriptor.container = host.clone();
        }
        if let Some(db) = values.get("DB_NAME") {
            descriptor.db_name = db.clone();
        }
        if let Some(user) = values.get("DB_USER") {
            descriptor.user = user.clone();
        }
        if let Some(password) = values.get("DB_PASSWORD") {
            descriptor.password = password.clone();
        }
        if let Some(root) = values.get("DB_ROOT_PASSWORD") {
            descriptor.root_password = root.clone();
        }
        descriptor
    }

    /// Fixed default descriptor used when the runtime configuration is
    /// missing or unreadable.
    pub fn fallback(name: &str) -> Self {
        Self {
            engine: DatabaseEngine::Mariadb,
            container: format!("{}-db", name),
            db_name: name.replace('-', "_"),
            user: "root".to_string(),
            password: String::new(),
            root_password: String::new(),
        }
    }

    /// The engine-appropriate dump invocation: (argv, extra environment).
    pub fn dump_command(&self) -> (Vec<String>, Vec<String>) {
        match self.engine {
            DatabaseEngine::Mariadb => {
                let mut cmd = vec![self.engine.dump_binary().to_string(), "-uroot".to_string()];
                if !self.root_password.is_empty() {
                    cmd.push(format!("-p{}", self.root_password));
                }
                cmd.push("--databases".to_string());
                cmd.push(self.db_name.clone());
                (cmd, Vec::new())
            }
            DatabaseEngine::Postgres => (
                vec![
                    self.engine.dump_binary().to_string(),
                    "-U".to_string(),
                    self.user.clone(),
                    self.db_name.clone(),
                ],
                vec![format!("PGPASSWORD={}", self.password)],
            ),
        }
    }
}

/// Runs dumps across the store and prunes expired backup files.
pub struct BackupRunner {
    store: Store,
    fleet: Arc<dyn FleetDriver>,
    retention: Duration,
}

impl BackupRunner {
    pub fn new(store: Store, fleet: Arc<dyn FleetDriver>, retention_days: u64) -> Self {
        Self {
            store,
            fleet,
            retention: Duration::from_secs(retention_days * 24 * 60 * 60),
        }
    }

    /// Dump one site's database to a dated file under its backup directory.
    pub async fn backup_one(&self, name: &str) -> Result<BackupOutcome> {
        if !self.store.exists(name) {
            return Err(SiteError::NotFound(name.to_string()));
        }

        let descriptor = ConnectionDescriptor::from_env(self.store.load_env_file(name), name);

        if !self.fleet.is_running(&descriptor.container).await? {
            info!(site = name, container = %descriptor.container, "Database not running, skipping backup");
            return Ok(BackupOutcome::Skipped {
                reason: format!("database container '{}' is not running", descriptor.container),
            });
        }

        let (cmd, env) = descriptor.dump_command();
        let output = self.fleet.exec(&descriptor.container, &cmd, &env).await?;
        if !output.success() {
            return Err(SiteError::BackupFailed {
                name: name.to_string(),
                step: "dump".to_string(),
                reason: format!(
                    "{} exited with {}: {}",
                    descriptor.engine.dump_binary(),
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }

        let dir = self.store.backups_dir(name);
        std::fs::create_dir_all(&dir).map_err(|e| SiteError::BackupFailed {
            name: name.to_string(),
            step: "write".to_string(),
            reason: e.to_string(),
        })?;

        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = dir.join(format!("{}_{}.sql", name, stamp));
        std::fs::write(&path, &output.stdout).map_err(|e| SiteError::BackupFailed {
            name: name.to_string(),
            step: "write".to_string(),
            reason: e.to_string(),
        })?;

        info!(site = name, path = %path.display(), bytes = output.stdout.len(), "Backup written");
        Ok(BackupOutcome::Written { path })
    }

    /// Back up every known site, then prune expired files everywhere.
    pub async fn backup_all(&self) -> Result<BackupSweep> {
        let mut sweep = BackupSweep::default();

        for name in self.store.list()? {
            match self.backup_one(&name).await {
                Ok(outcome) => sweep.outcomes.push((name, outcome)),
                Err(e) => {
                    warn!(site = %name, error = %e, "Backup failed, continuing sweep");
                    sweep.failures.push((name, e.to_string()));
                }
            }
        }

        sweep.pruned = self.prune(SystemTime::now())?;
        Ok(sweep)
    }

    /// Delete backup files older than the retention window, evaluated by
    /// file modification time.
    pub fn prune(&self, now: SystemTime) -> Result<Vec<PathBuf>> {
        let cutoff = now
            .checked_sub(self.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let root = self.store.root().join(BACKUPS_DIR);
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut pruned = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                prune_dir(&entry.path(), cutoff, &mut pruned)?;
            }
        }
        if !pruned.is_empty() {
            info!(removed = pruned.len(), "Pruned expired backups");
        }
        Ok(pruned)
    }
}

fn prune_dir(dir: &Path, cutoff: SystemTime, pruned: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            std::fs::remove_file(entry.path())?;
            pruned.push(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_falls_back_when_env_missing() {
        let descriptor = ConnectionDescriptor::from_env(None, "demo-site");
        assert_eq!(descriptor.engine, DatabaseEngine::Mariadb);
        assert_eq!(descriptor.container, "demo-site-db");
        assert_eq!(descriptor.db_name, "demo_site");
        assert_eq!(descriptor.user, "root");
    }

    #[test]
    fn test_descriptor_reads_env_values() {
        let mut values = BTreeMap::new();
        values.insert("DB_ENGINE".to_string(), "postgres".to_string());
        values.insert("DB_HOST".to_string(), "demo-site-db".to_string());
        values.insert("DB_NAME".to_string(), "demo_site".to_string());
        values.insert("DB_USER".to_string(), "demo_site_user".to_string());
        values.insert("DB_PASSWORD".to_string(), "s3cret".to_string());

        let descriptor = ConnectionDescriptor::from_env(Some(values), "demo-site");
        assert_eq!(descriptor.engine, DatabaseEngine::Postgres);

        let (cmd, env) = descriptor.dump_command();
        assert_eq!(cmd[0], "pg_dump");
        assert_eq!(cmd[1], "-U");
        assert_eq!(cmd[2], "demo_site_user");
        assert_eq!(env, vec!["PGPASSWORD=s3cret".to_string()]);
    }

    #[test]
    fn test_mariadb_dump_command_uses_root_credentials() {
        let mut values = BTreeMap::new();
        values.insert("DB_ENGINE".to_string(), "mariadb".to_string());
        values.insert("DB_ROOT_PASSWORD".to_string(), "RootPw".to_string());

        let descriptor = ConnectionDescriptor::from_env(Some(values), "demo-site");
        let (cmd, env) = descriptor.dump_command();
        assert_eq!(
            cmd,
            vec!["mariadb-dump", "-uroot", "-pRootPw", "--databases", "demo_site"]
        );
        assert!(env.is_empty());
    }
}
