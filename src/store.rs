//! On-disk environment store
//!
//! The directory tree under the store root is the single source of truth
//! for which environments exist. One subdirectory per site, plus fixed
//! subdirectories for the shared infrastructure stacks and for backups.

use crate::error::{Result, SiteError};
use crate::site::{Credentials, RESERVED_NAMES};
use crate::templates::ArtifactSet;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PROXY_DIR: &str = "proxy";
pub const MAIL_DIR: &str = "mail";
pub const SCHEDULER_DIR: &str = "scheduler";
pub const BACKUPS_DIR: &str = "backups";

/// Handle on the store root directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open (creating if necessary) the store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn env_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.env_dir(name).is_dir()
    }

    pub fn proxy_dir(&self) -> PathBuf {
        self.root.join(PROXY_DIR)
    }

    pub fn mail_dir(&self) -> PathBuf {
        self.root.join(MAIL_DIR)
    }

    pub fn scheduler_dir(&self) -> PathBuf {
        self.root.join(SCHEDULER_DIR)
    }

    /// Certificate directory mounted into the shared proxy
    pub fn certs_dir(&self) -> PathBuf {
        self.proxy_dir().join("certs")
    }

    pub fn backups_dir(&self, name: &str) -> PathBuf {
        self.root.join(BACKUPS_DIR).join(name)
    }

    /// All environment names, sorted for deterministic output.
    ///
    /// Reserved infrastructure directories and hidden entries are not
    /// environments.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || RESERVED_NAMES.contains(&name.as_str()) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Number of backup files recorded for `name`.
    pub fn backup_count(&self, name: &str) -> usize {
        let dir = self.backups_dir(name);
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "sql"))
                .count(),
            Err(_) => 0,
        }
    }

    /// Write a full artifact set under `dir`, creating the project layout.
    ///
    /// Artifacts are always written as a complete set; helper scripts and
    /// the image entrypoint get the executable bit.
    pub fn write_artifacts(&self, dir: &Path, artifacts: &ArtifactSet) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for file in &artifacts.files {
            let target = dir.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &file.contents)?;
            if file.executable {
                set_executable(&target)?;
            }
        }
        debug!(dir = %dir.display(), files = artifacts.files.len(), "Wrote artifact set");
        Ok(())
    }

    /// Create the mutable site directories the containers mount.
    pub fn create_site_dirs(&self, name: &str) -> Result<()> {
        let dir = self.env_dir(name);
        for sub in ["app", "data", "logs"] {
            std::fs::create_dir_all(dir.join(sub))?;
        }
        Ok(())
    }

    /// Parse the site's `.env` runtime configuration into a key/value map.
    pub fn load_env_file(&self, name: &str) -> Option<BTreeMap<String, String>> {
        let content = std::fs::read_to_string(self.env_dir(name).join(".env")).ok()?;
        let mut values = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Some(values)
    }

    /// Credentials persisted in the site's `.env`, when present.
    ///
    /// Used to re-render artifacts without regenerating secrets.
    pub fn load_credentials(&self, name: &str) -> Option<Credentials> {
        let values = self.load_env_file(name)?;
        Some(Credentials {
            db_password: values.get("DB_PASSWORD")?.clone(),
            db_root_password: values.get("DB_ROOT_PASSWORD")?.clone(),
            cache_password: values.get("CACHE_PASSWORD").cloned(),
        })
    }

    /// Remove an environment's directory subtree.
    pub fn remove_environment(&self, name: &str) -> Result<()> {
        let dir = self.env_dir(name);
        if !dir.is_dir() {
            return Err(SiteError::NotFound(name.to_string()));
        }
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::RenderedFile;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_list_skips_reserved_and_sorts() {
        let (_dir, store) = store();
        for name in ["zeta", "alpha", PROXY_DIR, MAIL_DIR, SCHEDULER_DIR, BACKUPS_DIR] {
            std::fs::create_dir_all(store.root().join(name)).unwrap();
        }
        std::fs::write(store.root().join("stray-file"), "").unwrap();

        assert_eq!(store.list().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_write_artifacts_creates_nested_paths() {
        let (_dir, store) = store();
        let artifacts = ArtifactSet {
            files: vec![
                RenderedFile {
                    path: PathBuf::from("docker-compose.yml"),
                    contents: "services: {}\n".to_string(),
                    executable: false,
                },
                RenderedFile {
                    path: PathBuf::from("build/entrypoint.sh"),
                    contents: "#!/bin/sh\n".to_string(),
                    executable: true,
                },
            ],
        };

        let dir = store.env_dir("demo-site");
        store.write_artifacts(&dir, &artifacts).unwrap();
        assert!(dir.join("docker-compose.yml").is_file());
        assert!(dir.join("build/entrypoint.sh").is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.join("build/entrypoint.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_env_file_round_trip() {
        let (_dir, store) = store();
        let dir = store.env_dir("demo-site");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(".env"),
            "# comment\nDB_PASSWORD=abc\nDB_ROOT_PASSWORD=def\nCACHE_PASSWORD=ghi\nDB_NAME=demo_site\n",
        )
        .unwrap();

        let values = store.load_env_file("demo-site").unwrap();
        assert_eq!(values.get("DB_NAME").unwrap(), "demo_site");

        let creds = store.load_credentials("demo-site").unwrap();
        assert_eq!(creds.db_password, "abc");
        assert_eq!(creds.db_root_password, "def");
        assert_eq!(creds.cache_password.as_deref(), Some("ghi"));
    }

    #[test]
    fn test_backup_count_ignores_non_sql() {
        let (_dir, store) = store();
        let backups = store.backups_dir("demo-site");
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(backups.join("demo-site_2026-01-01_00-00-00.sql"), "").unwrap();
        std::fs::write(backups.join("notes.txt"), "").unwrap();

        assert_eq!(store.backup_count("demo-site"), 1);
        assert_eq!(store.backup_count("missing"), 0);
    }

    #[test]
    fn test_remove_missing_environment_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.remove_environment("ghost"),
            Err(SiteError::NotFound(_))
        ));
    }
}
