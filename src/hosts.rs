//! Loopback host-name registration in the static resolution table
//!
//! Entries written by this tool carry a trailing marker comment so removal
//! only ever touches lines this tool owns. Writing `/etc/hosts` requires
//! elevated privilege; callers treat failures here as warnings, not fatal
//! errors.

use crate::error::SiteError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Marker identifying lines managed by this tool
const MARKER: &str = "# siteforge";

/// The hosts file is shared mutable state; serialize all writers in-process.
static HOSTS_GUARD: Mutex<()> = Mutex::new(());

/// Adds and removes loopback mappings in a hosts file.
pub struct HostsRegistrar {
    path: PathBuf,
}

impl HostsRegistrar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map each host-name to 127.0.0.1, skipping names already present.
    ///
    /// Idempotent and order-independent: repeated calls never accumulate
    /// duplicate lines.
    pub fn add(&self, hosts: &[&str]) -> Result<(), SiteError> {
        let _guard = HOSTS_GUARD.lock();

        let content = self.read()?;
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let mut added = 0usize;

        for host in hosts {
            if lines.iter().any(|line| line_maps_host(line, host)) {
                debug!(host, "Host-name already registered");
                continue;
            }
            lines.push(format!("127.0.0.1\t{}\t{}", host, MARKER));
            added += 1;
        }

        if added > 0 {
            self.write(&lines)?;
            info!(added, path = %self.path.display(), "Registered host-names");
        }
        Ok(())
    }

    /// Drop the managed mapping for `host`, if any.
    ///
    /// Lines without the marker are left untouched even when they mention
    /// the host-name.
    pub fn remove(&self, host: &str) -> Result<(), SiteError> {
        let _guard = HOSTS_GUARD.lock();

        let content = self.read()?;
        let lines: Vec<String> = content
            .lines()
            .filter(|line| !(line.contains(MARKER) && line_maps_host(line, host)))
            .map(str::to_string)
            .collect();

        if lines.len() != content.lines().count() {
            self.write(&lines)?;
            info!(host, path = %self.path.display(), "Removed host-name registration");
        }
        Ok(())
    }

    /// Whether a mapping for `host` exists (managed or not)
    pub fn contains(&self, host: &str) -> Result<bool, SiteError> {
        let content = self.read()?;
        Ok(content.lines().any(|line| line_maps_host(line, host)))
    }

    fn read(&self) -> Result<String, SiteError> {
        std::fs::read_to_string(&self.path).map_err(|e| {
            SiteError::RegistrationFailed(format!("cannot read {}: {}", self.path.display(), e))
        })
    }

    fn write(&self, lines: &[String]) -> Result<(), SiteError> {
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(&self.path, content).map_err(|e| {
            SiteError::RegistrationFailed(format!(
                "cannot write {} (are you root?): {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// True when the line is an active mapping whose host column matches exactly.
fn line_maps_host(line: &str, host: &str) -> bool {
    let line = line.trim();
    if line.starts_with('#') {
        return false;
    }
    let without_comment = line.split('#').next().unwrap_or("");
    let mut fields = without_comment.split_whitespace();
    // First field is the address; any later field may be the host-name
    fields.next().is_some() && fields.any(|field| field == host)
}
