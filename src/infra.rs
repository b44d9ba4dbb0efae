//! Shared infrastructure singletons: proxy, mail capture, backup scheduler
//!
//! Each singleton is a compose project in a fixed subdirectory of the store
//! root. Bringing one up is idempotent: artifacts are re-rendered in place
//! and `compose up` only touches containers whose definition changed, so a
//! healthy singleton is never restarted by a repeated `setup`.

use crate::config::Config;
use crate::error::Result;
use crate::fleet::FleetDriver;
use crate::store::Store;
use crate::templates::{self, InfraSpec};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SharedInfra {
    store: Store,
    config: Config,
    fleet: Arc<dyn FleetDriver>,
}

impl SharedInfra {
    pub fn new(store: Store, config: Config, fleet: Arc<dyn FleetDriver>) -> Self {
        Self {
            store,
            config,
            fleet,
        }
    }

    fn infra_spec(&self) -> InfraSpec {
        let binary_path = std::env::current_exe().unwrap_or_else(|e| {
            warn!(error = %e, "Cannot resolve running binary, scheduler mount falls back");
            PathBuf::from("/usr/local/bin/siteforge")
        });
        InfraSpec {
            network: self.config.network.clone(),
            domain_suffix: self.config.domain_suffix.clone(),
            http_port: self.config.proxy_http_port,
            https_port: self.config.proxy_https_port,
            schedule: self.config.backup_schedule.clone(),
            store_root: self.store.root().to_path_buf(),
            binary_path,
        }
    }

    /// Ensure the shared network and all three singleton stacks are up.
    pub async fn setup(&self) -> Result<()> {
        self.fleet.ensure_network(&self.config.network).await?;
        self.write_stacks()?;
        self.up_all().await
    }

    /// Render and persist the three singleton projects.
    fn write_stacks(&self) -> Result<()> {
        let spec = self.infra_spec();

        // The proxy mounts certs/ read-only; it must exist before first up.
        std::fs::create_dir_all(self.store.certs_dir())?;

        self.store
            .write_artifacts(&self.store.proxy_dir(), &templates::render_proxy(&spec))?;
        self.store
            .write_artifacts(&self.store.mail_dir(), &templates::render_mail(&spec))?;
        self.store.write_artifacts(
            &self.store.scheduler_dir(),
            &templates::render_scheduler(&spec),
        )?;
        Ok(())
    }

    /// Bring the singletons up: proxy first, scheduler last.
    pub async fn up_all(&self) -> Result<()> {
        for dir in [
            self.store.proxy_dir(),
            self.store.mail_dir(),
            self.store.scheduler_dir(),
        ] {
            self.fleet.up(&dir).await?;
        }
        info!("Shared infrastructure is up");
        Ok(())
    }

    /// Stop the singletons in reverse bring-up order.
    pub async fn down_all(&self) -> Result<()> {
        for dir in [
            self.store.scheduler_dir(),
            self.store.mail_dir(),
            self.store.proxy_dir(),
        ] {
            self.fleet.down(&dir).await?;
        }
        info!("Shared infrastructure is down");
        Ok(())
    }
}
