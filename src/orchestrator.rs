//! Lifecycle orchestration: the top-level coordinator behind every command

use crate::backup::{BackupOutcome, BackupRunner};
use crate::certs::CertProvisioner;
use crate::config::Config;
use crate::credentials;
use crate::error::{Result, SiteError};
use crate::fleet::FleetDriver;
use crate::hosts::HostsRegistrar;
use crate::infra::SharedInfra;
use crate::site::{self, Credentials, DatabaseEngine, EnvironmentSpec, SourceMode};
use crate::store::Store;
use crate::templates;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters for creating one environment
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub engine: DatabaseEngine,
    pub cache_enabled: bool,
    pub source_mode: SourceMode,
}

/// What `create` hands back to the caller
#[derive(Debug)]
pub struct CreateReport {
    pub name: String,
    pub url: String,
    pub admin_url: String,
    pub credentials: Credentials,
    /// Non-fatal problems the operator must know about
    pub warnings: Vec<String>,
}

/// One row of `list` output
#[derive(Debug, Serialize)]
pub struct SiteStatus {
    pub name: String,
    pub running: bool,
    pub backups: usize,
}

/// Aggregated result of a start-all/stop-all sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    pub attempted: usize,
    /// (environment or step, error) pairs collected without aborting
    pub failures: Vec<(String, String)>,
}

impl SweepReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Orchestrator {
    store: Store,
    config: Config,
    fleet: Arc<dyn FleetDriver>,
    certs: CertProvisioner,
    hosts: HostsRegistrar,
    infra: SharedInfra,
    backups: BackupRunner,
}

impl Orchestrator {
    pub fn new(store: Store, config: Config, fleet: Arc<dyn FleetDriver>) -> Self {
        let certs = CertProvisioner::new(store.certs_dir());
        let hosts = HostsRegistrar::new(&config.hosts_file);
        let infra = SharedInfra::new(store.clone(), config.clone(), fleet.clone());
        let backups = BackupRunner::new(store.clone(), fleet.clone(), config.backup_retention_days);
        Self {
            store,
            config,
            fleet,
            certs,
            hosts,
            infra,
            backups,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backups(&self) -> &BackupRunner {
        &self.backups
    }

    /// Ensure shared network, singleton stacks and baseline proxy TLS.
    ///
    /// Safe to call repeatedly; returns warnings for the non-fatal parts.
    pub async fn setup(&self) -> Result<Vec<String>> {
        self.infra.setup().await?;

        let mail_domain = self.config.mail_domain();
        self.certs.provision(&mail_domain)?;

        let mut warnings = Vec::new();
        if let Err(e) = self.hosts.add(&[mail_domain.as_str()]) {
            warn!(error = %e, "Mail host-name not registered");
            warnings.push(format!("mail host-name not registered: {}", e));
        }
        Ok(warnings)
    }

    /// Create a new environment and bring it up.
    ///
    /// Certificates are provisioned before the store is touched, so a
    /// provisioning failure leaves no trace; a failure while writing
    /// artifacts rolls the partial directory back so `create` can simply
    /// be retried.
    pub async fn create(&self, request: CreateRequest) -> Result<CreateReport> {
        let name = site::normalize_name(&request.name)?;
        if self.store.exists(&name) {
            return Err(SiteError::AlreadyExists(name));
        }

        let credentials = credentials::generate_set(request.cache_enabled);
        let spec = EnvironmentSpec::new(
            &name,
            &self.config.domain_suffix,
            request.engine,
            request.cache_enabled,
            request.source_mode,
            credentials,
        );
        let admin_domain = spec.admin_domain();

        self.certs.provision(&spec.domain)?;
        self.certs.provision(&admin_domain)?;

        if let Err(e) = self.materialize(&name, &spec) {
            let _ = std::fs::remove_dir_all(self.store.env_dir(&name));
            return Err(e);
        }

        let mut warnings = Vec::new();
        if let Err(e) = self.hosts.add(&[spec.domain.as_str(), admin_domain.as_str()]) {
            warn!(site = %name, error = %e, "Host-names not registered");
            warnings.push(format!(
                "host-names not registered, add them manually: {}",
                e
            ));
        }

        self.fleet.up(&self.store.env_dir(&name)).await?;

        if !self.wait_ready(&spec.domain).await {
            warnings.push(format!(
                "{} did not answer through the proxy after {} attempts; it may still be starting",
                spec.domain, self.config.readiness_attempts
            ));
        }

        info!(site = %name, domain = %spec.domain, "Environment created");
        Ok(CreateReport {
            name,
            url: format!("https://{}", spec.domain),
            admin_url: format!("https://{}", admin_domain),
            credentials: spec.credentials,
            warnings,
        })
    }

    /// Write the artifact set and the mutable site directories.
    fn materialize(&self, name: &str, spec: &EnvironmentSpec) -> Result<()> {
        let artifacts = templates::render_site(spec, &self.config.network);
        let dir = self.store.env_dir(name);
        self.store.write_artifacts(&dir, &artifacts)?;
        self.store.create_site_dirs(name)?;

        if spec.source_mode == SourceMode::FreshScaffold {
            std::fs::write(dir.join("app/index.php"), templates::scaffold_index(spec))?;
        }
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        let name = site::normalize_name(name)?;
        if !self.store.exists(&name) {
            return Err(SiteError::NotFound(name));
        }
        self.fleet.up(&self.store.env_dir(&name)).await
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        let name = site::normalize_name(name)?;
        if !self.store.exists(&name) {
            return Err(SiteError::NotFound(name));
        }
        self.fleet.down(&self.store.env_dir(&name)).await
    }

    /// Bring the singletons and every stored environment up.
    pub async fn start_all(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        if let Err(e) = self.infra.setup().await {
            report.failures.push(("shared infrastructure".to_string(), e.to_string()));
        }

        for name in self.store.list()? {
            report.attempted += 1;
            if let Err(e) = self.fleet.up(&self.store.env_dir(&name)).await {
                warn!(site = %name, error = %e, "Start failed, continuing sweep");
                report.failures.push((name, e.to_string()));
            }
        }
        Ok(report)
    }

    /// Stop every stored environment, then the singletons.
    pub async fn stop_all(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for name in self.store.list()? {
            report.attempted += 1;
            if let Err(e) = self.fleet.down(&self.store.env_dir(&name)).await {
                warn!(site = %name, error = %e, "Stop failed, continuing sweep");
                report.failures.push((name, e.to_string()));
            }
        }

        if let Err(e) = self.infra.down_all().await {
            report.failures.push(("shared infrastructure".to_string(), e.to_string()));
        }
        Ok(report)
    }

    /// Status of every environment, ordered by name.
    pub async fn list(&self) -> Result<Vec<SiteStatus>> {
        let mut statuses = Vec::new();
        for name in self.store.list()? {
            let running = match self.fleet.is_running(&format!("{}-", name)).await {
                Ok(running) => running,
                Err(e) => {
                    warn!(site = %name, error = %e, "Cannot query container state");
                    false
                }
            };
            let backups = self.store.backup_count(&name);
            statuses.push(SiteStatus {
                name,
                running,
                backups,
            });
        }
        Ok(statuses)
    }

    /// Remove an environment after a final best-effort backup.
    ///
    /// The dump is taken before the containers stop, otherwise there would
    /// never be a database to dump. A failed or skipped backup is reported
    /// as a warning and deletion proceeds; a failed teardown aborts so a
    /// half-running environment is never removed from disk.
    pub async fn delete(&self, name: &str, confirmed: bool) -> Result<Vec<String>> {
        let name = site::normalize_name(name)?;
        if !self.store.exists(&name) {
            return Err(SiteError::NotFound(name));
        }
        if !confirmed {
            return Err(SiteError::Validation {
                name,
                reason: "deletion requires confirmation".to_string(),
            });
        }

        let mut warnings = Vec::new();
        match self.backups.backup_one(&name).await {
            Ok(BackupOutcome::Written { path }) => {
                info!(site = %name, path = %path.display(), "Final backup written");
            }
            Ok(BackupOutcome::Skipped { reason }) => {
                warnings.push(format!("no final backup taken: {}", reason));
            }
            Err(e) => {
                warn!(site = %name, error = %e, "Final backup failed, deleting anyway");
                warnings.push(format!(
                    "final backup failed ({}); environment deleted without a fresh dump",
                    e
                ));
            }
        }

        self.fleet.down(&self.store.env_dir(&name)).await?;
        self.store.remove_environment(&name)?;

        let domain = format!("{}.{}", name, self.config.domain_suffix);
        for host in [domain.clone(), format!("admin.{}", domain)] {
            if let Err(e) = self.hosts.remove(&host) {
                warnings.push(format!("host-name '{}' not removed: {}", host, e));
            }
        }

        info!(site = %name, "Environment deleted");
        Ok(warnings)
    }

    /// Poll the proxy until the site answers or the attempt budget is spent.
    async fn wait_ready(&self, domain: &str) -> bool {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.config.proxy_http_port));
        let client = match reqwest::Client::builder()
            .resolve(domain, addr)
            .timeout(Duration::from_secs(5))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Cannot build readiness client");
                return false;
            }
        };

        let url = format!("http://{}/", domain);
        for attempt in 1..=self.config.readiness_attempts {
            match client.get(&url).send().await {
                // The proxy answers 502 until the app container is up
                Ok(response) if response.status().as_u16() < 500 => {
                    debug!(domain, attempt, "Site answered through the proxy");
                    return true;
                }
                Ok(response) => {
                    debug!(domain, attempt, status = response.status().as_u16(), "Not ready yet");
                }
                Err(e) => {
                    debug!(domain, attempt, error = %e, "Not ready yet");
                }
            }
            tokio::time::sleep(Duration::from_secs(self.config.readiness_interval_secs)).await;
        }
        false
    }
}
