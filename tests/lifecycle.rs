//! End-to-end lifecycle tests against a mock container runtime

use async_trait::async_trait;
use parking_lot::Mutex;
use siteforge::backup::{BackupOutcome, BackupRunner};
use siteforge::config::Config;
use siteforge::error::{Result as SiteResult, SiteError};
use siteforge::fleet::{ExecOutput, FleetDriver};
use siteforge::orchestrator::{CreateRequest, Orchestrator};
use siteforge::site::{DatabaseEngine, EnvironmentSpec, SourceMode};
use siteforge::store::Store;
use siteforge::templates;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// In-memory stand-in for the container runtime.
///
/// `up` marks the project's containers as running; `exec` plays back a
/// canned dump. Failures can be injected per project basename.
#[derive(Default)]
struct MockFleet {
    containers: Mutex<HashSet<String>>,
    fail_down_for: Mutex<HashSet<String>>,
    ups: Mutex<Vec<String>>,
}

impl MockFleet {
    fn basename(env_dir: &Path) -> String {
        env_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn fail_down(&self, basename: &str) {
        self.fail_down_for.lock().insert(basename.to_string());
    }

    fn up_count(&self) -> usize {
        self.ups.lock().len()
    }
}

#[async_trait]
impl FleetDriver for MockFleet {
    async fn up(&self, env_dir: &Path) -> SiteResult<()> {
        let base = Self::basename(env_dir);
        self.ups.lock().push(base.clone());
        let mut containers = self.containers.lock();
        containers.insert(format!("{}-app", base));
        containers.insert(format!("{}-db", base));
        Ok(())
    }

    async fn down(&self, env_dir: &Path) -> SiteResult<()> {
        let base = Self::basename(env_dir);
        if self.fail_down_for.lock().contains(&base) {
            return Err(SiteError::FleetOperationFailed {
                operation: "compose down".to_string(),
                target: base,
                code: 1,
            });
        }
        self.containers
            .lock()
            .retain(|name| !name.starts_with(&format!("{}-", base)));
        Ok(())
    }

    async fn is_running(&self, name_prefix: &str) -> SiteResult<bool> {
        Ok(self
            .containers
            .lock()
            .iter()
            .any(|name| name.starts_with(name_prefix)))
    }

    async fn exec(
        &self,
        container: &str,
        _cmd: &[String],
        _env: &[String],
    ) -> SiteResult<ExecOutput> {
        if !self.is_running(container).await? {
            return Err(SiteError::RuntimeUnavailable(format!(
                "no such container: {}",
                container
            )));
        }
        Ok(ExecOutput {
            stdout: "-- SQL dump\nCREATE TABLE example (id INT);\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn ensure_network(&self, _name: &str) -> SiteResult<()> {
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    root: PathBuf,
    fleet: Arc<MockFleet>,
    orchestrator: Orchestrator,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let hosts_file = root.join("test-hosts");
    std::fs::write(&hosts_file, "127.0.0.1\tlocalhost\n").unwrap();

    let config = Config {
        domain_suffix: "local".to_string(),
        network: "siteforge".to_string(),
        hosts_file,
        backup_retention_days: 7,
        // Fail the readiness poll fast: one attempt against a closed port
        readiness_attempts: 1,
        readiness_interval_secs: 0,
        backup_schedule: "0 3 * * *".to_string(),
        proxy_http_port: 59999,
        proxy_https_port: 59998,
    };

    let store = Store::open(&root).unwrap();
    let fleet = Arc::new(MockFleet::default());
    let orchestrator = Orchestrator::new(store, config, fleet.clone());

    Harness {
        _dir: dir,
        root,
        fleet,
        orchestrator,
    }
}

fn demo_request() -> CreateRequest {
    CreateRequest {
        name: "Demo Site".to_string(),
        engine: DatabaseEngine::Mariadb,
        cache_enabled: true,
        source_mode: SourceMode::FreshScaffold,
    }
}

#[tokio::test]
async fn test_create_normalizes_provisions_and_lists() {
    let h = harness();

    let report = h.orchestrator.create(demo_request()).await.unwrap();
    assert_eq!(report.name, "demo-site");
    assert_eq!(report.url, "https://demo-site.local");
    assert_eq!(report.admin_url, "https://admin.demo-site.local");
    assert!(report.credentials.cache_password.is_some());

    // Full artifact set on disk
    let env_dir = h.root.join("demo-site");
    for file in [
        "docker-compose.yml",
        ".env",
        "build/Dockerfile",
        "build/nginx.conf",
        "build/supervisord.conf",
        "build/entrypoint.sh",
        "shell.sh",
        "db.sh",
        "logs.sh",
        "app/index.php",
    ] {
        assert!(env_dir.join(file).is_file(), "missing {}", file);
    }
    for dir in ["app", "data", "logs"] {
        assert!(env_dir.join(dir).is_dir());
    }

    // Three services plus the admin tool
    let compose = std::fs::read_to_string(env_dir.join("docker-compose.yml")).unwrap();
    for service in ["demo-site-app", "demo-site-db", "demo-site-cache", "demo-site-admin"] {
        assert!(compose.contains(service), "missing service {}", service);
    }

    // Certificates for the site and its admin host-name
    for host in ["demo-site.local", "admin.demo-site.local"] {
        for ext in ["key", "crt", "pem"] {
            let path = h.root.join("proxy/certs").join(format!("{}.{}", host, ext));
            assert!(path.is_file(), "missing {}", path.display());
        }
    }

    // Host-names registered against loopback
    let hosts = std::fs::read_to_string(h.root.join("test-hosts")).unwrap();
    assert!(hosts.contains("demo-site.local"));
    assert!(hosts.contains("admin.demo-site.local"));

    // Running with no backups yet
    let statuses = h.orchestrator.list().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].name, "demo-site");
    assert!(statuses[0].running);
    assert_eq!(statuses[0].backups, 0);

    // A backup raises the count to one
    let outcome = h.orchestrator.backups().backup_one("demo-site").await.unwrap();
    assert!(matches!(outcome, BackupOutcome::Written { .. }));
    let statuses = h.orchestrator.list().await.unwrap();
    assert_eq!(statuses[0].backups, 1);
}

#[tokio::test]
async fn test_create_twice_rejects_and_keeps_artifacts() {
    let h = harness();

    h.orchestrator.create(demo_request()).await.unwrap();
    let env_dir = h.root.join("demo-site");
    let compose_before = std::fs::read_to_string(env_dir.join("docker-compose.yml")).unwrap();
    let env_before = std::fs::read_to_string(env_dir.join(".env")).unwrap();

    let err = h.orchestrator.create(demo_request()).await.unwrap_err();
    assert!(matches!(err, SiteError::AlreadyExists(name) if name == "demo-site"));

    // The first environment's artifacts are untouched
    let compose_after = std::fs::read_to_string(env_dir.join("docker-compose.yml")).unwrap();
    let env_after = std::fs::read_to_string(env_dir.join(".env")).unwrap();
    assert_eq!(compose_before, compose_after);
    assert_eq!(env_before, env_after);
}

#[tokio::test]
async fn test_rerender_with_persisted_credentials_is_byte_identical() {
    let h = harness();
    h.orchestrator.create(demo_request()).await.unwrap();

    let store = Store::open(&h.root).unwrap();
    let credentials = store.load_credentials("demo-site").unwrap();
    let spec = EnvironmentSpec::new(
        "demo-site",
        "local",
        DatabaseEngine::Mariadb,
        true,
        SourceMode::FreshScaffold,
        credentials,
    );
    let rendered = templates::render_site(&spec, "siteforge");

    let env_dir = h.root.join("demo-site");
    for file in &rendered.files {
        let on_disk = std::fs::read_to_string(env_dir.join(&file.path)).unwrap();
        assert_eq!(
            on_disk,
            file.contents,
            "re-render differs for {}",
            file.path.display()
        );
    }
}

#[tokio::test]
async fn test_create_rejects_invalid_names_without_side_effects() {
    let h = harness();

    let mut request = demo_request();
    request.name = "   ".to_string();
    let err = h.orchestrator.create(request).await.unwrap_err();
    assert!(matches!(err, SiteError::Validation { .. }));

    assert!(Store::open(&h.root).unwrap().list().unwrap().is_empty());
    assert_eq!(h.fleet.up_count(), 0);
}

#[tokio::test]
async fn test_delete_unknown_name_is_not_found_and_mutates_nothing() {
    let h = harness();
    h.orchestrator.create(demo_request()).await.unwrap();

    let before: Vec<_> = std::fs::read_dir(&h.root)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();

    let err = h.orchestrator.delete("ghost", true).await.unwrap_err();
    assert!(matches!(err, SiteError::NotFound(name) if name == "ghost"));

    let after: Vec<_> = std::fs::read_dir(&h.root)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_delete_requires_confirmation() {
    let h = harness();
    h.orchestrator.create(demo_request()).await.unwrap();

    let err = h.orchestrator.delete("demo-site", false).await.unwrap_err();
    assert!(matches!(err, SiteError::Validation { .. }));
    assert!(h.root.join("demo-site").is_dir());
}

#[tokio::test]
async fn test_delete_takes_final_backup_and_unregisters() {
    let h = harness();
    h.orchestrator.create(demo_request()).await.unwrap();

    let warnings = h.orchestrator.delete("demo-site", true).await.unwrap();
    assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);

    assert!(!h.root.join("demo-site").exists());
    // The final dump survives deletion
    let store = Store::open(&h.root).unwrap();
    assert_eq!(store.backup_count("demo-site"), 1);

    let hosts = std::fs::read_to_string(h.root.join("test-hosts")).unwrap();
    assert!(!hosts.contains("demo-site.local"));
    assert!(hosts.contains("localhost"));
}

#[tokio::test]
async fn test_backup_skipped_when_database_not_running() {
    let h = harness();
    h.orchestrator.create(demo_request()).await.unwrap();
    h.orchestrator.stop("demo-site").await.unwrap();

    let outcome = h.orchestrator.backups().backup_one("demo-site").await.unwrap();
    assert!(matches!(outcome, BackupOutcome::Skipped { .. }));

    // Skipped means no dump file was created
    let store = Store::open(&h.root).unwrap();
    assert_eq!(store.backup_count("demo-site"), 0);
}

#[tokio::test]
async fn test_backup_unknown_name_is_not_found() {
    let h = harness();
    let err = h.orchestrator.backups().backup_one("ghost").await.unwrap_err();
    assert!(matches!(err, SiteError::NotFound(_)));
}

#[tokio::test]
async fn test_retention_prunes_exactly_the_expired_files() {
    let h = harness();
    let store = Store::open(&h.root).unwrap();
    let runner = BackupRunner::new(store, h.fleet.clone(), 7);

    let backups = h.root.join("backups/demo-site");
    std::fs::create_dir_all(&backups).unwrap();

    let now = SystemTime::now();
    let day = Duration::from_secs(24 * 60 * 60);
    let ages = [(0u64, "day0"), (6, "day6"), (8, "day8"), (10, "day10")];
    for (days, label) in ages {
        let path = backups.join(format!("demo-site_{}.sql", label));
        std::fs::write(&path, "-- dump\n").unwrap();
        let mtime = now - day * days as u32;
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_times(std::fs::FileTimes::new().set_modified(mtime))
            .unwrap();
    }

    let pruned = runner.prune(now).unwrap();
    assert_eq!(pruned.len(), 2);

    assert!(backups.join("demo-site_day0.sql").exists());
    assert!(backups.join("demo-site_day6.sql").exists());
    assert!(!backups.join("demo-site_day8.sql").exists());
    assert!(!backups.join("demo-site_day10.sql").exists());
}

#[tokio::test]
async fn test_start_all_on_empty_store_brings_up_singletons_only() {
    let h = harness();

    let report = h.orchestrator.start_all().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert!(report.is_ok());

    // Exactly the three shared stacks were brought up
    let ups = h.fleet.ups.lock().clone();
    assert_eq!(ups, vec!["proxy", "mail", "scheduler"]);
    assert!(h.root.join("proxy/docker-compose.yml").is_file());
    assert!(h.root.join("mail/docker-compose.yml").is_file());
    assert!(h.root.join("scheduler/siteforge.cron").is_file());
}

#[tokio::test]
async fn test_stop_all_continues_past_individual_failures() {
    let h = harness();

    let mut request = demo_request();
    request.name = "alpha".to_string();
    h.orchestrator.create(request).await.unwrap();

    let mut request = demo_request();
    request.name = "beta".to_string();
    h.orchestrator.create(request).await.unwrap();

    h.fleet.fail_down("alpha");

    let report = h.orchestrator.stop_all().await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "alpha");
    // beta still got stopped
    assert!(!h.fleet.is_running("beta-").await.unwrap());
}

#[tokio::test]
async fn test_postgres_site_renders_engine_specific_stack() {
    let h = harness();

    let request = CreateRequest {
        name: "pg-site".to_string(),
        engine: DatabaseEngine::Postgres,
        cache_enabled: false,
        source_mode: SourceMode::ImportedExisting,
    };
    let report = h.orchestrator.create(request).await.unwrap();
    assert!(report.credentials.cache_password.is_none());

    let env_dir = h.root.join("pg-site");
    let compose = std::fs::read_to_string(env_dir.join("docker-compose.yml")).unwrap();
    assert!(compose.contains("postgres:16-alpine"));
    assert!(compose.contains("adminer"));
    assert!(!compose.contains("redis"));

    // Imported mode leaves the app tree to the operator
    assert!(env_dir.join("app").is_dir());
    assert!(!env_dir.join("app/index.php").exists());
}
