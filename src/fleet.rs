//! Container fleet driver
//!
//! Narrow seam over the container runtime so the orchestrator can be
//! exercised against a mock. The concrete binding drives compose-style
//! lifecycle operations through the `docker compose` CLI and uses the
//! Docker API for process listing, exec and the shared network.

use crate::error::{Result, SiteError};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, LogOutput};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures::StreamExt;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Captured output of a command executed inside a container
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Uniform lifecycle operations against one compose project at a time.
///
/// All operations are synchronous from the caller's perspective. Interactive
/// terminal semantics are not part of this API; the rendered helper scripts
/// cover that from the shell.
#[async_trait]
pub trait FleetDriver: Send + Sync {
    /// Bring the project in `env_dir` up (detached, building as needed)
    async fn up(&self, env_dir: &Path) -> Result<()>;

    /// Tear the project in `env_dir` down
    async fn down(&self, env_dir: &Path) -> Result<()>;

    /// Whether any running container's name starts with `name_prefix`
    async fn is_running(&self, name_prefix: &str) -> Result<bool>;

    /// Run `cmd` inside `container`, collecting output and exit code.
    /// `env` entries are `KEY=VALUE` pairs.
    async fn exec(&self, container: &str, cmd: &[String], env: &[String]) -> Result<ExecOutput>;

    /// Create the shared bridge network unless it already exists
    async fn ensure_network(&self, name: &str) -> Result<()>;
}

/// Compose project name for an environment directory.
///
/// Prefixed so site projects never collide with unrelated compose projects
/// that happen to share a directory basename.
pub fn project_name(env_dir: &Path) -> String {
    let base = env_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "site".to_string());
    format!("siteforge-{}", base)
}

/// Concrete driver bound to the local Docker daemon.
pub struct DockerFleet {
    docker: Docker,
}

impl DockerFleet {
    /// Connect to the Docker daemon.
    ///
    /// Honors `DOCKER_HOST` (unix or tcp), otherwise falls back to the
    /// platform socket defaults, and verifies the daemon responds.
    pub async fn connect() -> Result<Self> {
        let docker = match std::env::var("DOCKER_HOST") {
            Ok(host) if host.starts_with("unix://") => Docker::connect_with_socket(
                host.trim_start_matches("unix://"),
                120,
                bollard::API_DEFAULT_VERSION,
            ),
            Ok(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(&host, 120, bollard::API_DEFAULT_VERSION)
            }
            Ok(host) => {
                return Err(SiteError::RuntimeUnavailable(format!(
                    "invalid DOCKER_HOST '{}': expected unix:// or tcp://",
                    host
                )))
            }
            Err(_) => Docker::connect_with_socket_defaults(),
        }
        .map_err(|e| SiteError::RuntimeUnavailable(e.to_string()))?;

        docker.ping().await.map_err(|e| {
            SiteError::RuntimeUnavailable(format!(
                "docker daemon is not responding: {}. Is Docker running?",
                e
            ))
        })?;

        debug!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    async fn compose(&self, env_dir: &Path, args: &[&str], operation: &str) -> Result<()> {
        let project = project_name(env_dir);
        let output = Command::new("docker")
            .arg("compose")
            .arg("--project-name")
            .arg(&project)
            .arg("--project-directory")
            .arg(env_dir)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                SiteError::RuntimeUnavailable(format!("cannot run docker compose: {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                project,
                operation,
                stderr = %stderr.trim(),
                "Compose operation failed"
            );
            return Err(SiteError::FleetOperationFailed {
                operation: operation.to_string(),
                target: project,
                code: output.status.code().unwrap_or(-1) as i64,
            });
        }

        debug!(project, operation, "Compose operation complete");
        Ok(())
    }
}

#[async_trait]
impl FleetDriver for DockerFleet {
    async fn up(&self, env_dir: &Path) -> Result<()> {
        self.compose(env_dir, &["up", "-d", "--build"], "compose up")
            .await
    }

    async fn down(&self, env_dir: &Path) -> Result<()> {
        self.compose(env_dir, &["down"], "compose down").await
    }

    async fn is_running(&self, name_prefix: &str) -> Result<bool> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| SiteError::RuntimeUnavailable(e.to_string()))?;

        Ok(containers.iter().any(|c| {
            c.names.as_deref().unwrap_or_default().iter().any(|name| {
                name.trim_start_matches('/').starts_with(name_prefix)
            })
        }))
    }

    async fn exec(&self, container: &str, cmd: &[String], env: &[String]) -> Result<ExecOutput> {
        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            env: (!env.is_empty()).then(|| env.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(|e| {
                SiteError::RuntimeUnavailable(format!("exec in '{}' failed: {}", container, e))
            })?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        let start = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| {
                SiteError::RuntimeUnavailable(format!("exec in '{}' failed: {}", container, e))
            })?;

        if let StartExecResults::Attached { mut output, .. } = start {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(SiteError::RuntimeUnavailable(format!(
                            "exec stream from '{}' failed: {}",
                            container, e
                        )))
                    }
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SiteError::RuntimeUnavailable(e.to_string()))?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        debug!(container, exit_code, "Exec complete");
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        match self.docker.inspect_network::<String>(name, None).await {
            Ok(_) => {
                debug!(network = name, "Shared network already exists");
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(SiteError::RuntimeUnavailable(e.to_string())),
        }

        info!(network = name, "Creating shared network");
        self.docker
            .create_network(CreateNetworkOptions {
                name,
                driver: "bridge",
                ..Default::default()
            })
            .await
            .map_err(|e| SiteError::RuntimeUnavailable(e.to_string()))?;

        Ok(())
    }
}
