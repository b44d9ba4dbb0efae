//! Artifact rendering for sites and shared infrastructure
//!
//! Everything here is a pure function from a spec value to text: the same
//! inputs always produce byte-identical output. Compose manifests are built
//! from typed structs over ordered maps and serialized once, never string-
//! interpolated, so engine and cache branching stays exhaustively checked.
//! Secrets appear in rendered compose text only as `${VAR}` references
//! resolved from the sibling `.env` file.

use crate::site::{DatabaseEngine, EnvironmentSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Host-name the app containers use to reach the mail-capture service
pub const MAIL_CONTAINER: &str = "siteforge-mail";
/// SMTP port the mail-capture service listens on
pub const MAIL_SMTP_PORT: u16 = 1025;
/// Container name of the shared reverse proxy
pub const PROXY_CONTAINER: &str = "siteforge-proxy";
/// Container name of the backup scheduler
pub const SCHEDULER_CONTAINER: &str = "siteforge-scheduler";

/// One rendered file, relative to the project directory it belongs to
#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub contents: String,
    pub executable: bool,
}

/// The full set of generated files for one compose project
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub files: Vec<RenderedFile>,
}

impl ArtifactSet {
    /// Contents of the file at `path`, if it is part of the set
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == PathBuf::from(path))
            .map(|f| f.contents.as_str())
    }
}

/// Inputs for rendering the shared infrastructure stacks
#[derive(Debug, Clone)]
pub struct InfraSpec {
    pub network: String,
    pub domain_suffix: String,
    pub http_port: u16,
    pub https_port: u16,
    /// Cron expression driving the backup scheduler
    pub schedule: String,
    /// Absolute store root, mounted into the scheduler container
    pub store_root: PathBuf,
    /// Absolute path of the running binary, mounted into the scheduler
    pub binary_path: PathBuf,
}

// Compose YAML model. BTreeMap keeps key order stable so re-rendering is
// byte-for-byte reproducible.

#[derive(Debug, Default, Serialize)]
struct ComposeFile {
    services: BTreeMap<String, ComposeService>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<String, ComposeVolume>,
    networks: BTreeMap<String, ComposeNetwork>,
}

#[derive(Debug, Default, Serialize)]
struct ComposeService {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<String>,
    container_name: String,
    restart: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    env_file: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct ComposeVolume {}

#[derive(Debug, Serialize)]
struct ComposeNetwork {
    name: String,
    external: bool,
}

impl ComposeService {
    fn base(container_name: String) -> Self {
        Self {
            container_name,
            restart: "unless-stopped".to_string(),
            ..Default::default()
        }
    }
}

impl ComposeFile {
    /// Every project joins the shared external network as its default, so
    /// the proxy can reach any service by container name.
    fn on_network(network: &str) -> Self {
        let mut file = ComposeFile::default();
        file.networks.insert(
            "default".to_string(),
            ComposeNetwork {
                name: network.to_string(),
                external: true,
            },
        );
        file
    }

    fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).expect("compose model is serializable")
    }
}

/// Render the full artifact set for one site.
pub fn render_site(spec: &EnvironmentSpec, network: &str) -> ArtifactSet {
    let mut compose = ComposeFile::on_network(network);

    let mut app = ComposeService::base(spec.app_container());
    app.build = Some("./build".to_string());
    app.env_file = vec![".env".to_string()];
    app.environment
        .insert("VIRTUAL_HOST".to_string(), spec.domain.clone());
    app.volumes = vec![
        "./app:/var/www/html".to_string(),
        "./logs:/var/log/nginx".to_string(),
    ];
    app.depends_on = vec!["db".to_string()];
    if spec.cache_enabled {
        app.depends_on.push("cache".to_string());
    }
    compose.services.insert("app".to_string(), app);

    let mut db = ComposeService::base(spec.db_container());
    db.image = Some(spec.engine.image().to_string());
    db.environment = db_environment(spec);
    db.volumes = vec![format!("./data:{}", spec.engine.data_mount())];
    compose.services.insert("db".to_string(), db);

    if spec.cache_enabled {
        let mut cache = ComposeService::base(spec.cache_container());
        cache.image = Some("redis:7-alpine".to_string());
        cache.command = Some(vec![
            "redis-server".to_string(),
            "--requirepass".to_string(),
            "${CACHE_PASSWORD}".to_string(),
        ]);
        cache.volumes = vec!["cache-data:/data".to_string()];
        compose.services.insert("cache".to_string(), cache);
        compose
            .volumes
            .insert("cache-data".to_string(), ComposeVolume::default());
    }

    let mut admin = ComposeService::base(spec.admin_container());
    admin.image = Some(spec.engine.admin_image().to_string());
    admin.environment = admin_environment(spec);
    admin.depends_on = vec!["db".to_string()];
    compose.services.insert("admin".to_string(), admin);

    let files = vec![
        RenderedFile {
            path: PathBuf::from("docker-compose.yml"),
            contents: compose.to_yaml(),
            executable: false,
        },
        RenderedFile {
            path: PathBuf::from(".env"),
            contents: render_env_file(spec),
            executable: false,
        },
        RenderedFile {
            path: PathBuf::from("build/Dockerfile"),
            contents: render_dockerfile(),
            executable: false,
        },
        RenderedFile {
            path: PathBuf::from("build/nginx.conf"),
            contents: render_nginx_conf(),
            executable: false,
        },
        RenderedFile {
            path: PathBuf::from("build/supervisord.conf"),
            contents: render_supervisord_conf(),
            executable: false,
        },
        RenderedFile {
            path: PathBuf::from("build/entrypoint.sh"),
            contents: render_entrypoint(),
            executable: true,
        },
        RenderedFile {
            path: PathBuf::from("shell.sh"),
            contents: render_shell_helper(spec),
            executable: true,
        },
        RenderedFile {
            path: PathBuf::from("db.sh"),
            contents: render_db_helper(spec),
            executable: true,
        },
        RenderedFile {
            path: PathBuf::from("logs.sh"),
            contents: render_logs_helper(),
            executable: true,
        },
    ];

    ArtifactSet { files }
}

fn db_environment(spec: &EnvironmentSpec) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    match spec.engine {
        DatabaseEngine::Mariadb => {
            env.insert("MARIADB_DATABASE".to_string(), spec.db_name());
            env.insert("MARIADB_USER".to_string(), spec.db_user());
            env.insert("MARIADB_PASSWORD".to_string(), "${DB_PASSWORD}".to_string());
            env.insert(
                "MARIADB_ROOT_PASSWORD".to_string(),
                "${DB_ROOT_PASSWORD}".to_string(),
            );
        }
        DatabaseEngine::Postgres => {
            env.insert("POSTGRES_DB".to_string(), spec.db_name());
            env.insert("POSTGRES_USER".to_string(), spec.db_user());
            env.insert("POSTGRES_PASSWORD".to_string(), "${DB_PASSWORD}".to_string());
        }
    }
    env
}

fn admin_environment(spec: &EnvironmentSpec) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("VIRTUAL_HOST".to_string(), spec.admin_domain());
    match spec.engine {
        DatabaseEngine::Mariadb => {
            env.insert("PMA_HOST".to_string(), spec.db_container());
        }
        DatabaseEngine::Postgres => {
            env.insert("ADMINER_DEFAULT_SERVER".to_string(), spec.db_container());
        }
    }
    env
}

/// The site's runtime configuration: identity, connection descriptors and
/// the persisted credentials. Compose interpolation reads secrets from
/// here; the backup runner reads the connection descriptor back out.
fn render_env_file(spec: &EnvironmentSpec) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Runtime configuration for {} (generated)", spec.name);
    let _ = writeln!(out, "SITE_NAME={}", spec.name);
    let _ = writeln!(out, "SITE_DOMAIN={}", spec.domain);
    let _ = writeln!(out, "DB_ENGINE={}", spec.engine);
    let _ = writeln!(out, "DB_HOST={}", spec.db_container());
    let _ = writeln!(out, "DB_PORT={}", spec.engine.port());
    let _ = writeln!(out, "DB_NAME={}", spec.db_name());
    let _ = writeln!(out, "DB_USER={}", spec.db_user());
    let _ = writeln!(out, "DB_PASSWORD={}", spec.credentials.db_password);
    let _ = writeln!(out, "DB_ROOT_PASSWORD={}", spec.credentials.db_root_password);
    if let Some(cache_password) = &spec.credentials.cache_password {
        let _ = writeln!(out, "CACHE_HOST={}", spec.cache_container());
        let _ = writeln!(out, "CACHE_PORT=6379");
        let _ = writeln!(out, "CACHE_PASSWORD={}", cache_password);
    }
    let _ = writeln!(out, "MAIL_HOST={}", MAIL_CONTAINER);
    let _ = writeln!(out, "MAIL_PORT={}", MAIL_SMTP_PORT);
    out
}

fn render_dockerfile() -> String {
    "\
FROM php:8.3-fpm-alpine

RUN apk add --no-cache nginx supervisor

COPY nginx.conf /etc/nginx/http.d/default.conf
COPY supervisord.conf /etc/supervisord.conf
COPY entrypoint.sh /usr/local/bin/entrypoint.sh

EXPOSE 80

ENTRYPOINT [\"/usr/local/bin/entrypoint.sh\"]
"
    .to_string()
}

fn render_nginx_conf() -> String {
    "\
server {
    listen 80 default_server;
    root /var/www/html;
    index index.php index.html;

    access_log /var/log/nginx/access.log;
    error_log /var/log/nginx/error.log;

    location / {
        try_files $uri $uri/ /index.php?$args;
    }

    location ~ \\.php$ {
        include fastcgi_params;
        fastcgi_pass 127.0.0.1:9000;
        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
    }
}
"
    .to_string()
}

fn render_supervisord_conf() -> String {
    "\
[supervisord]
nodaemon=true

[program:php-fpm]
command=php-fpm -F
autorestart=true

[program:nginx]
command=nginx -g \"daemon off;\"
autorestart=true
"
    .to_string()
}

fn render_entrypoint() -> String {
    "\
#!/bin/sh
set -e

# The database container may still be initializing its volume
until nc -z \"$DB_HOST\" \"$DB_PORT\"; do
    echo \"waiting for $DB_HOST:$DB_PORT\"
    sleep 1
done

exec supervisord -c /etc/supervisord.conf
"
    .to_string()
}

fn render_shell_helper(spec: &EnvironmentSpec) -> String {
    format!(
        "\
#!/bin/sh
exec docker exec -it {} sh
",
        spec.app_container()
    )
}

fn render_db_helper(spec: &EnvironmentSpec) -> String {
    let client = match spec.engine {
        DatabaseEngine::Mariadb => {
            "exec docker exec -it \"$DB_HOST\" mariadb -u\"$DB_USER\" -p\"$DB_PASSWORD\" \"$DB_NAME\""
        }
        DatabaseEngine::Postgres => {
            "exec docker exec -it -e PGPASSWORD=\"$DB_PASSWORD\" \"$DB_HOST\" psql -U \"$DB_USER\" \"$DB_NAME\""
        }
    };
    format!(
        "\
#!/bin/sh
set -a
. \"$(dirname \"$0\")/.env\"
set +a
{}
",
        client
    )
}

fn render_logs_helper() -> String {
    "\
#!/bin/sh
cd \"$(dirname \"$0\")\"
exec docker compose logs -f \"$@\"
"
    .to_string()
}

/// Landing page written into `app/` for freshly scaffolded sites.
pub fn scaffold_index(spec: &EnvironmentSpec) -> String {
    format!(
        "\
<?php
// Starter page for {name}. Replace with your application.
phpinfo();
",
        name = spec.name
    )
}

/// Render the shared reverse proxy project.
pub fn render_proxy(infra: &InfraSpec) -> ArtifactSet {
    let mut compose = ComposeFile::on_network(&infra.network);

    let mut proxy = ComposeService::base(PROXY_CONTAINER.to_string());
    proxy.image = Some("nginxproxy/nginx-proxy:1.6-alpine".to_string());
    proxy.ports = vec![
        format!("{}:80", infra.http_port),
        format!("{}:443", infra.https_port),
    ];
    proxy.volumes = vec![
        "/var/run/docker.sock:/tmp/docker.sock:ro".to_string(),
        "./certs:/etc/nginx/certs:ro".to_string(),
    ];
    compose.services.insert("proxy".to_string(), proxy);

    ArtifactSet {
        files: vec![RenderedFile {
            path: PathBuf::from("docker-compose.yml"),
            contents: compose.to_yaml(),
            executable: false,
        }],
    }
}

/// Render the shared mail-capture project.
pub fn render_mail(infra: &InfraSpec) -> ArtifactSet {
    let mut compose = ComposeFile::on_network(&infra.network);

    let mut mail = ComposeService::base(MAIL_CONTAINER.to_string());
    mail.image = Some("mailhog/mailhog:v1.0.1".to_string());
    mail.environment.insert(
        "VIRTUAL_HOST".to_string(),
        format!("mail.{}", infra.domain_suffix),
    );
    mail.environment
        .insert("VIRTUAL_PORT".to_string(), "8025".to_string());
    compose.services.insert("mail".to_string(), mail);

    ArtifactSet {
        files: vec![RenderedFile {
            path: PathBuf::from("docker-compose.yml"),
            contents: compose.to_yaml(),
            executable: false,
        }],
    }
}

/// Render the backup scheduler project.
///
/// The scheduler is a plain cron container; it mounts the docker socket,
/// the store root and this binary, and invokes `siteforge backup` on its
/// schedule. The manager itself holds no timers.
pub fn render_scheduler(infra: &InfraSpec) -> ArtifactSet {
    let mut compose = ComposeFile::on_network(&infra.network);

    let mut scheduler = ComposeService::base(SCHEDULER_CONTAINER.to_string());
    scheduler.build = Some(".".to_string());
    scheduler.volumes = vec![
        "/var/run/docker.sock:/var/run/docker.sock".to_string(),
        format!("{}:/usr/local/bin/siteforge:ro", infra.binary_path.display()),
        format!("{}:/srv/siteforge", infra.store_root.display()),
    ];
    compose.services.insert("scheduler".to_string(), scheduler);

    let dockerfile = "\
FROM debian:bookworm-slim

RUN apt-get update \\
    && apt-get install -y --no-install-recommends cron ca-certificates \\
    && rm -rf /var/lib/apt/lists/*

COPY siteforge.cron /etc/cron.d/siteforge
RUN chmod 0644 /etc/cron.d/siteforge

CMD [\"cron\", \"-f\"]
"
    .to_string();

    let crontab = format!(
        "{} root /usr/local/bin/siteforge backup --root /srv/siteforge >> /srv/siteforge/scheduler/backup.log 2>&1\n",
        infra.schedule
    );

    ArtifactSet {
        files: vec![
            RenderedFile {
                path: PathBuf::from("docker-compose.yml"),
                contents: compose.to_yaml(),
                executable: false,
            },
            RenderedFile {
                path: PathBuf::from("Dockerfile"),
                contents: dockerfile,
                executable: false,
            },
            RenderedFile {
                path: PathBuf::from("siteforge.cron"),
                contents: crontab,
                executable: false,
            },
        ],
    }
}
