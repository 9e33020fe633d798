//! Shared admin front-end (phpMyAdmin) listing every reachable service.
//!
//! The admin container is regenerated from scratch on every resync: it is
//! always removed first, then recreated only when there is at least one
//! back-end to list. Call [`AdminAggregator::resync`] after any start,
//! stop, create or destroy so the server list never goes stale.

pub mod php;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::{AppConfig, Paths, PullPolicy};
use crate::error::{Result, ServiceError};
use crate::runtime::{ContainerRuntime, ContainerSpec, Mount, ensure_image};
use crate::service::Service;
use crate::store::ConfigStore;

pub use php::{AdminServer, AuthMode, render_config};

/// Name of the admin container.
pub const ADMIN_CONTAINER: &str = "mariadb-services-admin";

const CONFIG_FILE: &str = "config.user.inc.php";
const CONFIG_TARGET: &str = "/etc/phpmyadmin/config.user.inc.php";

/// Result of a resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    /// No back-ends; the admin container was removed and not recreated.
    Removed,
    /// The admin container is running with these server labels.
    Running { servers: Vec<String> },
}

/// Rebuilds the admin container from the config store.
pub struct AdminAggregator {
    runtime: Arc<dyn ContainerRuntime>,
    paths: Paths,
    image: String,
    network: String,
    pull_policy: PullPolicy,
}

impl AdminAggregator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &AppConfig) -> Self {
        Self {
            runtime,
            paths: config.paths.clone(),
            image: config.admin_image.clone(),
            network: config.network.clone(),
            pull_policy: config.pull_policy,
        }
    }

    /// Regenerate the server list and (re)create the admin container.
    pub async fn resync(&self, store: &ConfigStore) -> Result<AdminOutcome> {
        let mut reachable: Vec<&Service> = Vec::new();
        for service in store.services().iter().filter(|s| !s.is_external()) {
            let container = self
                .runtime
                .inspect_container(&service.container_name())
                .await
                .map_err(|e| ServiceError::runtime(service.name(), e))?;
            if container.is_some() {
                reachable.push(service);
            }
        }

        self.runtime
            .remove_container(ADMIN_CONTAINER)
            .await
            .map_err(|e| ServiceError::runtime(ADMIN_CONTAINER, e))?;

        let external: Vec<&Service> = store.services().iter().filter(|s| s.is_external()).collect();
        if reachable.is_empty() && external.is_empty() {
            tracing::info!("No services to list, admin front-end not started");
            return Ok(AdminOutcome::Removed);
        }
        reachable.extend(external);

        let servers: Vec<AdminServer> = reachable
            .iter()
            .map(|s| AdminServer::from_service(s))
            .collect();
        self.write_state(&servers).await?;

        let hostname = store.admin_hostname();
        self.start_container(hostname).await?;

        let labels: Vec<String> = servers.into_iter().map(|s| s.label).collect();
        tracing::info!(
            "Admin front-end at {} lists {} server(s)",
            hostname,
            labels.len()
        );
        Ok(AdminOutcome::Running { servers: labels })
    }

    async fn write_state(&self, servers: &[AdminServer]) -> Result<()> {
        let admin_dir = self.paths.admin_dir();
        for dir in [admin_dir.join("save"), admin_dir.join("upload")] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| ServiceError::io(&dir, e))?;
            make_world_writable(&dir).await;
        }

        let config_path = admin_dir.join(CONFIG_FILE);
        tokio::fs::write(&config_path, render_config(servers))
            .await
            .map_err(|e| ServiceError::io(&config_path, e))?;
        Ok(())
    }

    async fn start_container(&self, hostname: &str) -> Result<()> {
        let err = |e| ServiceError::runtime(ADMIN_CONTAINER, e);

        ensure_image(self.runtime.as_ref(), &self.image, self.pull_policy)
            .await
            .map_err(err)?;

        if self
            .runtime
            .inspect_container(ADMIN_CONTAINER)
            .await
            .map_err(err)?
            .is_none()
        {
            let spec = self.container_spec(hostname);
            self.runtime.create_container(&spec).await.map_err(err)?;
        }

        let running = self
            .runtime
            .inspect_container(ADMIN_CONTAINER)
            .await
            .map_err(err)?
            .is_some_and(|s| s.running);
        if !running {
            self.runtime
                .start_container(ADMIN_CONTAINER)
                .await
                .map_err(err)?;
        }
        Ok(())
    }

    fn container_spec(&self, hostname: &str) -> ContainerSpec {
        let admin_dir = self.paths.admin_dir();
        let mut labels = BTreeMap::new();
        labels.insert("traefik.enable".to_string(), "true".to_string());
        labels.insert(
            format!("traefik.http.routers.{}.rule", ADMIN_CONTAINER),
            format!("Host(`{}`)", hostname),
        );
        labels.insert(
            format!(
                "traefik.http.services.{}.loadbalancer.server.port",
                ADMIN_CONTAINER
            ),
            "80".to_string(),
        );

        ContainerSpec {
            name: ADMIN_CONTAINER.to_string(),
            image: self.image.clone(),
            hostname: Some(hostname.to_string()),
            env: Vec::new(),
            mounts: vec![
                Mount::Bind {
                    source: admin_dir.join(CONFIG_FILE),
                    target: CONFIG_TARGET.to_string(),
                    read_only: true,
                },
                Mount::Bind {
                    source: admin_dir.join("save"),
                    target: php::SAVE_DIR.to_string(),
                    read_only: false,
                },
                Mount::Bind {
                    source: admin_dir.join("upload"),
                    target: php::UPLOAD_DIR.to_string(),
                    read_only: false,
                },
            ],
            labels,
            network: Some(self.network.clone()),
        }
    }
}

/// The web server inside the container runs as another user.
#[cfg(unix)]
async fn make_world_writable(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let perms = std::fs::Permissions::from_mode(0o777);
    if let Err(e) = tokio::fs::set_permissions(dir, perms).await {
        tracing::warn!("Could not make {} writable: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
async fn make_world_writable(_dir: &Path) {}
