//! Container lifecycle for internal services.
//!
//! ```text
//!   ensure_started(service, restart)
//!         │
//!         ▼
//!   ┌──────────────┐   ┌────────────────┐   ┌──────────────────┐   ┌────────────────┐
//!   │ Pull image   │──▶│ Remove if      │──▶│ Provision storage│──▶│ Inspect, start │
//!   │ (per policy) │   │ restart        │   │ + create if none │   │ if not running │
//!   └──────────────┘   └────────────────┘   └──────────────────┘   └────────────────┘
//! ```
//!
//! Every step re-queries the runtime instead of trusting earlier
//! observations, so repeated calls converge on one running container and
//! one storage resource.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{AppConfig, Paths, PullPolicy};
use crate::error::{Result, ServiceError};
use crate::prompt::Prompter;
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerStatus, Mount, ensure_image};
use crate::service::{DATA_DIR, Placement, Service, ServicePatch, StorageMode};
use crate::store::ConfigStore;

/// Label set on every container this crate creates.
pub const SERVICE_LABEL: &str = "mariadb-services.service";

/// Options for [`LifecycleManager::destroy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyOptions {
    /// Skip the confirmation prompt.
    pub yes: bool,
    /// Allow destroying the default service.
    pub force: bool,
}

/// Config-only change of storage and image. Applied on the next start.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    pub storage: Option<StorageMode>,
    pub volume: Option<String>,
    pub image_name: Option<String>,
    pub image_version: Option<String>,
}

impl UpgradeRequest {
    pub fn is_empty(&self) -> bool {
        self.storage.is_none()
            && self.volume.is_none()
            && self.image_name.is_none()
            && self.image_version.is_none()
    }
}

/// Creates, starts, stops and destroys service containers.
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    paths: Paths,
    network: Option<String>,
    pull_policy: PullPolicy,
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &AppConfig) -> Self {
        Self {
            runtime,
            paths: config.paths.clone(),
            network: Some(config.network.clone()),
            pull_policy: config.pull_policy,
        }
    }

    /// Register a new service, persist it, and start it if internal.
    pub async fn create(&self, store: &mut ConfigStore, service: Service) -> Result<()> {
        if store.has_service(service.name()) {
            return Err(ServiceError::AlreadyExists {
                name: service.name().to_string(),
            });
        }
        let name = service.name().to_string();
        store.set_service(service);
        store.save()?;
        tracing::info!("Registered service '{}'", name);

        let service = store.get_service(&name)?;
        if !service.is_external() {
            self.ensure_started(service, false).await?;
        }
        Ok(())
    }

    /// Bring the service's container to the running state.
    pub async fn ensure_started(&self, service: &Service, restart: bool) -> Result<ContainerStatus> {
        let storage = match service.placement() {
            Placement::External { host } => {
                return Err(ServiceError::ExternalService {
                    name: service.name().to_string(),
                    host: host.clone(),
                });
            }
            Placement::Internal { storage } => *storage,
        };
        let name = service.name();
        let container = service.container_name();

        self.pull(service).await?;

        if restart {
            self.runtime
                .remove_container(&container)
                .await
                .map_err(|e| ServiceError::runtime(name, e))?;
        }

        let existing = self
            .runtime
            .inspect_container(&container)
            .await
            .map_err(|e| ServiceError::runtime(name, e))?;

        if existing.is_none() {
            let mount = self.provision_storage(service, storage).await?;
            let spec = self.container_spec(service, mount);
            self.runtime
                .create_container(&spec)
                .await
                .map_err(|e| ServiceError::runtime(name, e))?;
        } else {
            tracing::debug!("Container '{}' already exists", container);
        }

        let status = self
            .runtime
            .inspect_container(&container)
            .await
            .map_err(|e| ServiceError::runtime(name, e))?
            .ok_or_else(|| ServiceError::NotRunning {
                name: name.to_string(),
                container: container.clone(),
            })?;

        if status.running {
            tracing::debug!("Container '{}' already running", container);
            return Ok(status);
        }

        self.runtime
            .start_container(&container)
            .await
            .map_err(|e| ServiceError::runtime(name, e))?;
        tracing::info!("Service '{}' started", name);

        Ok(ContainerStatus {
            status: "running".to_string(),
            running: true,
        })
    }

    /// Current container state; `None` when there is no container or the
    /// service is external.
    pub async fn status(&self, service: &Service) -> Result<Option<ContainerStatus>> {
        if service.is_external() {
            return Ok(None);
        }
        self.runtime
            .inspect_container(&service.container_name())
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))
    }

    /// Remove the service's container. Storage is left alone.
    pub async fn stop(&self, store: &ConfigStore, name: &str) -> Result<()> {
        let service = store.get_service(name)?;
        if let Some(host) = service.host() {
            return Err(ServiceError::ExternalService {
                name: name.to_string(),
                host: host.to_string(),
            });
        }
        self.runtime
            .remove_container(&service.container_name())
            .await
            .map_err(|e| ServiceError::runtime(name, e))?;
        tracing::info!("Service '{}' stopped", name);
        Ok(())
    }

    /// Tear down a service and unregister it.
    ///
    /// `force` only lifts the default-service protection; confirmation is a
    /// separate gate skipped by `yes`.
    pub async fn destroy(
        &self,
        store: &mut ConfigStore,
        name: &str,
        options: DestroyOptions,
        prompter: &dyn Prompter,
    ) -> Result<()> {
        let service = store.get_service(name)?.clone();

        if store.is_default(name) && !options.force {
            return Err(ServiceError::ProtectedDefault {
                name: name.to_string(),
            });
        }

        if !options.yes {
            let action = format!("destroying service '{}'", name);
            let question = format!(
                "Destroy service '{}' and delete its data? This cannot be undone.",
                name
            );
            match prompter.confirm(&question, false) {
                Ok(true) => {}
                Ok(false) => return Err(ServiceError::Aborted { action }),
                Err(e) => {
                    tracing::debug!("Confirmation unavailable: {}", e);
                    return Err(ServiceError::Aborted {
                        action: format!("{} (pass --yes to skip confirmation)", action),
                    });
                }
            }
        }

        if let Placement::Internal { storage } = service.placement() {
            self.runtime
                .remove_container(&service.container_name())
                .await
                .map_err(|e| ServiceError::runtime(name, e))?;
            self.remove_storage(&service, *storage).await?;
        }

        store.unset_service(name);
        store.save()?;
        tracing::info!("Service '{}' destroyed", name);
        Ok(())
    }

    /// Record new storage/image settings. The running container is not
    /// touched; restart the service to apply them.
    pub fn upgrade(
        &self,
        store: &mut ConfigStore,
        name: &str,
        request: UpgradeRequest,
    ) -> Result<Service> {
        store.get_service(name)?;
        store.update_service(
            name,
            ServicePatch {
                storage: request.storage,
                volume: request.volume,
                image_name: request.image_name,
                image_version: request.image_version,
                ..Default::default()
            },
        );
        store.save()?;
        Ok(store.get_service(name)?.clone())
    }

    async fn pull(&self, service: &Service) -> Result<()> {
        ensure_image(self.runtime.as_ref(), &service.image_tag(), self.pull_policy)
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))
    }

    async fn provision_storage(&self, service: &Service, storage: StorageMode) -> Result<Mount> {
        let name = service.name();
        match storage {
            StorageMode::Volume => {
                self.require_volume_support(service).await?;
                let volume = service.volume_name();
                let exists = self
                    .runtime
                    .has_volume(&volume)
                    .await
                    .map_err(|e| ServiceError::runtime(name, e))?;
                if !exists {
                    self.runtime
                        .create_volume(&volume)
                        .await
                        .map_err(|e| ServiceError::runtime(name, e))?;
                }
                Ok(Mount::Volume {
                    name: volume,
                    target: DATA_DIR.to_string(),
                })
            }
            StorageMode::Filesystem => {
                let dir = self.paths.service_data_dir(name);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| ServiceError::io(&dir, e))?;
                Ok(Mount::Bind {
                    source: dir,
                    target: DATA_DIR.to_string(),
                    read_only: false,
                })
            }
        }
    }

    async fn remove_storage(&self, service: &Service, storage: StorageMode) -> Result<()> {
        let name = service.name();
        match storage {
            StorageMode::Volume => {
                let volume = service.volume_name();
                if !service.uses_default_volume() {
                    tracing::info!(
                        "Skipping removal of custom volume '{}' for service '{}'",
                        volume,
                        name
                    );
                    return Ok(());
                }
                let supported = self
                    .runtime
                    .supports_volumes()
                    .await
                    .map_err(|e| ServiceError::runtime(name, e))?;
                if !supported {
                    tracing::warn!(
                        "Volumes are not supported by this runtime, skipping '{}'",
                        volume
                    );
                    return Ok(());
                }
                self.runtime
                    .remove_volume(&volume)
                    .await
                    .map_err(|e| ServiceError::runtime(name, e))
            }
            StorageMode::Filesystem => {
                let dir = self.paths.service_data_dir(name);
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => {
                        tracing::info!("Removed data directory {}", dir.display());
                        Ok(())
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(ServiceError::io(&dir, e)),
                }
            }
        }
    }

    async fn require_volume_support(&self, service: &Service) -> Result<()> {
        let supported = self
            .runtime
            .supports_volumes()
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))?;
        if supported {
            Ok(())
        } else {
            Err(ServiceError::UnsupportedFeature {
                name: service.name().to_string(),
                feature: "volume storage".to_string(),
            })
        }
    }

    fn container_spec(&self, service: &Service, mount: Mount) -> ContainerSpec {
        let mut labels = BTreeMap::new();
        labels.insert(SERVICE_LABEL.to_string(), service.name().to_string());
        ContainerSpec {
            name: service.container_name(),
            image: service.image_tag(),
            hostname: Some(service.container_name()),
            env: service.container_env(),
            mounts: vec![mount],
            labels,
            network: self.network.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use crate::testing::{FakeRuntime, ScriptedPrompter};

    fn manager(runtime: &Arc<FakeRuntime>, home: &std::path::Path) -> LifecycleManager {
        LifecycleManager::new(runtime.clone(), &AppConfig::with_home(home))
    }

    #[tokio::test]
    async fn test_ensure_started_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let service = Service::internal("app", StorageMode::Volume).unwrap();

        lifecycle.ensure_started(&service, false).await.unwrap();
        let status = lifecycle.ensure_started(&service, false).await.unwrap();

        assert!(status.running);
        assert_eq!(runtime.container_names(), vec!["mariadb-app"]);
        assert_eq!(runtime.volume_names(), vec!["mariadb-app"]);
        assert_eq!(runtime.create_count(), 1);
    }

    #[tokio::test]
    async fn test_filesystem_storage_binds_service_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let service = Service::internal("app", StorageMode::Filesystem).unwrap();

        lifecycle.ensure_started(&service, false).await.unwrap();

        let data_dir = dir.path().join("data").join("app");
        assert!(data_dir.is_dir());
        let spec = runtime.container_spec("mariadb-app").unwrap();
        assert_eq!(
            spec.mounts,
            vec![Mount::Bind {
                source: data_dir,
                target: DATA_DIR.to_string(),
                read_only: false,
            }]
        );
        assert!(runtime.volume_names().is_empty());
    }

    #[tokio::test]
    async fn test_restart_recreates_container() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let service = Service::internal("app", StorageMode::Volume).unwrap();

        lifecycle.ensure_started(&service, false).await.unwrap();
        lifecycle.ensure_started(&service, true).await.unwrap();

        assert_eq!(runtime.create_count(), 2);
        assert_eq!(runtime.container_names(), vec!["mariadb-app"]);
    }

    #[tokio::test]
    async fn test_stopped_container_is_started_not_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let service = Service::internal("app", StorageMode::Volume).unwrap();

        lifecycle.ensure_started(&service, false).await.unwrap();
        runtime.set_running("mariadb-app", false);
        let status = lifecycle.ensure_started(&service, false).await.unwrap();

        assert!(status.running);
        assert_eq!(runtime.create_count(), 1);
    }

    #[tokio::test]
    async fn test_external_service_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let service = Service::external("remote", "db.example.com").unwrap();

        let err = lifecycle.ensure_started(&service, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::ExternalService { .. }));
        assert_eq!(runtime.create_count(), 0);
        assert!(runtime.pulled_images().is_empty());
    }

    #[tokio::test]
    async fn test_volume_requires_capability() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new().without_volume_support());
        let lifecycle = manager(&runtime, dir.path());
        let service = Service::internal("app", StorageMode::Volume).unwrap();

        let err = lifecycle.ensure_started(&service, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedFeature { .. }));
        assert_eq!(runtime.create_count(), 0);
    }

    #[tokio::test]
    async fn test_pull_policy_missing_skips_present_image() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_image("mariadb:latest");
        let lifecycle = manager(&runtime, dir.path());
        let service = Service::internal("app", StorageMode::Volume).unwrap();

        lifecycle.ensure_started(&service, false).await.unwrap();
        assert!(runtime.pulled_images().is_empty());
    }

    #[tokio::test]
    async fn test_pull_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new().failing_pulls());
        let lifecycle = manager(&runtime, dir.path());
        let service = Service::internal("app", StorageMode::Volume).unwrap();

        let err = lifecycle.ensure_started(&service, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::ImagePullFailed { .. }));
    }

    #[tokio::test]
    async fn test_stop_keeps_storage() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let mut store = ConfigStore::open(MemoryBackend::default()).unwrap();
        store.set_service(Service::internal("app", StorageMode::Volume).unwrap());

        lifecycle
            .ensure_started(store.get_service("app").unwrap(), false)
            .await
            .unwrap();
        lifecycle.stop(&store, "app").await.unwrap();
        lifecycle.stop(&store, "app").await.unwrap();

        assert!(runtime.container_names().is_empty());
        assert_eq!(runtime.volume_names(), vec!["mariadb-app"]);
        assert!(matches!(
            lifecycle.stop(&store, "ghost").await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_destroy_default_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let backend = MemoryBackend::default();
        let mut store = ConfigStore::open(backend.clone()).unwrap();
        lifecycle
            .create(&mut store, Service::internal("app", StorageMode::Volume).unwrap())
            .await
            .unwrap();
        let before = backend.document();

        let err = lifecycle
            .destroy(
                &mut store,
                "app",
                DestroyOptions {
                    yes: true,
                    force: false,
                },
                &ScriptedPrompter::non_interactive(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::ProtectedDefault { .. }));
        assert!(store.has_service("app"));
        assert_eq!(backend.document(), before);
        assert_eq!(runtime.container_names(), vec!["mariadb-app"]);
    }

    #[tokio::test]
    async fn test_destroy_declined_confirmation_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let mut store = ConfigStore::open(MemoryBackend::default()).unwrap();
        store.set_service(Service::internal("app", StorageMode::Volume).unwrap());

        let prompter = ScriptedPrompter::new().with_confirmation(false);
        let err = lifecycle
            .destroy(
                &mut store,
                "app",
                DestroyOptions {
                    yes: false,
                    force: true,
                },
                &prompter,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Aborted { .. }));
        assert!(store.has_service("app"));
    }

    #[tokio::test]
    async fn test_destroy_removes_default_volume_only() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let mut store = ConfigStore::open(MemoryBackend::default()).unwrap();
        lifecycle
            .create(&mut store, Service::internal("first", StorageMode::Volume).unwrap())
            .await
            .unwrap();
        lifecycle
            .create(
                &mut store,
                Service::internal("custom", StorageMode::Volume)
                    .unwrap()
                    .with_volume("shared-data"),
            )
            .await
            .unwrap();
        lifecycle
            .create(&mut store, Service::internal("plain", StorageMode::Volume).unwrap())
            .await
            .unwrap();

        let options = DestroyOptions {
            yes: true,
            force: false,
        };
        let prompter = ScriptedPrompter::non_interactive();
        lifecycle
            .destroy(&mut store, "custom", options, &prompter)
            .await
            .unwrap();
        lifecycle
            .destroy(&mut store, "plain", options, &prompter)
            .await
            .unwrap();

        assert_eq!(runtime.volume_names(), vec!["mariadb-first", "shared-data"]);
        assert_eq!(runtime.container_names(), vec!["mariadb-first"]);
        assert!(!store.has_service("custom"));
        assert!(!store.has_service("plain"));
    }

    #[tokio::test]
    async fn test_destroy_filesystem_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let mut store = ConfigStore::open(MemoryBackend::default()).unwrap();
        store.set_service(Service::internal("app", StorageMode::Filesystem).unwrap());

        lifecycle
            .destroy(
                &mut store,
                "app",
                DestroyOptions {
                    yes: true,
                    force: true,
                },
                &ScriptedPrompter::non_interactive(),
            )
            .await
            .unwrap();
        assert!(!store.has_service("app"));
        assert!(!store.has_default_service());
    }

    #[tokio::test]
    async fn test_destroy_external_only_unregisters() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let mut store = ConfigStore::open(MemoryBackend::default()).unwrap();
        store.set_service(Service::internal("app", StorageMode::Volume).unwrap());
        store.set_service(Service::external("remote", "db.example.com").unwrap());

        lifecycle
            .destroy(
                &mut store,
                "remote",
                DestroyOptions {
                    yes: true,
                    force: false,
                },
                &ScriptedPrompter::non_interactive(),
            )
            .await
            .unwrap();
        assert!(!store.has_service("remote"));
        assert_eq!(runtime.remove_count(), 0);
    }

    #[tokio::test]
    async fn test_upgrade_is_config_only() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let mut store = ConfigStore::open(MemoryBackend::default()).unwrap();
        lifecycle
            .create(&mut store, Service::internal("app", StorageMode::Filesystem).unwrap())
            .await
            .unwrap();

        let updated = lifecycle
            .upgrade(
                &mut store,
                "app",
                UpgradeRequest {
                    storage: Some(StorageMode::Volume),
                    image_version: Some("11.4".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.storage(), Some(StorageMode::Volume));
        assert_eq!(updated.image_tag(), "mariadb:11.4");
        assert_eq!(
            runtime.container_spec("mariadb-app").unwrap().image,
            "mariadb:latest"
        );
        assert_eq!(runtime.create_count(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime, dir.path());
        let mut store = ConfigStore::open(MemoryBackend::default()).unwrap();
        let service = Service::internal("app", StorageMode::Volume).unwrap();
        lifecycle.create(&mut store, service.clone()).await.unwrap();
        assert!(matches!(
            lifecycle.create(&mut store, service).await,
            Err(ServiceError::AlreadyExists { .. })
        ));
    }
}
