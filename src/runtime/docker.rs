//! Docker implementation of [`ContainerRuntime`] using bollard.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use futures::StreamExt;

use crate::error::RuntimeError;
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerStatus, ExecChunk, ExecSession, ExecSpec,
};

/// First Docker API version with the volumes API.
const MIN_VOLUME_API: (u32, u32) = (1, 21);

/// Connect to the local Docker daemon.
///
/// Tries bollard's defaults (`DOCKER_HOST` or the platform socket), then the
/// Docker Desktop and rootless socket locations.
pub async fn connect_docker() -> Result<Docker, RuntimeError> {
    let mut last_error = match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let path = socket.to_string_lossy();
        match Docker::connect_with_socket(&path, 120, bollard::API_DEFAULT_VERSION) {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker at {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = e.to_string(),
            },
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(RuntimeError::NotAvailable { reason: last_error })
}

fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker").join("run").join("docker.sock"));
    }
    if let Some(runtime_dir) = dirs::runtime_dir() {
        sockets.push(runtime_dir.join("docker.sock"));
    }
    sockets
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn parse_api_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// bollard-backed container runtime.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect using [`connect_docker`].
    pub async fn connect() -> Result<Self, RuntimeError> {
        Ok(Self::new(connect_docker().await?))
    }

    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(RuntimeError::api("inspect network", name, e)),
        }

        tracing::info!("Creating network: {}", name);
        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| RuntimeError::api("create network", name, e))?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, tag: &str) -> Result<(), RuntimeError> {
        tracing::info!("Pulling image: {}", tag);

        let options = CreateImageOptions {
            from_image: tag.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::ImagePull {
                        image: tag.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", tag);
        Ok(())
    }

    async fn has_image(&self, tag: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(RuntimeError::api("inspect image", tag, e)),
        }
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>, RuntimeError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => {
                let state = info.state.unwrap_or_default();
                Ok(Some(ContainerStatus {
                    status: state
                        .status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    running: state.running == Some(true),
                }))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(RuntimeError::api("inspect container", name, e)),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        if let Some(network) = &spec.network {
            self.ensure_network(network).await?;
        }

        let binds: Vec<String> = spec.mounts.iter().map(|m| m.to_bind_string()).collect();
        let labels: HashMap<String, String> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            network_mode: spec.network.clone(),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            hostname: spec.hostname.clone(),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            labels: if labels.is_empty() { None } else { Some(labels) },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::api("create container", &spec.name, e))?;

        tracing::info!("Created container: {}", spec.name);
        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::api("start container", name, e))?;
        tracing::info!("Started container: {}", name);
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let result = self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
        match result {
            Ok(()) => {
                tracing::info!("Removed container: {}", name);
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                tracing::debug!("Container '{}' already absent", name);
                Ok(())
            }
            Err(e) => Err(RuntimeError::api("remove container", name, e)),
        }
    }

    async fn supports_volumes(&self) -> Result<bool, RuntimeError> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| RuntimeError::api("query version", "docker", e))?;
        Ok(version
            .api_version
            .as_deref()
            .and_then(parse_api_version)
            .is_some_and(|v| v >= MIN_VOLUME_API))
    }

    async fn has_volume(&self, name: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(RuntimeError::api("inspect volume", name, e)),
        }
    }

    async fn create_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| RuntimeError::api("create volume", name, e))?;
        tracing::info!("Created volume: {}", name);
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await
        {
            Ok(()) => {
                tracing::info!("Removed volume: {}", name);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(RuntimeError::api("remove volume", name, e)),
        }
    }

    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecSession, RuntimeError> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(spec.cmd.clone()),
                    attach_stdin: Some(spec.attach_stdin),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(spec.tty),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RuntimeError::api("create exec", container, e))?;

        let started = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: spec.tty,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| RuntimeError::api("start exec", container, e))?;

        match started {
            StartExecResults::Attached { output, input } => {
                let target = container.to_string();
                let output = output.map(move |item| match item {
                    Ok(LogOutput::StdOut { message }) => Ok(ExecChunk::Stdout(message)),
                    Ok(LogOutput::StdErr { message }) => Ok(ExecChunk::Stderr(message)),
                    Ok(LogOutput::Console { message }) => Ok(ExecChunk::Console(message)),
                    Ok(LogOutput::StdIn { message }) => Ok(ExecChunk::Console(message)),
                    Err(e) => Err(RuntimeError::api("read exec output", target.clone(), e)),
                });
                Ok(ExecSession {
                    id: exec.id,
                    output: Box::pin(output),
                    input: spec.attach_stdin.then_some(input),
                })
            }
            StartExecResults::Detached => Err(RuntimeError::api(
                "start exec",
                container,
                "exec started detached",
            )),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        let info = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| RuntimeError::api("inspect exec", exec_id, e))?;
        if info.running == Some(true) {
            return Ok(None);
        }
        Ok(info.exit_code)
    }
}
