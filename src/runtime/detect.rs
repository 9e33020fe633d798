//! Docker availability checks for `mariadb-services doctor`.
//!
//! Distinguishes "docker is not installed" from "the daemon is not
//! running" and reports whether named volumes are usable, with
//! platform-specific hints for fixing each case.

use crate::runtime::{ContainerRuntime, DockerRuntime};

/// Docker daemon availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerStatus {
    /// Docker binary found on PATH and daemon responding to ping.
    Available,
    /// `docker` binary not found on PATH (daemon may still be remote).
    NotInstalled,
    /// Daemon not responding.
    NotRunning,
}

impl DockerStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DockerStatus::Available)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DockerStatus::Available => "available",
            DockerStatus::NotInstalled => "not installed",
            DockerStatus::NotRunning => "not running",
        }
    }
}

/// Host platform for install guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOS,
    Linux,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOS,
            "windows" => Platform::Windows,
            _ => Platform::Linux,
        }
    }

    pub fn install_hint(&self) -> &'static str {
        match self {
            Platform::MacOS => {
                "Install Docker Desktop: https://docs.docker.com/desktop/install/mac-install/"
            }
            Platform::Linux => "Install Docker Engine: https://docs.docker.com/engine/install/",
            Platform::Windows => {
                "Install Docker Desktop: https://docs.docker.com/desktop/install/windows-install/"
            }
        }
    }

    pub fn start_hint(&self) -> &'static str {
        match self {
            Platform::MacOS => "Start Docker Desktop from Applications, or run: open -a Docker",
            Platform::Linux => "Start the Docker daemon: sudo systemctl start docker",
            Platform::Windows => "Start Docker Desktop from the Start menu",
        }
    }
}

/// Result of a Docker detection check.
#[derive(Debug, Clone)]
pub struct DockerDetection {
    pub status: DockerStatus,
    pub platform: Platform,
    /// `None` when the daemon could not be asked.
    pub volumes_supported: Option<bool>,
}

impl DockerDetection {
    /// Human-readable hint for a non-available status.
    pub fn hint(&self) -> Option<&'static str> {
        match self.status {
            DockerStatus::Available => None,
            DockerStatus::NotInstalled => Some(self.platform.install_hint()),
            DockerStatus::NotRunning => Some(self.platform.start_hint()),
        }
    }
}

/// Check whether Docker is installed and running.
///
/// A reachable daemon wins even when no local `docker` binary exists
/// (e.g. `DOCKER_HOST` pointing at a remote engine).
pub async fn check_docker() -> DockerDetection {
    let platform = Platform::current();

    if let Ok(runtime) = DockerRuntime::connect().await {
        let volumes_supported = runtime.supports_volumes().await.ok();
        return DockerDetection {
            status: DockerStatus::Available,
            platform,
            volumes_supported,
        };
    }

    let status = if docker_binary_exists() {
        DockerStatus::NotRunning
    } else {
        DockerStatus::NotInstalled
    };
    DockerDetection {
        status,
        platform,
        volumes_supported: None,
    }
}

fn docker_binary_exists() -> bool {
    let finder = if cfg!(windows) { "where" } else { "which" };
    std::process::Command::new(finder)
        .arg("docker")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}
