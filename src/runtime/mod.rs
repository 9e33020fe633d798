//! Container runtime port.
//!
//! The lifecycle manager, admin aggregator and data pipeline talk to the
//! container engine only through [`ContainerRuntime`]. [`DockerRuntime`]
//! implements it with bollard; tests use `testing::FakeRuntime`.
//!
//! Removal operations are idempotent: removing something that does not
//! exist succeeds.

pub mod detect;
mod docker;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncWrite;

use crate::config::PullPolicy;
use crate::error::RuntimeError;

pub use docker::{DockerRuntime, connect_docker};

/// Observed container state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Runtime status string ("created", "running", "exited", ...).
    pub status: String,
    pub running: bool,
}

/// A mount in a container spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mount {
    /// Host path bind mount.
    Bind {
        source: PathBuf,
        target: String,
        read_only: bool,
    },
    /// Named volume.
    Volume { name: String, target: String },
}

impl Mount {
    /// Docker `binds` syntax.
    pub fn to_bind_string(&self) -> String {
        match self {
            Mount::Bind {
                source,
                target,
                read_only,
            } => {
                let mode = if *read_only { "ro" } else { "rw" };
                format!("{}:{}:{}", source.display(), target, mode)
            }
            Mount::Volume { name, target } => format!("{}:{}", name, target),
        }
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub hostname: Option<String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub mounts: Vec<Mount>,
    pub labels: BTreeMap<String, String>,
    /// User-defined network to join (created on demand).
    pub network: Option<String>,
}

/// A command to run inside a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub attach_stdin: bool,
    /// Allocate a pseudo-terminal. Output is then a single console stream.
    pub tty: bool,
}

impl ExecSpec {
    /// Output-only exec.
    pub fn output(cmd: Vec<String>) -> Self {
        Self {
            cmd,
            attach_stdin: false,
            tty: false,
        }
    }

    /// Exec with stdin attached.
    pub fn bidirectional(cmd: Vec<String>, tty: bool) -> Self {
        Self {
            cmd,
            attach_stdin: true,
            tty,
        }
    }
}

/// One chunk of exec output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecChunk {
    Stdout(Bytes),
    Stderr(Bytes),
    /// TTY output (stdout and stderr are not separated).
    Console(Bytes),
}

pub type ExecOutput = Pin<Box<dyn Stream<Item = Result<ExecChunk, RuntimeError>> + Send>>;
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// An attached exec session. The output stream ends when the process exits.
pub struct ExecSession {
    /// Exec instance id, for [`ContainerRuntime::exec_exit_code`].
    pub id: String,
    pub output: ExecOutput,
    /// Present when the exec was created with stdin attached.
    pub input: Option<ExecInput>,
}

/// Primitives the core needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `tag` (`name:version`).
    async fn pull_image(&self, tag: &str) -> Result<(), RuntimeError>;

    /// Whether `tag` is present locally.
    async fn has_image(&self, tag: &str) -> Result<bool, RuntimeError>;

    /// Inspect a container by name; `None` if it does not exist.
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>, RuntimeError>;

    /// Create a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Force-remove a container. Absent containers are not an error.
    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Whether the engine supports named volumes.
    async fn supports_volumes(&self) -> Result<bool, RuntimeError>;

    async fn has_volume(&self, name: &str) -> Result<bool, RuntimeError>;

    async fn create_volume(&self, name: &str) -> Result<(), RuntimeError>;

    /// Remove a volume. Absent volumes are not an error.
    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError>;

    /// Run a command in a running container with attached streams.
    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecSession, RuntimeError>;

    /// Exit code of a finished exec; `None` while it is still running.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError>;
}

/// Pull `tag` according to `policy`.
pub async fn ensure_image(
    runtime: &dyn ContainerRuntime,
    tag: &str,
    policy: PullPolicy,
) -> Result<(), RuntimeError> {
    if policy == PullPolicy::Missing && runtime.has_image(tag).await? {
        tracing::debug!("Image '{}' exists locally", tag);
        return Ok(());
    }
    runtime.pull_image(tag).await
}
