//! Test doubles for the runtime and prompting ports.
//!
//! Provides:
//! - [`FakeRuntime`]: in-memory containers, volumes and images with
//!   scripted exec output, exit codes and recorded exec input
//! - [`ScriptedPrompter`]: answers prompts from pre-loaded queues
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mariadb_services::testing::FakeRuntime;
//! use mariadb_services::runtime::ExecChunk;
//!
//! let runtime = Arc::new(FakeRuntime::new());
//! runtime.push_exec_output(vec![ExecChunk::Stdout("mydb\n".into())]);
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::{PromptError, RuntimeError};
use crate::prompt::Prompter;
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerStatus, ExecChunk, ExecSession, ExecSpec,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Queued outcome of one exec call.
struct ExecScript {
    chunks: Vec<Result<ExecChunk, RuntimeError>>,
    exit_code: Option<i64>,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    running: bool,
}

/// One recorded exec call.
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub id: String,
    pub container: String,
    pub spec: ExecSpec,
    input: Arc<Mutex<Vec<u8>>>,
    input_closed: Arc<AtomicBool>,
}

impl ExecCall {
    /// Bytes written to the session's stdin so far.
    pub fn input(&self) -> Vec<u8> {
        lock(&self.input).clone()
    }

    /// Whether the caller shut down stdin.
    pub fn input_closed(&self) -> bool {
        self.input_closed.load(Ordering::SeqCst)
    }
}

/// In-memory [`ContainerRuntime`].
pub struct FakeRuntime {
    containers: Mutex<BTreeMap<String, FakeContainer>>,
    volumes: Mutex<BTreeSet<String>>,
    images: Mutex<BTreeSet<String>>,
    pulled: Mutex<Vec<String>>,
    exec_scripts: Mutex<VecDeque<ExecScript>>,
    exec_calls: Mutex<Vec<ExecCall>>,
    exec_exits: Mutex<BTreeMap<String, Option<i64>>>,
    create_count: AtomicU32,
    remove_count: AtomicU32,
    volume_support: bool,
    fail_pulls: bool,
    fail_input: bool,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(BTreeMap::new()),
            volumes: Mutex::new(BTreeSet::new()),
            images: Mutex::new(BTreeSet::new()),
            pulled: Mutex::new(Vec::new()),
            exec_scripts: Mutex::new(VecDeque::new()),
            exec_calls: Mutex::new(Vec::new()),
            exec_exits: Mutex::new(BTreeMap::new()),
            create_count: AtomicU32::new(0),
            remove_count: AtomicU32::new(0),
            volume_support: true,
            fail_pulls: false,
            fail_input: false,
        }
    }

    /// Report volumes as unsupported.
    pub fn without_volume_support(mut self) -> Self {
        self.volume_support = false;
        self
    }

    /// Fail every image pull.
    pub fn failing_pulls(mut self) -> Self {
        self.fail_pulls = true;
        self
    }

    /// Fail every write to an exec session's stdin.
    pub fn failing_input(mut self) -> Self {
        self.fail_input = true;
        self
    }

    pub fn add_image(&self, tag: &str) {
        lock(&self.images).insert(tag.to_string());
    }

    pub fn add_volume(&self, name: &str) {
        lock(&self.volumes).insert(name.to_string());
    }

    /// Add a container directly, bypassing create.
    pub fn add_container(&self, name: &str, running: bool) {
        lock(&self.containers).insert(
            name.to_string(),
            FakeContainer {
                spec: ContainerSpec {
                    name: name.to_string(),
                    ..Default::default()
                },
                running,
            },
        );
    }

    pub fn set_running(&self, name: &str, running: bool) {
        if let Some(c) = lock(&self.containers).get_mut(name) {
            c.running = running;
        }
    }

    pub fn container_names(&self) -> Vec<String> {
        lock(&self.containers).keys().cloned().collect()
    }

    pub fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        lock(&self.containers).get(name).map(|c| c.spec.clone())
    }

    pub fn volume_names(&self) -> Vec<String> {
        lock(&self.volumes).iter().cloned().collect()
    }

    pub fn pulled_images(&self) -> Vec<String> {
        lock(&self.pulled).clone()
    }

    pub fn create_count(&self) -> u32 {
        self.create_count.load(Ordering::SeqCst)
    }

    /// Number of container removals that actually removed something.
    pub fn remove_count(&self) -> u32 {
        self.remove_count.load(Ordering::SeqCst)
    }

    /// Queue the output of the next exec call, which then exits with 0.
    pub fn push_exec_output(&self, chunks: Vec<ExecChunk>) {
        self.push_exec_exit(chunks, 0);
    }

    /// Queue the output of the next exec call and its exit code.
    pub fn push_exec_exit(&self, chunks: Vec<ExecChunk>, exit_code: i64) {
        lock(&self.exec_scripts).push_back(ExecScript {
            chunks: chunks.into_iter().map(Ok).collect(),
            exit_code: Some(exit_code),
        });
    }

    /// Queue output that ends in a stream error. The exec never reports an exit.
    pub fn push_exec_failure(&self, chunks: Vec<ExecChunk>, reason: &str) {
        let mut script: Vec<_> = chunks.into_iter().map(Ok).collect();
        script.push(Err(RuntimeError::api("read exec output", "fake", reason)));
        lock(&self.exec_scripts).push_back(ExecScript {
            chunks: script,
            exit_code: None,
        });
    }

    pub fn exec_calls(&self) -> Vec<ExecCall> {
        lock(&self.exec_calls).clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull_image(&self, tag: &str) -> Result<(), RuntimeError> {
        if self.fail_pulls {
            return Err(RuntimeError::ImagePull {
                image: tag.to_string(),
                reason: "registry unreachable".to_string(),
            });
        }
        lock(&self.pulled).push(tag.to_string());
        lock(&self.images).insert(tag.to_string());
        Ok(())
    }

    async fn has_image(&self, tag: &str) -> Result<bool, RuntimeError> {
        Ok(lock(&self.images).contains(tag))
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>, RuntimeError> {
        Ok(lock(&self.containers).get(name).map(|c| ContainerStatus {
            status: if c.running { "running" } else { "exited" }.to_string(),
            running: c.running,
        }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut containers = lock(&self.containers);
        if containers.contains_key(&spec.name) {
            return Err(RuntimeError::api(
                "create container",
                &spec.name,
                "name already in use",
            ));
        }
        containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: false,
            },
        );
        self.create_count.fetch_add(1, Ordering::SeqCst);
        Ok(format!("id-{}", spec.name))
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        match lock(&self.containers).get_mut(name) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(RuntimeError::api("start container", name, "no such container")),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        if lock(&self.containers).remove(name).is_some() {
            self.remove_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn supports_volumes(&self) -> Result<bool, RuntimeError> {
        Ok(self.volume_support)
    }

    async fn has_volume(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(lock(&self.volumes).contains(name))
    }

    async fn create_volume(&self, name: &str) -> Result<(), RuntimeError> {
        if !lock(&self.volumes).insert(name.to_string()) {
            return Err(RuntimeError::api("create volume", name, "already exists"));
        }
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        lock(&self.volumes).remove(name);
        Ok(())
    }

    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecSession, RuntimeError> {
        let running = lock(&self.containers)
            .get(container)
            .is_some_and(|c| c.running);
        if !running {
            return Err(RuntimeError::api("create exec", container, "container not running"));
        }

        let input = Arc::new(Mutex::new(Vec::new()));
        let input_closed = Arc::new(AtomicBool::new(false));
        let mut calls = lock(&self.exec_calls);
        let id = format!("exec-{}", calls.len());
        calls.push(ExecCall {
            id: id.clone(),
            container: container.to_string(),
            spec: spec.clone(),
            input: input.clone(),
            input_closed: input_closed.clone(),
        });
        drop(calls);

        let script = lock(&self.exec_scripts).pop_front().unwrap_or(ExecScript {
            chunks: Vec::new(),
            exit_code: Some(0),
        });
        lock(&self.exec_exits).insert(id.clone(), script.exit_code);
        Ok(ExecSession {
            id,
            output: Box::pin(futures::stream::iter(script.chunks)),
            input: spec.attach_stdin.then(|| {
                Box::pin(RecordingInput {
                    buf: input,
                    closed: input_closed,
                    fail: self.fail_input,
                }) as crate::runtime::ExecInput
            }),
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        lock(&self.exec_exits)
            .get(exec_id)
            .copied()
            .ok_or_else(|| RuntimeError::api("inspect exec", exec_id, "no such exec"))
    }
}

/// stdin sink that records everything written to it.
struct RecordingInput {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    fail: bool,
}

impl AsyncWrite for RecordingInput {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if self.fail {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "exec stdin closed",
            )));
        }
        lock(&self.buf).extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Prompter that answers from queues.
///
/// When a queue is empty it behaves like a non-interactive terminal:
/// inputs fall back to their default, everything else fails.
pub struct ScriptedPrompter {
    interactive: bool,
    inputs: Mutex<VecDeque<String>>,
    passwords: Mutex<VecDeque<String>>,
    selections: Mutex<VecDeque<String>>,
    confirmations: Mutex<VecDeque<bool>>,
    offered: Mutex<Vec<Vec<String>>>,
}

impl Default for ScriptedPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPrompter {
    /// An interactive prompter with empty queues.
    pub fn new() -> Self {
        Self {
            interactive: true,
            inputs: Mutex::new(VecDeque::new()),
            passwords: Mutex::new(VecDeque::new()),
            selections: Mutex::new(VecDeque::new()),
            confirmations: Mutex::new(VecDeque::new()),
            offered: Mutex::new(Vec::new()),
        }
    }

    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            ..Self::new()
        }
    }

    pub fn with_input(self, answer: impl Into<String>) -> Self {
        lock(&self.inputs).push_back(answer.into());
        self
    }

    pub fn with_password(self, answer: impl Into<String>) -> Self {
        lock(&self.passwords).push_back(answer.into());
        self
    }

    pub fn with_selection(self, answer: impl Into<String>) -> Self {
        lock(&self.selections).push_back(answer.into());
        self
    }

    pub fn with_confirmation(self, answer: bool) -> Self {
        lock(&self.confirmations).push_back(answer);
        self
    }

    /// Option lists passed to `select`, in call order.
    pub fn offered(&self) -> Vec<Vec<String>> {
        lock(&self.offered).clone()
    }

    fn unanswered(message: &str) -> PromptError {
        PromptError::NonInteractive {
            prompt: message.to_string(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn input(&self, message: &str, default: Option<&str>) -> Result<String, PromptError> {
        if self.interactive
            && let Some(answer) = lock(&self.inputs).pop_front()
        {
            return Ok(answer);
        }
        default
            .map(str::to_string)
            .ok_or_else(|| Self::unanswered(message))
    }

    fn password(&self, message: &str) -> Result<String, PromptError> {
        if !self.interactive {
            return Err(Self::unanswered(message));
        }
        lock(&self.passwords)
            .pop_front()
            .ok_or_else(|| Self::unanswered(message))
    }

    fn select(&self, message: &str, options: &[String]) -> Result<String, PromptError> {
        lock(&self.offered).push(options.to_vec());
        if !self.interactive {
            return Err(Self::unanswered(message));
        }
        lock(&self.selections)
            .pop_front()
            .ok_or_else(|| Self::unanswered(message))
    }

    fn confirm(&self, message: &str, _default: bool) -> Result<bool, PromptError> {
        if !self.interactive {
            return Err(Self::unanswered(message));
        }
        lock(&self.confirmations)
            .pop_front()
            .ok_or_else(|| Self::unanswered(message))
    }
}
