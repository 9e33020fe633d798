//! Streaming data operations against a running service container.
//!
//! Every operation runs the MariaDB client tools inside the service's
//! container through an exec session:
//!
//! ```text
//!   shell    stdin ──▶ [mariadb <db>]       ──▶ stdout      (tty)
//!   dump               [mariadb-dump <db>]  ──▶ sink
//!   backup             [mariadb-dump <db>]  ──▶ dump/<svc>/<db>/<file>.sql
//!   restore  file  ──▶ [mariadb <db>]       ──▶ sink        (+ "exit")
//! ```
//!
//! Backup and restore run without a terminal so the SQL bytes pass through
//! unchanged. Apart from the shell, a non-zero exit of the remote tool fails
//! the operation with the tool's stderr as the reason.
//!
//! Database and file names used for backups must be plain file names;
//! anything that would resolve outside `dump/<svc>/` is rejected.

mod backups;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{AppConfig, Paths};
use crate::error::{Result, ServiceError};
use crate::prompt::Prompter;
use crate::runtime::{
    ContainerRuntime, ExecChunk, ExecInput, ExecOutput, ExecSession, ExecSpec,
};
use crate::service::Service;

pub use backups::BackupSet;

/// Client binary inside the container.
pub const CLIENT_BIN: &str = "mariadb";
/// Dump binary inside the container.
pub const DUMP_BIN: &str = "mariadb-dump";

/// Sent to the client after the restore input so it exits cleanly.
const EXIT_COMMAND: &[u8] = b"exit\n";
const BACKUP_EXTENSION: &str = ".sql";
const FILENAME_FORMAT: &str = "%Y-%m-%d %H-%M";
const READ_CHUNK: usize = 64 * 1024;

/// Source of the current local time for default backup names.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Whether a schema is internal to the server and hidden from listings.
pub fn is_system_schema(name: &str) -> bool {
    name == "mysql" || name.ends_with("_schema")
}

/// Append `.sql` unless already present.
pub fn with_backup_extension(filename: &str) -> String {
    if filename.ends_with(BACKUP_EXTENSION) {
        filename.to_string()
    } else {
        format!("{}{}", filename, BACKUP_EXTENSION)
    }
}

/// Output bytes forwarded plus any stderr collected along the way.
#[derive(Debug, Default)]
struct Relayed {
    bytes: u64,
    stderr: Vec<u8>,
}

/// Shell, dump, backup and restore for service containers.
pub struct DataPipeline {
    runtime: Arc<dyn ContainerRuntime>,
    paths: Paths,
    clock: Clock,
}

impl DataPipeline {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &AppConfig) -> Self {
        Self {
            runtime,
            paths: config.paths.clone(),
            clock: Arc::new(|| chrono::Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Container name of `service`, or `NotRunning`.
    async fn require_running(&self, service: &Service) -> Result<String> {
        let container = service.container_name();
        let running = self
            .runtime
            .inspect_container(&container)
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))?
            .is_some_and(|s| s.running);
        if !running {
            return Err(ServiceError::NotRunning {
                name: service.name().to_string(),
                container,
            });
        }
        Ok(container)
    }

    /// User databases on the server, system schemas excluded.
    pub async fn list_databases(&self, service: &Service) -> Result<Vec<String>> {
        let container = self.require_running(service).await?;
        let mut cmd = vec![CLIENT_BIN.to_string()];
        cmd.extend(service.auth_args());
        cmd.extend(["-N", "-B", "-e", "SHOW DATABASES"].map(String::from));

        let session = self
            .runtime
            .exec(&container, &ExecSpec::output(cmd))
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))?;

        let mut stdout = Vec::new();
        let relayed = relay_output(session.output, &mut stdout, service.name(), "list databases")
            .await?;
        self.finish_exec(&session.id, service, "list databases", &relayed.stderr)
            .await?;

        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && !is_system_schema(name))
            .map(str::to_string)
            .collect())
    }

    /// Use `database` if given, otherwise ask the user to pick one.
    pub async fn resolve_database(
        &self,
        service: &Service,
        database: Option<String>,
        prompter: &dyn Prompter,
    ) -> Result<String> {
        if let Some(database) = database {
            return Ok(database);
        }
        let required = || ServiceError::DatabaseRequired {
            service: service.name().to_string(),
        };
        if !prompter.is_interactive() {
            return Err(required());
        }
        let databases = self.list_databases(service).await?;
        if databases.is_empty() {
            return Err(required());
        }
        Ok(prompter.select("Select a database", &databases)?)
    }

    /// Relay an interactive client session between `stdin` and `stdout`
    /// until the remote client exits.
    pub async fn shell<R, W>(
        &self,
        service: &Service,
        database: Option<String>,
        prompter: &dyn Prompter,
        mut stdin: R,
        mut stdout: W,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let container = self.require_running(service).await?;
        let database = self.resolve_database(service, database, prompter).await?;

        let mut cmd = vec![CLIENT_BIN.to_string()];
        cmd.extend(service.auth_args());
        cmd.push(database);

        let session = self
            .runtime
            .exec(&container, &ExecSpec::bidirectional(cmd, true))
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))?;
        let mut input = take_input(session.input, service)?;

        let drain = relay_output(session.output, &mut stdout, service.name(), "shell");
        let feed = async {
            tokio::io::copy(&mut stdin, &mut input).await?;
            input.shutdown().await
        };
        tokio::pin!(drain);
        tokio::pin!(feed);

        // The session ends when the remote side does; local EOF only closes stdin.
        tokio::select! {
            relayed = &mut drain => return relayed.map(|_| ()),
            fed = &mut feed => {
                if let Err(e) = fed {
                    tracing::debug!("Shell input for '{}' closed: {}", service.name(), e);
                }
            }
        }
        drain.await.map(|_| ())
    }

    /// Stream a dump of `database` into `sink`. No file is written.
    pub async fn dump<W>(
        &self,
        service: &Service,
        database: Option<String>,
        prompter: &dyn Prompter,
        mut sink: W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let container = self.require_running(service).await?;
        let database = self.resolve_database(service, database, prompter).await?;

        let mut cmd = vec![DUMP_BIN.to_string()];
        cmd.extend(service.auth_args());
        cmd.push("--add-drop-table".to_string());
        cmd.push(database.clone());

        let session = self
            .runtime
            .exec(&container, &ExecSpec::output(cmd))
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))?;

        let context = format!("dump {}", database);
        let relayed = relay_output(session.output, &mut sink, service.name(), &context).await?;
        self.finish_exec(&session.id, service, &context, &relayed.stderr)
            .await?;
        Ok(relayed.bytes)
    }

    /// Write a dump of `database` to `dump/<service>/<database>/<filename>`.
    /// The target only changes once the dump has completed successfully.
    pub async fn backup(
        &self,
        service: &Service,
        database: Option<String>,
        filename: Option<String>,
        prompter: &dyn Prompter,
    ) -> Result<PathBuf> {
        let container = self.require_running(service).await?;
        let database = self.resolve_database(service, database, prompter).await?;
        backups::check_component("database", &database)?;
        let filename = match filename {
            Some(filename) => filename,
            None => {
                let default = (self.clock)().format(FILENAME_FORMAT).to_string();
                prompter.input("Backup filename", Some(&default))?
            }
        };
        let filename = with_backup_extension(&filename);
        backups::check_component("file", &filename)?;

        let dir = self.paths.database_dump_dir(service.name(), &database);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ServiceError::io(&dir, e))?;
        let path = dir.join(&filename);
        // Written beside the target and renamed over it only once complete.
        let partial = dir.join(format!(".{}.partial", filename));

        let mut cmd = vec![DUMP_BIN.to_string()];
        cmd.extend(service.auth_args());
        cmd.extend(["--add-drop-table", "--hex-blob"].map(String::from));
        cmd.push(database.clone());

        let ExecSession { id, output, input } = self
            .runtime
            .exec(&container, &ExecSpec::bidirectional(cmd, false))
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))?;
        // Attached only because some engines require it; the dump reads nothing.
        if let Some(mut input) = input
            && let Err(e) = input.shutdown().await
        {
            tracing::debug!("Closing backup stdin for '{}': {}", service.name(), e);
        }

        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| ServiceError::io(&partial, e))?;
        let context = format!("backup {}/{}", database, filename);
        let copied = async {
            let relayed = relay_output(output, &mut file, service.name(), &context).await?;
            file.sync_all()
                .await
                .map_err(|e| ServiceError::io(&partial, e))?;
            self.finish_exec(&id, service, &context, &relayed.stderr)
                .await?;
            Ok::<_, ServiceError>(relayed)
        }
        .await;
        drop(file);

        let finished = match copied {
            Ok(relayed) => tokio::fs::rename(&partial, &path)
                .await
                .map(|()| relayed)
                .map_err(|e| ServiceError::io(&path, e)),
            Err(e) => Err(e),
        };

        match finished {
            Ok(relayed) => {
                tracing::info!(
                    "Backed up '{}' of service '{}' to {} ({} bytes)",
                    database,
                    service.name(),
                    path.display(),
                    relayed.bytes
                );
                Ok(path)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    tracing::warn!(
                        "Could not remove partial backup {}: {}",
                        partial.display(),
                        rm
                    );
                }
                Err(e)
            }
        }
    }

    /// Feed a backup file into the client for `database`, mirroring the
    /// client's output into `sink`.
    pub async fn restore<W>(
        &self,
        service: &Service,
        database: Option<String>,
        filename: Option<String>,
        prompter: &dyn Prompter,
        mut sink: W,
    ) -> Result<PathBuf>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let container = self.require_running(service).await?;
        let (database, path) = self
            .resolve_backup_file(service, database, filename, prompter)
            .await?;

        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| ServiceError::io(&path, e))?;

        let mut cmd = vec![CLIENT_BIN.to_string()];
        cmd.extend(service.auth_args());
        cmd.push(database.clone());

        let session = self
            .runtime
            .exec(&container, &ExecSpec::bidirectional(cmd, false))
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))?;
        let mut input = take_input(session.input, service)?;

        let context = format!("restore {}", database);
        let feed = feed_file(&mut file, &mut input, &path, service.name(), &context);
        let drain = relay_output(session.output, &mut sink, service.name(), &context);
        let result = tokio::try_join!(feed, drain);
        drop(file);

        let (fed, relayed) = result?;
        self.finish_exec(&session.id, service, &context, &relayed.stderr)
            .await?;
        tracing::info!(
            "Restored {} into '{}' of service '{}' ({} bytes)",
            path.display(),
            database,
            service.name(),
            fed
        );
        Ok(path)
    }

    /// Delete one backup file after confirmation.
    pub async fn delete_backup(
        &self,
        service: &Service,
        database: Option<String>,
        filename: Option<String>,
        yes: bool,
        prompter: &dyn Prompter,
    ) -> Result<PathBuf> {
        let (_, path) = self
            .resolve_backup_file(service, database, filename, prompter)
            .await?;

        if !yes {
            let action = format!("deleting backup {}", path.display());
            let question = format!("Delete backup {}?", path.display());
            match prompter.confirm(&question, false) {
                Ok(true) => {}
                Ok(false) => return Err(ServiceError::Canceled { action }),
                Err(e) => {
                    tracing::debug!("Confirmation unavailable: {}", e);
                    return Err(ServiceError::Canceled {
                        action: format!("{} (pass --yes to skip confirmation)", action),
                    });
                }
            }
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| ServiceError::io(&path, e))?;
        tracing::info!("Deleted backup {}", path.display());
        Ok(path)
    }

    /// Backed-up databases of `service` and their files.
    pub async fn list_backups(&self, service: &Service) -> Result<Vec<BackupSet>> {
        backups::list(&self.paths, service.name()).await
    }

    /// Fail with `Stream` when the exec exited non-zero, carrying its stderr.
    /// Otherwise the stderr is logged as warnings.
    async fn finish_exec(
        &self,
        exec_id: &str,
        service: &Service,
        context: &str,
        stderr: &[u8],
    ) -> Result<()> {
        let exit_code = self
            .runtime
            .exec_exit_code(exec_id)
            .await
            .map_err(|e| ServiceError::runtime(service.name(), e))?;
        match exit_code {
            Some(0) => {}
            Some(code) => {
                return Err(ServiceError::Stream {
                    name: service.name().to_string(),
                    context: context.to_string(),
                    reason: exit_reason(code, stderr),
                });
            }
            None => tracing::debug!(
                "Exec {} for '{}' has not reported an exit code",
                exec_id,
                service.name()
            ),
        }
        log_stderr(service.name(), stderr);
        Ok(())
    }

    /// Resolve database and file among existing backups; the file must exist.
    async fn resolve_backup_file(
        &self,
        service: &Service,
        database: Option<String>,
        filename: Option<String>,
        prompter: &dyn Prompter,
    ) -> Result<(String, PathBuf)> {
        let name = service.name();
        let database = match database {
            Some(database) => database,
            None => {
                let required = || ServiceError::DatabaseRequired {
                    service: name.to_string(),
                };
                if !prompter.is_interactive() {
                    return Err(required());
                }
                let databases = backups::databases(&self.paths, name).await?;
                if databases.is_empty() {
                    return Err(required());
                }
                prompter.select("Select a backed-up database", &databases)?
            }
        };
        backups::check_component("database", &database)?;

        let filename = match filename {
            Some(filename) => with_backup_extension(&filename),
            None => {
                let required = || ServiceError::FilenameRequired {
                    service: name.to_string(),
                    database: database.clone(),
                };
                if !prompter.is_interactive() {
                    return Err(required());
                }
                let files = backups::files(&self.paths, name, &database).await?;
                if files.is_empty() {
                    return Err(required());
                }
                prompter.select("Select a backup", &files)?
            }
        };
        backups::check_component("file", &filename)?;

        let path = self
            .paths
            .database_dump_dir(name, &database)
            .join(&filename);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ServiceError::io(&path, e))?;
        if !exists {
            return Err(ServiceError::FileNotFound { path });
        }
        Ok((database, path))
    }
}

fn take_input(input: Option<ExecInput>, service: &Service) -> Result<ExecInput> {
    input.ok_or_else(|| ServiceError::Stream {
        name: service.name().to_string(),
        context: "attach".to_string(),
        reason: "exec session has no stdin".to_string(),
    })
}

/// Copy output chunks into `sink` until the stream ends, flushing each one.
/// stderr is collected rather than forwarded.
async fn relay_output<W>(
    mut output: ExecOutput,
    sink: &mut W,
    name: &str,
    context: &str,
) -> Result<Relayed>
where
    W: AsyncWrite + Unpin + Send,
{
    let stream_err = |reason: String| ServiceError::Stream {
        name: name.to_string(),
        context: context.to_string(),
        reason,
    };

    let mut relayed = Relayed::default();
    while let Some(chunk) = output.next().await {
        match chunk.map_err(|e| stream_err(e.to_string()))? {
            ExecChunk::Stderr(bytes) => relayed.stderr.extend_from_slice(&bytes),
            ExecChunk::Stdout(bytes) | ExecChunk::Console(bytes) => {
                sink.write_all(&bytes)
                    .await
                    .map_err(|e| stream_err(format!("write failed: {}", e)))?;
                sink.flush()
                    .await
                    .map_err(|e| stream_err(format!("flush failed: {}", e)))?;
                relayed.bytes += bytes.len() as u64;
            }
        }
    }
    Ok(relayed)
}

/// Write the whole file into `input`, then the exit command, then close it.
async fn feed_file<R>(
    file: &mut R,
    input: &mut ExecInput,
    path: &std::path::Path,
    name: &str,
    context: &str,
) -> Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let stream_err = |e: std::io::Error| ServiceError::Stream {
        name: name.to_string(),
        context: context.to_string(),
        reason: format!("input write failed: {}", e),
    };

    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| ServiceError::io(path, e))?;
        if n == 0 {
            break;
        }
        input.write_all(&buf[..n]).await.map_err(stream_err)?;
        total += n as u64;
    }
    input.write_all(EXIT_COMMAND).await.map_err(stream_err)?;
    input.shutdown().await.map_err(stream_err)?;
    Ok(total)
}

fn exit_reason(code: i64, stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    match text.trim() {
        "" => format!("exited with status {}", code),
        text => format!("exited with status {}: {}", code, text),
    }
}

fn log_stderr(name: &str, stderr: &[u8]) {
    let text = String::from_utf8_lossy(stderr);
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        tracing::warn!("[{}] {}", name, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::StorageMode;
    use crate::testing::{FakeRuntime, ScriptedPrompter};
    use bytes::Bytes;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn fixed_clock() -> Clock {
        Arc::new(|| {
            NaiveDate::from_ymd_opt(2024, 1, 15)
                .and_then(|d| d.and_hms_opt(10, 30, 0))
                .unwrap()
        })
    }

    fn setup(home: &std::path::Path) -> (Arc<FakeRuntime>, DataPipeline, Service) {
        setup_with(home, FakeRuntime::new())
    }

    fn setup_with(
        home: &std::path::Path,
        runtime: FakeRuntime,
    ) -> (Arc<FakeRuntime>, DataPipeline, Service) {
        let runtime = Arc::new(runtime);
        runtime.add_container("mariadb-app", true);
        let pipeline = DataPipeline::new(runtime.clone(), &AppConfig::with_home(home))
            .with_clock(fixed_clock());
        let service = Service::internal("app", StorageMode::Volume)
            .unwrap()
            .with_password("pw");
        (runtime, pipeline, service)
    }

    fn stdout(data: &'static [u8]) -> ExecChunk {
        ExecChunk::Stdout(Bytes::from_static(data))
    }

    #[test]
    fn test_system_schemas() {
        assert!(is_system_schema("mysql"));
        assert!(is_system_schema("information_schema"));
        assert!(is_system_schema("performance_schema"));
        assert!(!is_system_schema("shop"));
        assert!(!is_system_schema("schema_v2"));
    }

    #[test]
    fn test_backup_extension() {
        assert_eq!(with_backup_extension("nightly"), "nightly.sql");
        assert_eq!(with_backup_extension("nightly.sql"), "nightly.sql");
    }

    #[tokio::test]
    async fn test_operations_require_running_container() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        runtime.set_running("mariadb-app", false);
        let prompter = ScriptedPrompter::non_interactive();

        let err = pipeline
            .dump(&service, Some("db".into()), &prompter, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotRunning { .. }));

        let err = pipeline
            .backup(&service, Some("db".into()), None, &prompter)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotRunning { .. }));
        assert!(runtime.exec_calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_databases_filters_system_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        runtime.push_exec_output(vec![
            stdout(b"information_schema\nmysql\nperformance_schema\n"),
            stdout(b"shop\nsys_schema\nblog\n"),
        ]);

        let databases = pipeline.list_databases(&service).await.unwrap();
        assert_eq!(databases, vec!["shop", "blog"]);

        let call = &runtime.exec_calls()[0];
        assert_eq!(
            call.spec.cmd,
            vec!["mariadb", "-uroot", "-ppw", "-N", "-B", "-e", "SHOW DATABASES"]
        );
    }

    #[tokio::test]
    async fn test_database_required_when_not_interactive() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());

        let err = pipeline
            .dump(&service, None, &ScriptedPrompter::non_interactive(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DatabaseRequired { .. }));
        assert!(runtime.exec_calls().is_empty());
    }

    #[tokio::test]
    async fn test_database_prompted_from_live_list() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        runtime.push_exec_output(vec![stdout(b"mysql\nshop\nblog\n")]);
        runtime.push_exec_output(vec![stdout(b"-- dump\n")]);
        let prompter = ScriptedPrompter::new().with_selection("blog");

        let mut sink = Vec::new();
        pipeline
            .dump(&service, None, &prompter, &mut sink)
            .await
            .unwrap();

        assert_eq!(prompter.offered(), vec![vec!["shop", "blog"]]);
        let calls = runtime.exec_calls();
        assert_eq!(calls[1].spec.cmd.last().map(String::as_str), Some("blog"));
    }

    #[tokio::test]
    async fn test_dump_streams_stdout_only() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        runtime.push_exec_output(vec![
            stdout(b"DROP TABLE IF EXISTS `t`;\n"),
            ExecChunk::Stderr(Bytes::from_static(b"Warning: insecure\n")),
            stdout(b"CREATE TABLE `t` (id int);\n"),
        ]);

        let mut sink = Vec::new();
        let bytes = pipeline
            .dump(&service, Some("shop".into()), &ScriptedPrompter::non_interactive(), &mut sink)
            .await
            .unwrap();

        assert_eq!(
            sink,
            b"DROP TABLE IF EXISTS `t`;\nCREATE TABLE `t` (id int);\n".to_vec()
        );
        assert_eq!(bytes, sink.len() as u64);
        let call = &runtime.exec_calls()[0];
        assert!(!call.spec.attach_stdin);
        assert_eq!(
            call.spec.cmd,
            vec!["mariadb-dump", "-uroot", "-ppw", "--add-drop-table", "shop"]
        );
        assert!(!dir.path().join("dump").exists());
    }

    #[tokio::test]
    async fn test_backup_default_filename_uses_clock() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        runtime.push_exec_output(vec![stdout(b"-- MariaDB dump\n")]);

        let path = pipeline
            .backup(&service, Some("mydb".into()), None, &ScriptedPrompter::non_interactive())
            .await
            .unwrap();

        assert_eq!(
            path,
            dir.path()
                .join("dump")
                .join("app")
                .join("mydb")
                .join("2024-01-15 10-30.sql")
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"-- MariaDB dump\n".to_vec());

        let call = &runtime.exec_calls()[0];
        assert!(call.spec.attach_stdin);
        assert!(!call.spec.tty);
        assert!(call.spec.cmd.contains(&"--hex-blob".to_string()));
        assert!(call.input_closed());
    }

    #[tokio::test]
    async fn test_backup_stream_failure_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        runtime.push_exec_failure(vec![stdout(b"partial")], "connection reset");

        let err = pipeline
            .backup(
                &service,
                Some("mydb".into()),
                Some("broken".into()),
                &ScriptedPrompter::non_interactive(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Stream { .. }));
        assert!(!dir.path().join("dump/app/mydb/broken.sql").exists());
        let leftovers = std::fs::read_dir(dir.path().join("dump/app/mydb")).unwrap();
        assert_eq!(leftovers.count(), 0);
    }

    #[tokio::test]
    async fn test_failed_backup_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        let prompter = ScriptedPrompter::non_interactive();
        let existing = dir.path().join("dump/app/mydb/snap.sql");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"-- good\n").unwrap();

        runtime.push_exec_failure(vec![stdout(b"-- trunc")], "connection reset");
        let err = pipeline
            .backup(&service, Some("mydb".into()), Some("snap".into()), &prompter)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Stream { .. }));
        assert_eq!(std::fs::read(&existing).unwrap(), b"-- good\n".to_vec());

        runtime.push_exec_output(vec![stdout(b"-- newer\n")]);
        pipeline
            .backup(&service, Some("mydb".into()), Some("snap".into()), &prompter)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&existing).unwrap(), b"-- newer\n".to_vec());
    }

    #[tokio::test]
    async fn test_backup_fails_when_dump_exits_non_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        runtime.push_exec_exit(
            vec![ExecChunk::Stderr(Bytes::from_static(
                b"mariadb-dump: Got error: 1049: \"Unknown database 'nope'\"\n",
            ))],
            2,
        );

        let err = pipeline
            .backup(
                &service,
                Some("nope".into()),
                Some("snap".into()),
                &ScriptedPrompter::non_interactive(),
            )
            .await
            .unwrap_err();

        match err {
            ServiceError::Stream { reason, .. } => {
                assert!(reason.contains("status 2"), "{}", reason);
                assert!(reason.contains("Unknown database 'nope'"), "{}", reason);
            }
            other => panic!("expected Stream, got {:?}", other),
        }
        let db_dir = dir.path().join("dump/app/nope");
        assert_eq!(std::fs::read_dir(&db_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dump_fails_when_dump_exits_non_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        runtime.push_exec_exit(
            vec![ExecChunk::Stderr(Bytes::from_static(b"Access denied\n"))],
            2,
        );

        let err = pipeline
            .dump(&service, Some("shop".into()), &ScriptedPrompter::non_interactive(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Stream { ref reason, .. } if reason.contains("Access denied")
        ));
    }

    #[tokio::test]
    async fn test_backup_names_stay_inside_dump_dir() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        let (runtime, pipeline, service) = setup(&home);
        let prompter = ScriptedPrompter::non_interactive();

        let err = pipeline
            .backup(
                &service,
                Some("mydb".into()),
                Some("../../../../escaped".into()),
                &prompter,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidBackupName { kind: "file", .. }));

        let err = pipeline
            .backup(&service, Some("../mydb".into()), Some("snap".into()), &prompter)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidBackupName { kind: "database", .. }));
        assert!(runtime.exec_calls().is_empty());
        assert!(!dir.path().join("escaped.sql").exists());
        assert!(!home.join("dump").exists());
    }

    #[tokio::test]
    async fn test_restore_and_delete_reject_outside_paths() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        let (runtime, pipeline, service) = setup(&home);
        let prompter = ScriptedPrompter::non_interactive();
        let victim = dir.path().join("victim.sql");
        std::fs::write(&victim, b"keep").unwrap();
        std::fs::create_dir_all(home.join("dump/app/mydb")).unwrap();

        let err = pipeline
            .restore(
                &service,
                Some("mydb".into()),
                Some("../../../../victim".into()),
                &prompter,
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidBackupName { kind: "file", .. }));

        let err = pipeline
            .delete_backup(
                &service,
                Some("mydb".into()),
                Some("../../../../victim".into()),
                true,
                &prompter,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidBackupName { kind: "file", .. }));

        let err = pipeline
            .delete_backup(&service, Some("..".into()), Some("x".into()), true, &prompter)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidBackupName { kind: "database", .. }));

        assert!(victim.exists());
        assert!(runtime.exec_calls().is_empty());
    }

    #[tokio::test]
    async fn test_backup_then_restore_is_byte_faithful() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        let dump: &'static [u8] = b"INSERT INTO `b` VALUES (0x00FF10);\n\xc3\xa9\r\n";
        runtime.push_exec_output(vec![stdout(&dump[..10]), stdout(&dump[10..])]);
        runtime.push_exec_output(vec![stdout(b"restored\n")]);
        let prompter = ScriptedPrompter::non_interactive();

        let path = pipeline
            .backup(&service, Some("mydb".into()), Some("snap".into()), &prompter)
            .await
            .unwrap();
        let mut sink = Vec::new();
        let restored = pipeline
            .restore(&service, Some("mydb".into()), Some("snap".into()), &prompter, &mut sink)
            .await
            .unwrap();

        assert_eq!(restored, path);
        assert_eq!(sink, b"restored\n".to_vec());
        let call = &runtime.exec_calls()[1];
        assert_eq!(call.spec.cmd, vec!["mariadb", "-uroot", "-ppw", "mydb"]);
        let mut expected = dump.to_vec();
        expected.extend_from_slice(b"exit\n");
        assert_eq!(call.input(), expected);
        assert!(call.input_closed());
    }

    #[tokio::test]
    async fn test_restore_fails_when_client_exits_non_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        let file = dir.path().join("dump/app/shop/bad.sql");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"SELEC 1;\n").unwrap();
        runtime.push_exec_exit(
            vec![ExecChunk::Stderr(Bytes::from_static(
                b"ERROR 1064 (42000) at line 1: You have an error in your SQL syntax\n",
            ))],
            1,
        );

        let err = pipeline
            .restore(
                &service,
                Some("shop".into()),
                Some("bad".into()),
                &ScriptedPrompter::non_interactive(),
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Stream { ref reason, .. } if reason.contains("ERROR 1064")
        ));
    }

    #[tokio::test]
    async fn test_restore_input_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) =
            setup_with(dir.path(), FakeRuntime::new().failing_input());
        let file = dir.path().join("dump/app/shop/a.sql");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"SELECT 1;\n").unwrap();
        runtime.push_exec_output(vec![]);

        let err = pipeline
            .restore(
                &service,
                Some("shop".into()),
                Some("a".into()),
                &ScriptedPrompter::non_interactive(),
                Vec::new(),
            )
            .await
            .unwrap_err();

        assert!(
            matches!(err, ServiceError::Stream { ref reason, .. } if reason.contains("input write failed"))
        );
        let call = &runtime.exec_calls()[0];
        assert!(call.input().is_empty());
        assert!(!call.input_closed());
    }

    #[tokio::test]
    async fn test_restore_output_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        let file = dir.path().join("dump/app/shop/a.sql");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"SELECT 1;\n").unwrap();
        runtime.push_exec_failure(vec![stdout(b"partial")], "connection reset");

        let mut sink = Vec::new();
        let err = pipeline
            .restore(
                &service,
                Some("shop".into()),
                Some("a".into()),
                &ScriptedPrompter::non_interactive(),
                &mut sink,
            )
            .await
            .unwrap_err();

        assert!(
            matches!(err, ServiceError::Stream { ref reason, .. } if reason.contains("connection reset"))
        );
        assert_eq!(sink, b"partial".to_vec());
    }

    #[tokio::test]
    async fn test_restore_prompts_from_existing_backups() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        let db_dir = dir.path().join("dump/app/shop");
        std::fs::create_dir_all(&db_dir).unwrap();
        std::fs::write(db_dir.join("a.sql"), b"SELECT 1;\n").unwrap();
        std::fs::write(db_dir.join("b.sql"), b"SELECT 2;\n").unwrap();
        std::fs::create_dir_all(dir.path().join("dump/app/blog")).unwrap();

        let prompter = ScriptedPrompter::new().with_selection("shop").with_selection("b.sql");
        pipeline
            .restore(&service, None, None, &prompter, Vec::new())
            .await
            .unwrap();

        assert_eq!(
            prompter.offered(),
            vec![vec!["blog", "shop"], vec!["a.sql", "b.sql"]]
        );
        assert_eq!(runtime.exec_calls()[0].input(), b"SELECT 2;\nexit\n".to_vec());
    }

    #[tokio::test]
    async fn test_restore_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let (_runtime, pipeline, service) = setup(dir.path());
        let prompter = ScriptedPrompter::non_interactive();

        let err = pipeline
            .restore(&service, Some("shop".into()), None, &prompter, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::FilenameRequired { .. }));

        let err = pipeline
            .restore(&service, Some("shop".into()), Some("nope".into()), &prompter, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_backup_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let (_runtime, pipeline, service) = setup(dir.path());
        let file = dir.path().join("dump/app/shop/old.sql");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"x").unwrap();

        let declined = ScriptedPrompter::new().with_confirmation(false);
        let err = pipeline
            .delete_backup(&service, Some("shop".into()), Some("old".into()), false, &declined)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Canceled { .. }));
        assert!(file.exists());

        let err = pipeline
            .delete_backup(
                &service,
                Some("shop".into()),
                Some("old".into()),
                false,
                &ScriptedPrompter::non_interactive(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Canceled { .. }));

        pipeline
            .delete_backup(
                &service,
                Some("shop".into()),
                Some("old.sql".into()),
                true,
                &ScriptedPrompter::non_interactive(),
            )
            .await
            .unwrap();
        assert!(!file.exists());

        let err = pipeline
            .delete_backup(
                &service,
                Some("shop".into()),
                Some("old".into()),
                true,
                &ScriptedPrompter::non_interactive(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_shell_relays_until_remote_exits() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, pipeline, service) = setup(dir.path());
        runtime.push_exec_output(vec![
            ExecChunk::Console(Bytes::from_static(b"MariaDB [shop]> ")),
            ExecChunk::Console(Bytes::from_static(b"Bye\n")),
        ]);

        let mut out = Vec::new();
        pipeline
            .shell(
                &service,
                Some("shop".into()),
                &ScriptedPrompter::non_interactive(),
                &b"quit\n"[..],
                &mut out,
            )
            .await
            .unwrap();

        assert_eq!(out, b"MariaDB [shop]> Bye\n".to_vec());
        let call = &runtime.exec_calls()[0];
        assert!(call.spec.tty);
        assert!(call.spec.attach_stdin);
        assert_eq!(call.spec.cmd, vec!["mariadb", "-uroot", "-ppw", "shop"]);
    }
}
