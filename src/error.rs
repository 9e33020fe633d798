//! Error types for service management.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors raised by the config store, lifecycle manager, admin aggregator
/// and data pipeline.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No service registered under this name.
    #[error("Service '{name}' not found")]
    NotFound { name: String },

    /// A service with this name is already registered.
    #[error("Service '{name}' already exists")]
    AlreadyExists { name: String },

    /// No name given and no default service configured.
    #[error("No service name given and no default service is configured")]
    NoDefault,

    /// Container operation attempted on a host-backed service.
    #[error("Service '{name}' is external (host '{host}') and is not managed as a container")]
    ExternalService { name: String, host: String },

    /// The operation needs a running container.
    #[error("Service '{name}' is not running (container '{container}')")]
    NotRunning { name: String, container: String },

    /// Destructive operation on the default service without `force`.
    #[error("Service '{name}' is the default service; pass --force to destroy it")]
    ProtectedDefault { name: String },

    /// The user declined a destructive-action confirmation.
    #[error("Aborted: {action} was not confirmed")]
    Aborted { action: String },

    /// The user declined a confirmation for a non-destructive deletion.
    #[error("Canceled: {action}")]
    Canceled { action: String },

    /// A database name is needed and could not be resolved.
    #[error("A database name is required for service '{service}'")]
    DatabaseRequired { service: String },

    /// A backup filename is needed and could not be resolved.
    #[error("A backup filename is required for '{service}/{database}'")]
    FilenameRequired { service: String, database: String },

    /// A database or file name would leave the dump directory.
    #[error("Invalid backup {kind} name '{value}': must be a single file name")]
    InvalidBackupName { kind: &'static str, value: String },

    /// A backup file does not exist.
    #[error("Backup file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// The container runtime lacks a capability needed by the storage mode.
    #[error("Service '{name}': {feature} is not supported by this container runtime")]
    UnsupportedFeature { name: String, feature: String },

    /// Password confirmation did not match.
    #[error("Passwords for service '{name}' do not match")]
    PasswordMismatch { name: String },

    /// Image pull failed.
    #[error("Failed to pull image '{image}' for service '{name}': {reason}")]
    ImagePullFailed {
        name: String,
        image: String,
        reason: String,
    },

    /// Any other container-runtime failure.
    #[error("Container runtime error for '{name}': {source}")]
    Runtime {
        name: String,
        #[source]
        source: RuntimeError,
    },

    /// An exec stream failed while copying data.
    #[error("Stream for '{name}' ({context}) failed: {reason}")]
    Stream {
        name: String,
        context: String,
        reason: String,
    },

    /// Loading or saving the config document failed.
    #[error(transparent)]
    Store(#[from] ConfigError),

    /// A prompt could not be answered.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// Local filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ServiceError {
    /// Wrap a runtime error with the service name it was raised for.
    ///
    /// Image pull failures are lifted into [`ServiceError::ImagePullFailed`].
    pub fn runtime(name: impl Into<String>, source: RuntimeError) -> Self {
        let name = name.into();
        match source {
            RuntimeError::ImagePull { image, reason } => Self::ImagePullFailed {
                name,
                image,
                reason,
            },
            source => Self::Runtime { name, source },
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the container runtime port.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Docker (or the configured runtime) cannot be reached.
    #[error("Container runtime not available: {reason}")]
    NotAvailable { reason: String },

    /// Pulling an image failed.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePull { image: String, reason: String },

    /// Any other API call failed.
    #[error("{operation} '{target}' failed: {reason}")]
    Api {
        operation: &'static str,
        target: String,
        reason: String,
    },
}

impl RuntimeError {
    pub(crate) fn api(
        operation: &'static str,
        target: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Api {
            operation,
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// Configuration errors (environment and persisted document).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Missing required configuration {key}: {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the prompting port.
#[derive(Debug, Error)]
pub enum PromptError {
    /// A value was needed but the session is not interactive.
    #[error("'{prompt}' needs an answer but the session is not interactive")]
    NonInteractive { prompt: String },

    /// The user pressed Ctrl-C / Ctrl-D.
    #[error("Prompt interrupted")]
    Interrupted,

    #[error("Prompt failed: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_pull_is_lifted() {
        let err = ServiceError::runtime(
            "app",
            RuntimeError::ImagePull {
                image: "mariadb:latest".to_string(),
                reason: "timeout".to_string(),
            },
        );
        assert!(matches!(err, ServiceError::ImagePullFailed { .. }));
        assert_eq!(
            err.to_string(),
            "Failed to pull image 'mariadb:latest' for service 'app': timeout"
        );
    }

    #[test]
    fn test_other_runtime_errors_keep_context() {
        let err = ServiceError::runtime(
            "app",
            RuntimeError::api("start container", "mariadb-app", "boom"),
        );
        assert_eq!(
            err.to_string(),
            "Container runtime error for 'app': start container 'mariadb-app' failed: boom"
        );
    }
}
