//! The service entity: one configured MariaDB instance.
//!
//! A [`Service`] is either internal (backed by a container this crate
//! creates, with a [`StorageMode`]) or external (a hostname that is only
//! registered with the admin front-end). Everything derived from a service
//! (container name, image tag, client auth flags, container environment) is
//! computed on demand from its fields.
//!
//! Services are persisted through [`ServiceRecord`], the flat document
//! shape, which also accepts the legacy `user` and `image` keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix for container and default volume names.
pub const NAME_PREFIX: &str = "mariadb";
/// Built-in image used when a service does not name one.
pub const DEFAULT_IMAGE_NAME: &str = "mariadb";
/// Built-in image version.
pub const DEFAULT_IMAGE_VERSION: &str = "latest";
/// Database data directory inside the container.
pub const DATA_DIR: &str = "/var/lib/mysql";

/// Where an internal service keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Bind-mounted host directory scoped by service name.
    #[default]
    Filesystem,
    /// Runtime-managed named volume.
    Volume,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem => write!(f, "filesystem"),
            Self::Volume => write!(f, "volume"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "filesystem" | "fs" | "directory" => Ok(Self::Filesystem),
            "volume" => Ok(Self::Volume),
            _ => Err(format!(
                "invalid storage mode '{}', expected 'filesystem' or 'volume'",
                s
            )),
        }
    }
}

/// Internal vs. external classification of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Backed by a container managed here.
    Internal { storage: StorageMode },
    /// Lives on a host outside our control.
    External { host: String },
}

/// One configured database instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ServiceRecord", into = "ServiceRecord")]
pub struct Service {
    name: String,
    placement: Placement,
    username: Option<String>,
    password: Option<String>,
    password_hash: Option<String>,
    root_password: Option<String>,
    volume: Option<String>,
    image_name: Option<String>,
    image_version: Option<String>,
    env: BTreeMap<String, String>,
}

impl Service {
    /// A container-backed service with the given storage mode.
    pub fn internal(name: impl Into<String>, storage: StorageMode) -> Result<Self, ConfigError> {
        Self::try_from(ServiceRecord {
            name: name.into(),
            storage: Some(storage),
            ..Default::default()
        })
    }

    /// A host-backed service.
    pub fn external(name: impl Into<String>, host: impl Into<String>) -> Result<Self, ConfigError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "host".to_string(),
                message: "external services need a non-empty host".to_string(),
            });
        }
        Self::try_from(ServiceRecord {
            name: name.into(),
            host: Some(host),
            ..Default::default()
        })
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = non_empty(Some(username.into()));
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = non_empty(Some(password.into()));
        self
    }

    pub fn with_root_password(mut self, password: impl Into<String>) -> Self {
        self.root_password = non_empty(Some(password.into()));
        self
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = non_empty(Some(hash.into()));
        self
    }

    /// Use an explicit (custom) volume name instead of the default one.
    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volume = non_empty(Some(volume.into()));
        self
    }

    pub fn with_image(mut self, name: Option<String>, version: Option<String>) -> Self {
        self.image_name = non_empty(name);
        self.image_version = non_empty(version);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn is_external(&self) -> bool {
        matches!(self.placement, Placement::External { .. })
    }

    /// External host, if this is an external service.
    pub fn host(&self) -> Option<&str> {
        match &self.placement {
            Placement::External { host } => Some(host),
            Placement::Internal { .. } => None,
        }
    }

    /// Storage mode, if this is an internal service.
    pub fn storage(&self) -> Option<StorageMode> {
        match self.placement {
            Placement::Internal { storage } => Some(storage),
            Placement::External { .. } => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    /// Root password: the explicit one, or the plain password when no
    /// separate user is configured.
    pub fn root_password(&self) -> Option<&str> {
        match (&self.root_password, &self.username) {
            (Some(root), _) => Some(root),
            (None, None) => self.password.as_deref(),
            (None, Some(_)) => None,
        }
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn container_name(&self) -> String {
        format!("{}-{}", NAME_PREFIX, self.name)
    }

    pub fn image_name(&self) -> &str {
        self.image_name.as_deref().unwrap_or(DEFAULT_IMAGE_NAME)
    }

    pub fn image_version(&self) -> &str {
        self.image_version.as_deref().unwrap_or(DEFAULT_IMAGE_VERSION)
    }

    pub fn image_tag(&self) -> String {
        format!("{}:{}", self.image_name(), self.image_version())
    }

    /// The deterministic volume name derived from the service name.
    pub fn default_volume_name(&self) -> String {
        format!("{}-{}", NAME_PREFIX, self.name)
    }

    /// The volume actually used: the custom one if set, else the default.
    pub fn volume_name(&self) -> String {
        self.volume
            .clone()
            .unwrap_or_else(|| self.default_volume_name())
    }

    /// Whether the volume in use is the deterministic default volume.
    pub fn uses_default_volume(&self) -> bool {
        self.volume_name() == self.default_volume_name()
    }

    /// Client authentication flags for `mariadb` / `mariadb-dump`.
    ///
    /// Internal services authenticate as root; external services use the
    /// configured host, user and password.
    pub fn auth_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match &self.placement {
            Placement::Internal { .. } => {
                args.push("-uroot".to_string());
                if let Some(password) = self.root_password() {
                    args.push(format!("-p{}", password));
                }
            }
            Placement::External { host } => {
                args.push(format!("-h{}", host));
                if let Some(user) = &self.username {
                    args.push(format!("-u{}", user));
                }
                if let Some(password) = &self.password {
                    args.push(format!("-p{}", password));
                }
            }
        }
        args
    }

    /// Credentials the admin front-end should use: `(user, password)`.
    pub fn admin_credentials(&self) -> (Option<&str>, Option<&str>) {
        match self.placement {
            Placement::Internal { .. } => (Some("root"), self.root_password()),
            Placement::External { .. } => (self.username(), self.password()),
        }
    }

    /// Container environment, `KEY=value` pairs. Empty credentials are
    /// never passed through.
    pub fn container_env(&self) -> Vec<String> {
        let mut env = Vec::new();
        match self.root_password() {
            Some(root) => env.push(format!("MARIADB_ROOT_PASSWORD={}", root)),
            None => env.push("MARIADB_ALLOW_EMPTY_ROOT_PASSWORD=1".to_string()),
        }
        if let Some(user) = &self.username {
            env.push(format!("MARIADB_USER={}", user));
            if let Some(password) = &self.password {
                env.push(format!("MARIADB_PASSWORD={}", password));
            }
        }
        env.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
        env
    }

    /// Merge a partial update into this service.
    pub fn apply(&mut self, patch: ServicePatch) {
        if let Some(username) = patch.username {
            self.username = non_empty(Some(username));
        }
        if let Some(password) = patch.password {
            self.password = non_empty(Some(password));
        }
        if let Some(hash) = patch.password_hash {
            self.password_hash = non_empty(Some(hash));
        }
        if let Some(root) = patch.root_password {
            self.root_password = non_empty(Some(root));
        }
        if let Some(storage) = patch.storage {
            match &mut self.placement {
                Placement::Internal { storage: current } => *current = storage,
                Placement::External { .. } => {
                    tracing::debug!("Ignoring storage mode for external service '{}'", self.name)
                }
            }
        }
        if let Some(volume) = patch.volume {
            self.volume = non_empty(Some(volume));
        }
        if let Some(image) = patch.image_name {
            self.image_name = non_empty(Some(image));
        }
        if let Some(version) = patch.image_version {
            self.image_version = non_empty(Some(version));
        }
        self.env.extend(patch.env);
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("placement", &self.placement)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("root_password", &redact(&self.root_password))
            .field("volume", &self.volume)
            .field("image", &self.image_tag())
            .finish_non_exhaustive()
    }
}

/// Partial update for [`Service::apply`]. `None` leaves a field untouched;
/// an empty string clears it.
#[derive(Debug, Clone, Default)]
pub struct ServicePatch {
    pub username: Option<String>,
    pub password: Option<String>,
    pub password_hash: Option<String>,
    pub root_password: Option<String>,
    pub storage: Option<StorageMode>,
    pub volume: Option<String>,
    pub image_name: Option<String>,
    pub image_version: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// Persisted shape of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, alias = "user", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl TryFrom<ServiceRecord> for Service {
    type Error = ConfigError;

    fn try_from(record: ServiceRecord) -> Result<Self, Self::Error> {
        validate_name(&record.name)?;

        let placement = match non_empty(record.host) {
            Some(host) => Placement::External { host },
            None => Placement::Internal {
                storage: record.storage.unwrap_or_default(),
            },
        };

        Ok(Self {
            name: record.name,
            placement,
            username: non_empty(record.username),
            password: non_empty(record.password),
            password_hash: non_empty(record.password_hash),
            root_password: non_empty(record.root_password),
            volume: non_empty(record.volume),
            image_name: non_empty(record.image_name),
            image_version: non_empty(record.image_version),
            env: record.env,
        })
    }
}

impl From<Service> for ServiceRecord {
    fn from(service: Service) -> Self {
        let (host, storage) = match service.placement {
            Placement::Internal { storage } => (None, Some(storage)),
            Placement::External { host } => (Some(host), None),
        };
        Self {
            name: service.name,
            host,
            username: service.username,
            password: service.password,
            password_hash: service.password_hash,
            root_password: service.root_password,
            storage,
            volume: service.volume,
            image_name: service.image_name,
            image_version: service.image_version,
            env: service.env,
        }
    }
}

/// Service names become container, volume and directory names.
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphanumeric()
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: "name".to_string(),
            message: format!(
                "'{}' must start with a letter or digit and contain only [A-Za-z0-9_.-]",
                name
            ),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
