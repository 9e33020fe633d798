//! Application configuration.
//!
//! Resolved from environment variables (after `.env` is loaded by
//! [`crate::bootstrap`]) with CLI overrides applied on top. This is the
//! installation-level configuration: where files live, which images and
//! network to use. The per-service registry lives in [`crate::store`].

pub(crate) mod helpers;

use std::path::PathBuf;

use crate::bootstrap::default_home_dir;
use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;
use crate::service::{DEFAULT_IMAGE_NAME, DEFAULT_IMAGE_VERSION};

/// When to pull images before creating containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    /// Pull every time.
    Always,
    /// Pull only when the image is not present locally.
    #[default]
    Missing,
}

impl std::str::FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "missing" | "if-not-present" => Ok(Self::Missing),
            _ => Err(format!(
                "invalid pull policy '{}', expected 'always' or 'missing'",
                s
            )),
        }
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Plugin data root: config document, dumps, admin state.
    pub home: PathBuf,
    /// Root for filesystem-mode database data directories.
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let data_dir = home.join("data");
        Self { home, data_dir }
    }

    pub fn store_path(&self) -> PathBuf {
        self.home.join("services.json")
    }

    /// `dump/`
    pub fn dump_root(&self) -> PathBuf {
        self.home.join("dump")
    }

    /// `dump/<service>/`
    pub fn service_dump_dir(&self, service: &str) -> PathBuf {
        self.dump_root().join(service)
    }

    /// `dump/<service>/<database>/`
    pub fn database_dump_dir(&self, service: &str, database: &str) -> PathBuf {
        self.service_dump_dir(service).join(database)
    }

    /// Admin front-end state directory.
    pub fn admin_dir(&self) -> PathBuf {
        self.home.join("admin")
    }

    /// Host data directory of a filesystem-mode service.
    pub fn service_data_dir(&self, service: &str) -> PathBuf {
        self.data_dir.join(service)
    }
}

/// Installation-level settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub paths: Paths,
    /// Network every managed container joins.
    pub network: String,
    pub default_image: String,
    pub default_image_version: String,
    pub admin_image: String,
    pub pull_policy: PullPolicy,
}

impl AppConfig {
    /// Resolve from the environment. `home_override` comes from `--home`.
    pub fn resolve(home_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        let home = match home_override {
            Some(home) => home,
            None => match optional_env("MARIADB_SERVICES_HOME")? {
                Some(home) => PathBuf::from(home),
                None => default_home_dir().ok_or_else(|| ConfigError::MissingRequired {
                    key: "MARIADB_SERVICES_HOME".to_string(),
                    hint: "no home directory could be determined; set MARIADB_SERVICES_HOME"
                        .to_string(),
                })?,
            },
        };

        let mut paths = Paths::new(home);
        if let Some(data_dir) = optional_env("MARIADB_SERVICES_DATA_DIR")? {
            paths.data_dir = PathBuf::from(data_dir);
        }

        Ok(Self {
            paths,
            network: optional_env("MARIADB_SERVICES_NETWORK")?
                .unwrap_or_else(|| "mariadb-services".to_string()),
            default_image: optional_env("MARIADB_SERVICES_IMAGE")?
                .unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string()),
            default_image_version: optional_env("MARIADB_SERVICES_IMAGE_VERSION")?
                .unwrap_or_else(|| DEFAULT_IMAGE_VERSION.to_string()),
            admin_image: optional_env("MARIADB_SERVICES_ADMIN_IMAGE")?
                .unwrap_or_else(|| "phpmyadmin:latest".to_string()),
            pull_policy: parse_optional_env("MARIADB_SERVICES_PULL", PullPolicy::default())?,
        })
    }

    /// Defaults rooted at `home`, ignoring the environment.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            paths: Paths::new(home),
            network: "mariadb-services".to_string(),
            default_image: DEFAULT_IMAGE_NAME.to_string(),
            default_image_version: DEFAULT_IMAGE_VERSION.to_string(),
            admin_image: "phpmyadmin:latest".to_string(),
            pull_policy: PullPolicy::default(),
        }
    }
}
