//! Startup helpers: locating the data root, loading `.env` files and
//! building the log filter.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

/// Directory name under the user's home.
const HOME_DIR_NAME: &str = ".mariadb-services";

/// Default data root (`~/.mariadb-services`).
pub fn default_home_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(HOME_DIR_NAME))
}

/// Load `.env` from the working directory, then `<home>/.env`.
///
/// Values already present in the environment are never overwritten, so
/// the working-directory file takes precedence over the home one.
///
/// Runs before logging is set up, so a failure is returned for the caller
/// to report once it is.
pub fn load_dotenv(home: Option<&std::path::Path>) -> Result<(), ConfigError> {
    let _ = dotenvy::dotenv();

    let home = home.map(PathBuf::from).or_else(default_home_dir);
    match home.map(|h| h.join(".env")) {
        Some(path) if path.exists() => {
            dotenvy::from_path(&path).map_err(|e| ConfigError::Parse {
                path,
                reason: e.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Log filter from `RUST_LOG`, falling back to `fallback`. Call after
/// [`load_dotenv`] so a `.env` entry counts.
pub fn log_filter(fallback: &str) -> EnvFilter {
    filter_from_env(EnvFilter::DEFAULT_ENV, fallback)
}

fn filter_from_env(var: &str, fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env(var).unwrap_or_else(|_| EnvFilter::new(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_home_dir_name() {
        if let Some(dir) = default_home_dir() {
            assert!(dir.ends_with(HOME_DIR_NAME));
        }
    }

    #[test]
    fn test_dotenv_in_home_feeds_log_filter() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join(".env"),
            "MARIADB_SERVICES_TEST_LOG=mariadb_services=trace\n",
        )
        .unwrap();

        assert_eq!(
            filter_from_env("MARIADB_SERVICES_TEST_LOG", "warn").to_string(),
            "warn"
        );
        load_dotenv(Some(home.path())).unwrap();
        assert_eq!(
            filter_from_env("MARIADB_SERVICES_TEST_LOG", "warn").to_string(),
            "mariadb_services=trace"
        );
    }

    #[test]
    fn test_unreadable_dotenv_is_reported() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(".env"), "NOT A VALID LINE\n").unwrap();

        let err = load_dotenv(Some(home.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
