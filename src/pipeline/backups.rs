//! Listing of the on-disk dump directory.

use std::path::{Component, Path};

use crate::config::Paths;
use crate::error::{Result, ServiceError};

/// Backup files of one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    pub database: String,
    pub files: Vec<String>,
}

/// Reject database and file names that are not one visible path component
/// of the dump directory.
pub(super) fn check_component(kind: &'static str, value: &str) -> Result<()> {
    let mut components = Path::new(value).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if single && !value.starts_with('.') && !value.contains(['/', '\\', '\0']) {
        Ok(())
    } else {
        Err(ServiceError::InvalidBackupName {
            kind,
            value: value.to_string(),
        })
    }
}

/// Sorted entry names in `dir` matching `want_dir`. A missing directory is
/// empty. Hidden entries (in-progress backups) are skipped.
async fn entries(dir: &Path, want_dir: bool) -> Result<Vec<String>> {
    let mut read = match tokio::fs::read_dir(dir).await {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ServiceError::io(dir, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = read
        .next_entry()
        .await
        .map_err(|e| ServiceError::io(dir, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| ServiceError::io(entry.path(), e))?;
        if file_type.is_dir() != want_dir {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && !name.starts_with('.')
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Databases with a dump directory under `dump/<service>/`.
pub(super) async fn databases(paths: &Paths, service: &str) -> Result<Vec<String>> {
    entries(&paths.service_dump_dir(service), true).await
}

/// Backup files in `dump/<service>/<database>/`.
pub(super) async fn files(paths: &Paths, service: &str, database: &str) -> Result<Vec<String>> {
    entries(&paths.database_dump_dir(service, database), false).await
}

pub(super) async fn list(paths: &Paths, service: &str) -> Result<Vec<BackupSet>> {
    let mut sets = Vec::new();
    for database in databases(paths, service).await? {
        let files = files(paths, service, &database).await?;
        sets.push(BackupSet { database, files });
    }
    Ok(sets)
}
