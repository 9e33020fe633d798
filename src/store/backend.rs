//! Storage ports for the config document.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::ConfigError;
use crate::store::StoreDocument;

/// Reads and writes the whole config document.
pub trait StoreBackend: Send + Sync {
    /// Load the document; `Ok(None)` when nothing has been persisted yet.
    fn read(&self) -> Result<Option<StoreDocument>, ConfigError>;

    /// Replace the persisted document.
    fn write(&self, doc: &StoreDocument) -> Result<(), ConfigError>;
}

/// JSON file on disk, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StoreBackend for JsonFileBackend {
    fn read(&self) -> Result<Option<StoreDocument>, ConfigError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ConfigError::Parse {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn write(&self, doc: &StoreDocument) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let json = serde_json::to_string_pretty(doc).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        // Write to a sibling temp file and rename so a crash mid-write
        // leaves the previous document intact.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json + "\n").map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

/// Shared in-memory document, used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    doc: Arc<Mutex<Option<StoreDocument>>>,
}

impl MemoryBackend {
    pub fn with_document(doc: StoreDocument) -> Self {
        Self {
            doc: Arc::new(Mutex::new(Some(doc))),
        }
    }

    /// The last written document.
    pub fn document(&self) -> Option<StoreDocument> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl StoreBackend for MemoryBackend {
    fn read(&self) -> Result<Option<StoreDocument>, ConfigError> {
        Ok(self.document())
    }

    fn write(&self, doc: &StoreDocument) -> Result<(), ConfigError> {
        *self.doc.lock().unwrap_or_else(|e| e.into_inner()) = Some(doc.clone());
        Ok(())
    }
}
