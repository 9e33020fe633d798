//! Service registry persisted as a single JSON document.
//!
//! [`ConfigStore`] owns the ordered service list, the default-service
//! pointer and the admin hostname. Mutations are in-memory until
//! [`ConfigStore::save`] writes the whole document through the
//! [`StoreBackend`] it was opened with.

mod backend;

pub use backend::{JsonFileBackend, MemoryBackend, StoreBackend};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::service::{Service, ServicePatch};

/// Admin hostname used when the document does not set one.
pub const DEFAULT_ADMIN_HOSTNAME: &str = "pma.localhost";

/// Persisted document shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default = "default_admin_hostname")]
    pub admin_hostname: String,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            default: None,
            admin_hostname: default_admin_hostname(),
            services: Vec::new(),
        }
    }
}

fn default_admin_hostname() -> String {
    DEFAULT_ADMIN_HOSTNAME.to_string()
}

/// In-memory view of the configured services.
pub struct ConfigStore {
    backend: Box<dyn StoreBackend>,
    default: Option<String>,
    admin_hostname: String,
    services: Vec<Service>,
}

impl ConfigStore {
    /// Load the document from `backend`; a missing document is an empty store.
    pub fn open(backend: impl StoreBackend + 'static) -> Result<Self> {
        let doc = backend.read()?.unwrap_or_default();
        let mut store = Self {
            backend: Box::new(backend),
            default: doc.default,
            admin_hostname: doc.admin_hostname,
            services: Vec::new(),
        };
        for service in doc.services {
            store.upsert(service);
        }
        if let Some(name) = store.default.clone()
            && !store.has_service(&name)
        {
            tracing::warn!("Default service '{}' is not configured, clearing it", name);
            store.default = None;
        }
        Ok(store)
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn admin_hostname(&self) -> &str {
        &self.admin_hostname
    }

    pub fn set_admin_hostname(&mut self, hostname: impl Into<String>) {
        self.admin_hostname = hostname.into();
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name() == name)
    }

    pub fn has_default_service(&self) -> bool {
        self.default.is_some()
    }

    pub fn is_default(&self, name: &str) -> bool {
        self.default.as_deref() == Some(name)
    }

    pub fn get_service(&self, name: &str) -> Result<&Service> {
        self.services
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| ServiceError::NotFound {
                name: name.to_string(),
            })
    }

    /// Resolve `name`, falling back to the default service when it is
    /// absent or empty.
    pub fn get_service_or_default(&self, name: Option<&str>) -> Result<&Service> {
        match name.filter(|n| !n.is_empty()) {
            Some(name) => self.get_service(name),
            None => {
                let default = self.default.as_deref().ok_or(ServiceError::NoDefault)?;
                self.get_service(default)
            }
        }
    }

    /// Insert or replace by name. The first service ever added becomes the
    /// default.
    pub fn set_service(&mut self, service: Service) {
        let name = service.name().to_string();
        self.upsert(service);
        if self.default.is_none() && self.services.len() == 1 {
            tracing::info!("Service '{}' is now the default", name);
            self.default = Some(name);
        }
    }

    /// Merge `patch` into an existing service. No-op if absent.
    pub fn update_service(&mut self, name: &str, patch: ServicePatch) {
        match self.services.iter_mut().find(|s| s.name() == name) {
            Some(service) => service.apply(patch),
            None => tracing::debug!("update_service: '{}' not configured", name),
        }
    }

    /// Remove a service; clears the default pointer if it pointed here.
    pub fn unset_service(&mut self, name: &str) {
        self.services.retain(|s| s.name() != name);
        if self.is_default(name) {
            tracing::info!("Default service '{}' removed, default cleared", name);
            self.default = None;
        }
    }

    /// Point the default at an existing service.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        self.get_service(name)?;
        self.default = Some(name.to_string());
        Ok(())
    }

    /// Snapshot of the current state as a document.
    pub fn document(&self) -> StoreDocument {
        StoreDocument {
            default: self.default.clone(),
            admin_hostname: self.admin_hostname.clone(),
            services: self.services.clone(),
        }
    }

    /// Persist the full document.
    pub fn save(&self) -> Result<()> {
        self.backend.write(&self.document())?;
        tracing::debug!("Saved {} service(s)", self.services.len());
        Ok(())
    }

    fn upsert(&mut self, service: Service) {
        match self
            .services
            .iter_mut()
            .find(|s| s.name() == service.name())
        {
            Some(existing) => *existing = service,
            None => self.services.push(service),
        }
    }
}
