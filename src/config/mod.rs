//! Configuration documents: parsing, persistence and typed views.

pub mod document;
pub mod model;
pub mod store;

use std::path::PathBuf;

use tracing::info;

use crate::error::ConfigError;
pub use document::Document;
pub use model::{DomainRecord, DomainRegistry, GlobalConfig};

/// Locations of the two configuration documents and their templates.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Global deployment config.
    pub global: PathBuf,
    /// Template copied to `global` on first run.
    pub global_template: PathBuf,
    /// Domain registry.
    pub domains: PathBuf,
    /// Template copied to `domains` on first run.
    pub domains_template: PathBuf,
}

impl ConfigPaths {
    /// Loads the global config, bootstrapping it from the template if missing.
    pub fn load_global(&self) -> Result<GlobalConfig, ConfigError> {
        let doc = store::load_or_bootstrap(&self.global, &self.global_template, store::GLOBAL_EXAMPLE)?;
        info!(path = %self.global.display(), "Global configuration loaded");
        Ok(GlobalConfig::new(doc))
    }

    /// Loads the domain registry, bootstrapping it from the template if missing.
    pub fn load_registry(&self) -> Result<DomainRegistry, ConfigError> {
        let doc = store::load_or_bootstrap(&self.domains, &self.domains_template, store::DOMAINS_EXAMPLE)?;
        info!(path = %self.domains.display(), "Domain registry loaded");
        Ok(DomainRegistry::new(doc))
    }

    /// Loads the registry for editing; a missing file starts an empty one.
    pub fn load_registry_for_edit(&self) -> Result<DomainRegistry, ConfigError> {
        match store::load(&self.domains) {
            Ok(doc) => Ok(DomainRegistry::new(doc)),
            Err(ConfigError::NotFound { .. }) => Ok(DomainRegistry::default()),
            Err(e) => Err(e),
        }
    }

    /// Writes the registry back to disk.
    pub fn save_registry(&self, registry: &DomainRegistry) -> Result<(), ConfigError> {
        store::save(&self.domains, registry.document())
    }

    /// Writes the global config back to disk.
    pub fn save_global(&self, global: &GlobalConfig) -> Result<(), ConfigError> {
        store::save(&self.global, global.document())
    }
}
