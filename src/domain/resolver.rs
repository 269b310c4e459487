//! Merging the global config with one domain's overrides.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::effective::{EffectiveConfig, Provenance};
use crate::config::model::{field_spec, DomainRegistry, GlobalConfig, APP_PREFIX, FIELDS};
use crate::error::{ConfigError, DeployError, DomainError, ValidationError};

/// Domain names in the order their sections appear in the registry.
pub fn list_domains(registry: &DomainRegistry) -> Vec<String> {
    registry.names().into_iter().map(str::to_string).collect()
}

/// Picks a domain by its 1-based position in `names`.
pub fn select_domain(names: &[String], choice: usize) -> Result<String, DomainError> {
    if names.is_empty() {
        return Err(DomainError::Empty);
    }

    choice
        .checked_sub(1)
        .and_then(|index| names.get(index))
        .cloned()
        .ok_or(DomainError::OutOfRange {
            choice,
            count: names.len(),
        })
}

/// Outcome of a resolution, with the domain keys that had no effect.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: EffectiveConfig,
    /// Domain keys that do not name any effective field.
    pub ignored_keys: Vec<String>,
}

/// Starts from the global layer: global value, else field default.
fn global_layer(
    global: &GlobalConfig,
) -> (
    BTreeMap<String, String>,
    BTreeMap<String, String>,
    BTreeMap<String, Provenance>,
) {
    let mut values = BTreeMap::new();
    let mut provenance = BTreeMap::new();

    for spec in FIELDS {
        if let Some(value) = global.value(spec) {
            values.insert(spec.name.to_string(), value.to_string());
            provenance.insert(spec.name.to_string(), Provenance::Global);
        } else if let Some(default) = spec.default {
            values.insert(spec.name.to_string(), default.to_string());
            provenance.insert(spec.name.to_string(), Provenance::Default);
        }
    }

    let app_settings = global
        .app_settings()
        .map(|section| section.to_map())
        .unwrap_or_default();

    (values, app_settings, provenance)
}

/// Effective configuration for single-domain mode: the global layer alone.
pub fn resolve_global(global: &GlobalConfig) -> EffectiveConfig {
    let (values, app_settings, provenance) = global_layer(global);
    EffectiveConfig::from_values(values, app_settings, provenance)
}

/// Effective configuration for one registry domain.
///
/// Every non-empty key in the domain's section overrides the global value.
/// An empty domain value is treated as not set and falls back to global.
pub fn resolve(
    global: &GlobalConfig,
    registry: &DomainRegistry,
    name: &str,
) -> Result<Resolution, DeployError> {
    let section = registry
        .section(name)
        .ok_or_else(|| registry.not_found(name))?;
    if section.is_empty() {
        return Err(ConfigError::EmptySection {
            section: name.to_string(),
        }
        .into());
    }

    let (mut values, mut app_settings, mut provenance) = global_layer(global);
    let mut ignored_keys = Vec::new();

    // The section name is the domain unless the section says otherwise.
    values.insert("domain".to_string(), name.to_string());
    provenance.insert("domain".to_string(), Provenance::Domain);

    for (key, value) in section.to_map() {
        if value.is_empty() {
            debug!(domain = name, key = %key, "Empty domain value; using global");
            continue;
        }

        if let Some(app_key) = key.strip_prefix(APP_PREFIX) {
            app_settings.insert(app_key.to_string(), value);
        } else if field_spec(&key).is_some() {
            provenance.insert(key.clone(), Provenance::Domain);
            values.insert(key, value);
        } else {
            warn!(domain = name, key = %key, "Unknown domain key ignored");
            ignored_keys.push(key);
        }
    }

    Ok(Resolution {
        config: EffectiveConfig::from_values(values, app_settings, provenance),
        ignored_keys,
    })
}

/// Checks that every required field has a non-empty value.
pub fn validate(config: &EffectiveConfig, required: &BTreeSet<String>) -> Result<(), ValidationError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|field| config.lookup(field).is_none())
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingFields(missing))
    }
}
