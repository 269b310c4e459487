//! Checks across every domain in the registry.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::model::{is_valid_domain_name, DomainRegistry, GlobalConfig};
use crate::deploy::stage::Mode;
use crate::domain::resolve;
use crate::error::{ConfigError, DeployError};

use super::{validate_effective, ValidationIssue, ValidationResult};

/// Resolves every registry domain and validates it for `mode`.
///
/// Duplicate deployment directories are reported as warnings only: two
/// domains may intentionally serve the same checkout.
pub fn validate(global: &GlobalConfig, registry: &DomainRegistry, mode: Mode) -> ValidationResult {
    let mut result = ValidationResult::new();
    let mut app_paths: HashMap<PathBuf, Vec<String>> = HashMap::new();

    let names = registry.names();
    if names.is_empty() {
        result.add(
            ValidationIssue::error("domains", "No domains are configured")
                .with_suggestion("Add one with 'domain add <name>'"),
        );
        return result;
    }

    for name in names {
        let prefix = format!("[{}].", name);

        if !is_valid_domain_name(name) {
            result.add(ValidationIssue::error(
                format!("[{}]", name),
                "Section name is not a valid domain name",
            ));
        }

        let resolution = match resolve(global, registry, name) {
            Ok(resolution) => resolution,
            Err(DeployError::Config(ConfigError::EmptySection { .. })) => {
                result.add(
                    ValidationIssue::error(format!("[{}]", name), "Domain section has no entries")
                        .with_suggestion("Add at least 'domain = <name>' or remove the section"),
                );
                continue;
            }
            Err(e) => {
                result.add(ValidationIssue::error(format!("[{}]", name), e.to_string()));
                continue;
            }
        };

        for key in &resolution.ignored_keys {
            result.add(ValidationIssue::warning(
                format!("{}{}", prefix, key),
                "Unknown key is ignored",
            ));
        }

        let config = &resolution.config;
        result.extend(validate_effective(config, mode, &prefix));

        if !config.app_dir.is_empty() {
            app_paths
                .entry(config.app_path())
                .or_default()
                .push(name.to_string());
        }
    }

    let mut shared: Vec<_> = app_paths.into_iter().filter(|(_, d)| d.len() > 1).collect();
    shared.sort();
    for (path, domains) in shared {
        result.add(
            ValidationIssue::warning(
                format!("[{}].app_dir", domains[0]),
                format!("'{}' is shared by {}", path.display(), domains.join(", ")),
            )
            .with_suggestion("Give each domain its own app_dir unless they intentionally share files"),
        );
    }

    result
}
