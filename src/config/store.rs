//! Loading and saving configuration documents.

use std::path::Path;

use tracing::{debug, info};

use super::document::Document;
use crate::error::ConfigError;

/// Built-in copy of the global config example, used when no template file is present.
pub const GLOBAL_EXAMPLE: &str = include_str!("../../templates/deploy.conf.example");

/// Built-in copy of the domain registry example.
pub const DOMAINS_EXAMPLE: &str = include_str!("../../templates/domains.conf.example");

/// Loads a document from disk.
pub fn load(path: &Path) -> Result<Document, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    debug!(path = %path.display(), bytes = content.len(), "Loaded config document");
    Document::parse(&content, path)
}

/// Loads a document, creating it from a template when it does not exist yet.
///
/// A freshly created file is never used directly: the caller gets
/// [`ConfigError::Bootstrapped`] so the operator edits it before rerunning.
/// When `template_path` is missing too, `fallback` is written instead.
pub fn load_or_bootstrap(
    path: &Path,
    template_path: &Path,
    fallback: &str,
) -> Result<Document, ConfigError> {
    match load(path) {
        Err(ConfigError::NotFound { .. }) => {}
        other => return other,
    }

    let template = match std::fs::read_to_string(template_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => fallback.to_string(),
        Err(e) => {
            return Err(ConfigError::ReadFailed {
                path: template_path.to_path_buf(),
                source: e,
            })
        }
    };

    write_text(path, &template)?;
    info!(path = %path.display(), template = %template_path.display(), "Bootstrapped config from template");

    Err(ConfigError::Bootstrapped {
        path: path.to_path_buf(),
    })
}

/// Saves a document to disk.
pub fn save(path: &Path, doc: &Document) -> Result<(), ConfigError> {
    write_text(path, &doc.render())?;
    debug!(path = %path.display(), "Saved config document");
    Ok(())
}

fn write_text(path: &Path, text: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("deploy.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_bootstrap_copies_template_and_asks_for_edit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("deploy.conf");
        let template = dir.path().join("deploy.conf.example");
        std::fs::write(&template, "[general]\napp_name = from_template\n").unwrap();

        let err = load_or_bootstrap(&target, &template, GLOBAL_EXAMPLE).unwrap_err();
        assert!(matches!(err, ConfigError::Bootstrapped { .. }));

        let doc = load(&target).unwrap();
        assert_eq!(doc.get("general", "app_name"), Some("from_template"));
    }

    #[test]
    fn test_bootstrap_falls_back_to_builtin_example() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("deploy.conf");

        let err = load_or_bootstrap(&target, &dir.path().join("missing"), GLOBAL_EXAMPLE).unwrap_err();
        assert!(matches!(err, ConfigError::Bootstrapped { .. }));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), GLOBAL_EXAMPLE);
    }

    #[test]
    fn test_existing_file_is_loaded_without_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("deploy.conf");
        std::fs::write(&target, "[general]\napp_dir = app1\n").unwrap();

        let doc = load_or_bootstrap(&target, &dir.path().join("missing"), GLOBAL_EXAMPLE).unwrap();
        assert_eq!(doc.get("general", "app_dir"), Some("app1"));
    }

    #[test]
    fn test_builtin_examples_parse() {
        let origin = Path::new("builtin");
        let global = Document::parse(GLOBAL_EXAMPLE, origin).unwrap();
        assert!(global.section("general").is_some());
        assert!(global.section("backup").is_some());

        let domains = Document::parse(DOMAINS_EXAMPLE, origin).unwrap();
        assert!(!domains.section_names().is_empty());
    }
}
