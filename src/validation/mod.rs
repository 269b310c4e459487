//! Configuration validation: required fields per mode and registry checks.

pub mod registry;
pub mod report;

use std::collections::BTreeSet;

use crate::deploy::stage::{Mode, Stage};
use crate::domain::EffectiveConfig;

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Blocks the run.
    Error,
    Warning,
}

/// One finding about a config field.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    /// Field the finding is about, e.g. `[x.com].ssl_email` for a registry domain.
    pub path: String,
    pub message: String,
    /// How to fix it, when there is an obvious fix.
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    fn new(severity: ValidationSeverity, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationSeverity::Error, path, message)
    }

    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationSeverity::Warning, path, message)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == ValidationSeverity::Error
    }
}

/// Findings collected over one or more configs.
#[derive(Debug, Default)]
pub struct ValidationResult {
    issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, other: ValidationResult) {
        self.issues.extend(other.issues);
    }

    /// All findings in the order they were added.
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// True when nothing blocks the run; warnings are allowed.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(ValidationIssue::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues.len() - self.error_count()
    }
}

/// Fields that must be set for `mode` to run against `config`.
///
/// The base set is always required; the rest follow from which stages the
/// mode runs and which feature flags are on.
pub fn required_fields(mode: Mode, config: &EffectiveConfig) -> BTreeSet<String> {
    let mut fields: BTreeSet<String> = ["domain", "app_name", "app_dir", "web_root"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut require = |name: &str| {
        fields.insert(name.to_string());
    };

    if mode.runs(Stage::FileSync) {
        require("source_dir");
    }

    if mode.runs(Stage::TlsSetup) && config.ssl.enabled {
        require("ssl_email");
    }

    if mode.runs(Stage::ServiceSetup) && config.service.enabled {
        require("service_file");
        require("env_file");
    }

    if mode.runs(Stage::LogRotationSetup) && config.logrotate.enabled {
        require("logrotate_file");
    }

    if mode == Mode::Update && config.backup.enabled {
        require("backup_dir");
    }

    fields
}

/// Validates an effective config for a mode, with `prefix` in issue paths.
pub fn validate_effective(config: &EffectiveConfig, mode: Mode, prefix: &str) -> ValidationResult {
    let mut result = ValidationResult::new();

    for field in required_fields(mode, config) {
        if config.lookup(&field).is_none() {
            result.add(
                ValidationIssue::error(format!("{}{}", prefix, field), "Required field is not set")
                    .with_suggestion(suggestion_for(&field)),
            );
        }
    }

    if let Some(email) = &config.ssl.email {
        if config.ssl.enabled && !email.contains('@') {
            result.add(ValidationIssue::error(
                format!("{}ssl_email", prefix),
                format!("'{}' is not an email address", email),
            ));
        }
    }

    if config.app_dir.contains('/') || config.app_dir == ".." {
        result.add(
            ValidationIssue::error(
                format!("{}app_dir", prefix),
                format!("'{}' must be a single directory name", config.app_dir),
            )
            .with_suggestion("app_dir is joined onto web_root"),
        );
    }

    if config.required_files.is_empty() && mode.runs(Stage::FileSync) {
        result.add(ValidationIssue::warning(
            format!("{}required_files", prefix),
            "No required files listed; file sync cannot detect an incomplete source",
        ));
    }

    if let Some(secure) = &config.security.secure_config_dir {
        if secure.starts_with(&config.web_root) {
            result.add(
                ValidationIssue::warning(
                    format!("{}secure_config_dir", prefix),
                    format!("'{}' is inside the web root", secure.display()),
                )
                .with_suggestion("Choose a directory outside web_root so the config is not served"),
            );
        }
    }

    result
}

fn suggestion_for(field: &str) -> String {
    match field {
        "ssl_email" => "Set [ssl] ssl_email or disable enable_ssl".to_string(),
        "service_file" | "env_file" => format!("Set [systemd] {} or disable enable_service", field),
        "logrotate_file" => "Set [logrotate] file or disable logrotate".to_string(),
        "backup_dir" => "Set [general] backup_dir or disable [backup] enable".to_string(),
        _ => match crate::config::model::field_spec(field) {
            Some(spec) => format!("Set [{}] {}", spec.section, spec.key),
            None => format!("Set {}", field),
        },
    }
}
