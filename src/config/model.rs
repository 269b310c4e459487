//! Typed views over the global config and the domain registry.

use regex::Regex;
use std::sync::OnceLock;

use super::document::{Document, Section};
use crate::error::DomainError;

/// Where an effective field lives in the global config, and its fallback value.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Field name, also the key a domain section uses to override it.
    pub name: &'static str,
    /// Section in the global config.
    pub section: &'static str,
    /// Key inside that section.
    pub key: &'static str,
    /// Value used when neither layer sets the field.
    pub default: Option<&'static str>,
}

const fn field(
    name: &'static str,
    section: &'static str,
    key: &'static str,
    default: Option<&'static str>,
) -> FieldSpec {
    FieldSpec {
        name,
        section,
        key,
        default,
    }
}

/// Every field of the effective configuration.
pub const FIELDS: &[FieldSpec] = &[
    field("domain", "general", "domain", None),
    field("app_name", "general", "app_name", None),
    field("app_dir", "general", "app_dir", None),
    field("source_dir", "general", "source_dir", None),
    field("web_root", "general", "web_root", None),
    field("backup_dir", "general", "backup_dir", None),
    field("web_user", "general", "web_user", Some("www-data")),
    field("web_group", "general", "web_group", Some("www-data")),
    field("use_sudo", "general", "use_sudo", Some("true")),
    field("config_template", "general", "config_template", None),
    field("required_files", "general", "required_files", Some("index.php, api.php, functions.php")),
    field("optional_files", "general", "optional_files", Some("README.md, snippets.php, .htaccess")),
    field("apache_config_file", "apache", "config_file", None),
    field("apache_site_name", "apache", "site_name", None),
    field("apache_security_headers", "apache", "security_headers", Some("true")),
    field("apache_rate_limiting", "apache", "rate_limiting", Some("false")),
    field("apache_rate_limit", "apache", "rate_limit", Some("400")),
    field("apache_global_config", "apache", "global_config", Some("/etc/apache2/conf-available/ssl-stapling.conf")),
    field("nginx_config_file", "nginx", "config_file", None),
    field("nginx_site_name", "nginx", "site_name", None),
    field("nginx_security_headers", "nginx", "security_headers", Some("true")),
    field("nginx_rate_limiting", "nginx", "rate_limiting", Some("false")),
    field("nginx_rate_limit", "nginx", "rate_limit", Some("10r/s")),
    field("secure_config_dir", "security", "secure_config_dir", None),
    field("log_dir", "security", "log_dir", None),
    field("dir_mode", "security", "dir_mode", Some("755")),
    field("file_mode", "security", "file_mode", Some("644")),
    field("secure_file_mode", "security", "secure_file_mode", Some("600")),
    field("php_min_version", "php", "min_version", Some("7.4")),
    field("php_required_extensions", "php", "required_extensions", Some("json, mbstring, session")),
    field("php_memory_limit", "php", "memory_limit", Some("128M")),
    field("php_max_execution_time", "php", "max_execution_time", Some("30")),
    field("php_upload_max_filesize", "php", "upload_max_filesize", Some("2M")),
    field("enable_ssl", "ssl", "enable_ssl", Some("false")),
    field("ssl_email", "ssl", "ssl_email", None),
    field("ssl_alt_domains", "ssl", "ssl_alt_domains", None),
    field("ssl_cert_dir", "ssl", "cert_dir", Some("/etc/letsencrypt/live")),
    field("enable_service", "systemd", "enable_service", Some("false")),
    field("service_file", "systemd", "service_file", None),
    field("env_file", "systemd", "env_file", None),
    field("enable_logrotate", "logrotate", "enable", Some("false")),
    field("logrotate_file", "logrotate", "file", None),
    field("logrotate_retention_days", "logrotate", "retention_days", Some("14")),
    field("enable_backup", "backup", "enable", Some("false")),
    field("backup_retention_days", "backup", "retention_days", Some("30")),
    field("backup_compress", "backup", "compress", Some("false")),
];

/// Section holding runtime settings rendered into the generated app config.
pub const APP_SECTION: &str = "app";

/// Prefix a domain section uses to override an `[app]` setting.
pub const APP_PREFIX: &str = "app.";

/// Looks up a field by name.
pub fn field_spec(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name == name)
}

/// Interprets an on-disk boolean. Only the literal `true` is true.
pub fn parse_flag(value: &str) -> bool {
    value.trim() == "true"
}

/// Returns true if `value` is one of the two literal booleans.
pub fn is_flag_literal(value: &str) -> bool {
    matches!(value.trim(), "true" | "false")
}

/// Splits a comma separated list, trimming entries and dropping empty ones.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The global deployment configuration document.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    doc: Document,
}

impl GlobalConfig {
    /// Wraps a parsed document.
    pub fn new(doc: Document) -> Self {
        Self { doc }
    }

    /// Returns the underlying document.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Returns the document for modification.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Whether deployments select a domain from the registry.
    pub fn multi_domain_enabled(&self) -> bool {
        self.doc
            .get("general", "multi_domain_enabled")
            .is_some_and(parse_flag)
    }

    /// Returns the global value of a field, if set and non-empty.
    pub fn value(&self, spec: &FieldSpec) -> Option<&str> {
        let value = self.doc.get(spec.section, spec.key);

        // `default_domain` is the older spelling of `domain`.
        let value = match (spec.name, value) {
            ("domain", None) | ("domain", Some("")) => self.doc.get("general", "default_domain"),
            _ => value,
        };

        value.filter(|v| !v.is_empty())
    }

    /// Returns the `[app]` section, if present.
    pub fn app_settings(&self) -> Option<&Section> {
        self.doc.section(APP_SECTION)
    }
}

/// One domain's overrides, as entered through `domain add`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainRecord {
    pub domain: String,
    pub app_name: Option<String>,
    pub app_dir: Option<String>,
    pub source_dir: Option<String>,
    pub web_root: Option<String>,
    pub apache_config_file: Option<String>,
    pub apache_site_name: Option<String>,
    pub secure_config_dir: Option<String>,
    pub log_dir: Option<String>,
    pub enable_ssl: Option<bool>,
    pub ssl_email: Option<String>,
    pub ssl_alt_domains: Vec<String>,
    pub backup_dir: Option<String>,
}

impl DomainRecord {
    /// Creates a record with only the domain name set.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Returns the record as registry entries, in registry key order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![("domain", self.domain.clone())];

        let optional = [
            ("app_name", &self.app_name),
            ("app_dir", &self.app_dir),
            ("source_dir", &self.source_dir),
            ("web_root", &self.web_root),
            ("apache_config_file", &self.apache_config_file),
            ("apache_site_name", &self.apache_site_name),
            ("secure_config_dir", &self.secure_config_dir),
            ("log_dir", &self.log_dir),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                entries.push((key, v.clone()));
            }
        }

        if let Some(enabled) = self.enable_ssl {
            entries.push(("enable_ssl", enabled.to_string()));
        }
        if let Some(email) = &self.ssl_email {
            entries.push(("ssl_email", email.clone()));
        }
        if !self.ssl_alt_domains.is_empty() {
            entries.push(("ssl_alt_domains", self.ssl_alt_domains.join(", ")));
        }
        if let Some(dir) = &self.backup_dir {
            entries.push(("backup_dir", dir.clone()));
        }

        entries
    }
}

fn domain_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*$")
            .expect("domain pattern is valid")
    })
}

/// Checks that a name can be used as a registry key and in server names.
pub fn is_valid_domain_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 253 && domain_name_pattern().is_match(name)
}

/// The per-domain registry document.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    doc: Document,
}

impl DomainRegistry {
    /// Wraps a parsed document.
    pub fn new(doc: Document) -> Self {
        Self { doc }
    }

    /// Returns the underlying document.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Domain names in the order their headers appear.
    pub fn names(&self) -> Vec<&str> {
        self.doc.section_names()
    }

    /// Returns the section for a domain.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.doc.section(name)
    }

    /// Appends a new domain section.
    pub fn add(&mut self, record: &DomainRecord) -> Result<(), DomainError> {
        let name = record.domain.trim();
        if !is_valid_domain_name(name) {
            return Err(DomainError::InvalidName {
                name: record.domain.clone(),
            });
        }
        if self.doc.section(name).is_some() {
            return Err(DomainError::Duplicate {
                name: name.to_string(),
            });
        }

        let section = self.doc.section_mut(name);
        for (key, value) in record.entries() {
            section.set(key, value);
        }
        Ok(())
    }

    /// Removes a domain section.
    pub fn remove(&mut self, name: &str) -> Result<(), DomainError> {
        if self.doc.remove_section(name) {
            Ok(())
        } else {
            Err(self.not_found(name))
        }
    }

    /// Sets one key in an existing domain section.
    pub fn set(&mut self, name: &str, key: &str, value: &str) -> Result<(), DomainError> {
        if self.doc.section(name).is_none() {
            return Err(self.not_found(name));
        }
        self.doc.set(name, key, value);
        Ok(())
    }

    /// Builds a not-found error with the closest configured name as a hint.
    pub fn not_found(&self, name: &str) -> DomainError {
        DomainError::NotFound {
            name: name.to_string(),
            suggestion: closest_name(name, &self.names()),
        }
    }
}

/// Finds the most similar domain name using Levenshtein distance.
fn closest_name(input: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (strsim::levenshtein(input, k), *k))
        .filter(|(distance, _)| *distance <= 3)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, k)| k.to_string())
}
