//! The merged configuration a deployment run works from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::config::model::{is_flag_literal, parse_flag, parse_list};

/// Name of the generated runtime config file.
pub const RUNTIME_CONFIG_FILE: &str = "config.php";

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Global,
    Domain,
    Default,
}

/// Settings shared by the two supported web servers.
#[derive(Debug, Clone, Serialize)]
pub struct WebServerSettings {
    /// Virtual host / server block file.
    pub config_file: PathBuf,
    /// Name used to enable the site and to name its logs.
    pub site_name: String,
    pub security_headers: bool,
    pub rate_limiting: bool,
    pub rate_limit: String,
}

/// File locations and permission modes.
#[derive(Debug, Clone, Serialize)]
pub struct SecuritySettings {
    /// Directory outside the web root for the generated config, if used.
    pub secure_config_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub dir_mode: u32,
    pub file_mode: u32,
    pub secure_file_mode: u32,
}

/// PHP requirements and resource limits.
#[derive(Debug, Clone, Serialize)]
pub struct PhpSettings {
    pub min_version: String,
    pub required_extensions: Vec<String>,
    pub memory_limit: String,
    pub max_execution_time: u32,
    pub upload_max_filesize: String,
}

/// Certificate settings.
#[derive(Debug, Clone, Serialize)]
pub struct SslSettings {
    pub enabled: bool,
    pub email: Option<String>,
    pub alt_domains: Vec<String>,
    /// Parent of the per-domain certificate directories.
    pub cert_dir: PathBuf,
}

/// Marker service unit settings.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSettings {
    pub enabled: bool,
    pub service_file: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Log rotation settings.
#[derive(Debug, Clone, Serialize)]
pub struct LogRotateSettings {
    pub enabled: bool,
    pub file: Option<PathBuf>,
    pub retention_days: u32,
}

/// Backup snapshot settings.
#[derive(Debug, Clone, Serialize)]
pub struct BackupSettings {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub retention_days: u32,
    pub compress: bool,
}

/// Immutable per-run configuration: global settings with domain overrides applied.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub domain: String,
    pub app_name: String,
    pub app_dir: String,
    pub source_dir: PathBuf,
    pub web_root: PathBuf,
    pub web_user: String,
    pub web_group: String,
    /// Whether privileged operations are prefixed with `sudo`.
    pub use_sudo: bool,
    pub config_template: Option<PathBuf>,
    pub required_files: Vec<String>,
    pub optional_files: Vec<String>,
    pub apache: WebServerSettings,
    /// File that receives the global OCSP stapling cache directive.
    pub apache_global_config: PathBuf,
    pub nginx: WebServerSettings,
    pub security: SecuritySettings,
    pub php: PhpSettings,
    pub ssl: SslSettings,
    pub service: ServiceSettings,
    pub logrotate: LogRotateSettings,
    pub backup: BackupSettings,
    /// Runtime settings rendered into the application config.
    pub app_settings: BTreeMap<String, String>,
    /// Origin of every resolved field.
    pub provenance: BTreeMap<String, Provenance>,
    #[serde(skip)]
    values: BTreeMap<String, String>,
}

impl EffectiveConfig {
    /// Builds the typed configuration from resolved field values.
    ///
    /// Booleans, lists, modes and numbers are parsed here; nothing past this
    /// point sees the on-disk string forms.
    pub fn from_values(
        values: BTreeMap<String, String>,
        app_settings: BTreeMap<String, String>,
        provenance: BTreeMap<String, Provenance>,
    ) -> Self {
        let text = |name: &str| values.get(name).cloned().unwrap_or_default();
        let opt_path = |name: &str| values.get(name).filter(|v| !v.is_empty()).map(PathBuf::from);
        let flag = |name: &str| {
            let value = values.get(name).map(String::as_str).unwrap_or("false");
            if !is_flag_literal(value) {
                warn!(field = name, value, "Expected 'true' or 'false'; treating as false");
            }
            parse_flag(value)
        };
        let list = |name: &str| values.get(name).map(|v| parse_list(v)).unwrap_or_default();

        let domain = text("domain");
        let app_name = text("app_name");
        let app_dir = text("app_dir");

        let apache_site = values
            .get("apache_site_name")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| domain.clone());
        let nginx_site = values
            .get("nginx_site_name")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| domain.clone());

        let apache = WebServerSettings {
            config_file: opt_path("apache_config_file")
                .unwrap_or_else(|| PathBuf::from(format!("/etc/apache2/sites-available/{}.conf", apache_site))),
            site_name: apache_site,
            security_headers: flag("apache_security_headers"),
            rate_limiting: flag("apache_rate_limiting"),
            rate_limit: text("apache_rate_limit"),
        };
        let nginx = WebServerSettings {
            config_file: opt_path("nginx_config_file")
                .unwrap_or_else(|| PathBuf::from(format!("/etc/nginx/sites-available/{}", nginx_site))),
            site_name: nginx_site,
            security_headers: flag("nginx_security_headers"),
            rate_limiting: flag("nginx_rate_limiting"),
            rate_limit: text("nginx_rate_limit"),
        };

        let security = SecuritySettings {
            secure_config_dir: opt_path("secure_config_dir"),
            log_dir: opt_path("log_dir").unwrap_or_else(|| PathBuf::from(format!("/var/log/{}", app_dir))),
            dir_mode: parse_mode(&values, "dir_mode", 0o755),
            file_mode: parse_mode(&values, "file_mode", 0o644),
            secure_file_mode: parse_mode(&values, "secure_file_mode", 0o600),
        };

        let php = PhpSettings {
            min_version: text("php_min_version"),
            required_extensions: list("php_required_extensions"),
            memory_limit: text("php_memory_limit"),
            max_execution_time: parse_number(&values, "php_max_execution_time", 30),
            upload_max_filesize: text("php_upload_max_filesize"),
        };

        let ssl = SslSettings {
            enabled: flag("enable_ssl"),
            email: values.get("ssl_email").filter(|v| !v.is_empty()).cloned(),
            alt_domains: list("ssl_alt_domains"),
            cert_dir: opt_path("ssl_cert_dir").unwrap_or_else(|| PathBuf::from("/etc/letsencrypt/live")),
        };

        let service = ServiceSettings {
            enabled: flag("enable_service"),
            service_file: opt_path("service_file"),
            env_file: opt_path("env_file"),
        };

        let logrotate = LogRotateSettings {
            enabled: flag("enable_logrotate"),
            file: opt_path("logrotate_file"),
            retention_days: parse_number(&values, "logrotate_retention_days", 14),
        };

        let backup = BackupSettings {
            enabled: flag("enable_backup"),
            dir: opt_path("backup_dir"),
            retention_days: parse_number(&values, "backup_retention_days", 30),
            compress: flag("backup_compress"),
        };

        let source_dir = opt_path("source_dir").unwrap_or_else(|| PathBuf::from("."));
        let web_root = PathBuf::from(text("web_root"));
        let web_user = text("web_user");
        let web_group = text("web_group");
        let use_sudo = flag("use_sudo");
        let config_template = opt_path("config_template");
        let required_files = list("required_files");
        let optional_files = list("optional_files");
        let apache_global_config = PathBuf::from(text("apache_global_config"));

        Self {
            source_dir,
            web_root,
            web_user,
            web_group,
            use_sudo,
            config_template,
            required_files,
            optional_files,
            apache_global_config,
            domain,
            app_name,
            app_dir,
            apache,
            nginx,
            security,
            php,
            ssl,
            service,
            logrotate,
            backup,
            app_settings,
            provenance,
            values,
        }
    }

    /// Returns a resolved field value; empty values count as absent.
    pub fn lookup(&self, field: &str) -> Option<&str> {
        self.values
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Directory the application files are deployed into.
    pub fn app_path(&self) -> PathBuf {
        self.web_root.join(&self.app_dir)
    }

    /// Whether the generated config lives outside the web root.
    pub fn uses_secure_config(&self) -> bool {
        self.security.secure_config_dir.is_some()
    }

    /// Directory the generated config is written to.
    pub fn config_dir(&self) -> PathBuf {
        match &self.security.secure_config_dir {
            Some(dir) => dir.clone(),
            None => self.app_path(),
        }
    }

    /// Full path of the generated config.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir().join(RUNTIME_CONFIG_FILE)
    }

    /// Mode the generated config is written with.
    pub fn config_mode(&self) -> u32 {
        if self.uses_secure_config() {
            self.security.secure_file_mode
        } else {
            self.security.file_mode
        }
    }

    /// Application log file.
    pub fn log_file(&self) -> PathBuf {
        self.security.log_dir.join("app.log")
    }

    /// Certificate directory for the primary domain.
    pub fn certificate_dir(&self) -> PathBuf {
        self.ssl.cert_dir.join(&self.domain)
    }

    /// Returns an `[app]` setting, or `default`.
    pub fn app_setting<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.app_settings
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    }

    /// Service name derived from the unit file name.
    pub fn service_name(&self) -> Option<String> {
        self.service
            .service_file
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    }
}

fn parse_mode(values: &BTreeMap<String, String>, name: &str, default: u32) -> u32 {
    match values.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => u32::from_str_radix(raw, 8).unwrap_or_else(|_| {
            warn!(field = name, value = raw, "Invalid octal mode; using default");
            default
        }),
        None => default,
    }
}

fn parse_number(values: &BTreeMap<String, String>, name: &str, default: u32) -> u32 {
    match values.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(field = name, value = raw, "Invalid number; using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> EffectiveConfig {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EffectiveConfig::from_values(values, BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn test_paths_without_secure_dir() {
        let cfg = config(&[
            ("domain", "a.example.com"),
            ("web_root", "/var/www/html"),
            ("app_dir", "app1"),
        ]);
        assert_eq!(cfg.app_path(), PathBuf::from("/var/www/html/app1"));
        assert_eq!(cfg.config_path(), PathBuf::from("/var/www/html/app1/config.php"));
        assert_eq!(cfg.config_mode(), 0o644);
        assert_eq!(cfg.apache.site_name, "a.example.com");
        assert_eq!(
            cfg.apache.config_file,
            PathBuf::from("/etc/apache2/sites-available/a.example.com.conf")
        );
    }

    #[test]
    fn test_secure_dir_changes_config_location_and_mode() {
        let cfg = config(&[
            ("web_root", "/var/www/html"),
            ("app_dir", "app1"),
            ("secure_config_dir", "/etc/meter"),
            ("secure_file_mode", "640"),
        ]);
        assert_eq!(cfg.config_path(), PathBuf::from("/etc/meter/config.php"));
        assert_eq!(cfg.config_mode(), 0o640);
    }

    #[test]
    fn test_flags_and_lists_are_parsed() {
        let cfg = config(&[
            ("enable_ssl", "true"),
            ("enable_service", "yes"),
            ("ssl_alt_domains", "www.a.com , b.a.com"),
        ]);
        assert!(cfg.ssl.enabled);
        assert!(!cfg.service.enabled);
        assert_eq!(cfg.ssl.alt_domains, vec!["www.a.com", "b.a.com"]);
    }

    #[test]
    fn test_invalid_mode_falls_back() {
        let cfg = config(&[("dir_mode", "rwx")]);
        assert_eq!(cfg.security.dir_mode, 0o755);
    }

    #[test]
    fn test_lookup_treats_blank_as_absent() {
        let cfg = config(&[("ssl_email", "  "), ("domain", "a.com")]);
        assert_eq!(cfg.lookup("ssl_email"), None);
        assert_eq!(cfg.lookup("domain"), Some("a.com"));
        assert_eq!(cfg.lookup("missing"), None);
    }

    #[test]
    fn test_service_name_from_unit_file() {
        let cfg = config(&[("service_file", "/etc/systemd/system/meeting-meter.service")]);
        assert_eq!(cfg.service_name().as_deref(), Some("meeting-meter.service"));
    }
}
