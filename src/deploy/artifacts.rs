//! Rendering of every generated artifact from the effective config.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::config::model::parse_flag;
use crate::domain::EffectiveConfig;
use crate::error::DeployError;
use crate::system::WebServer;
use crate::template::{self, Bindings};

/// Secret used when the operator leaves the API key blank.
pub const DEMO_API_KEY: &str = "demo";

/// File name looked up in the source directory for a custom runtime template.
pub const SOURCE_TEMPLATE_FILE: &str = "config.template.php";

/// Timestamp format used in generated file headers.
pub fn timestamp(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Where the runtime config template came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Configured(PathBuf),
    SourceDir(PathBuf),
    Builtin,
}

/// Loads the runtime config template: the configured file, then the one in
/// the source directory, then the built-in default.
pub fn runtime_template(config: &EffectiveConfig) -> Result<(String, TemplateSource), DeployError> {
    if let Some(path) = &config.config_template {
        let text = std::fs::read_to_string(path).map_err(|e| DeployError::io(path, e))?;
        return Ok((text, TemplateSource::Configured(path.clone())));
    }

    let candidate = config.source_dir.join(SOURCE_TEMPLATE_FILE);
    if candidate.is_file() {
        let text = std::fs::read_to_string(&candidate).map_err(|e| DeployError::io(&candidate, e))?;
        return Ok((text, TemplateSource::SourceDir(candidate)));
    }

    Ok((template::RUNTIME_CONFIG.to_string(), TemplateSource::Builtin))
}

/// Escapes a value for a single-quoted PHP string.
fn php_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn php_bool(name: &str, value: &str) -> String {
    if !crate::config::model::is_flag_literal(value) {
        warn!(setting = name, value, "Expected 'true' or 'false'; rendering false");
    }
    parse_flag(value).to_string()
}

fn php_number(name: &str, value: &str, default: u64) -> String {
    match value.trim().parse::<u64>() {
        Ok(n) => n.to_string(),
        Err(_) => {
            warn!(setting = name, value, default, "Expected a number; rendering default");
            default.to_string()
        }
    }
}

/// Bindings for the runtime config template.
pub fn runtime_bindings(config: &EffectiveConfig, api_key: &str, host: &str, now: &DateTime<Local>) -> Bindings {
    let s = |key: &str, default: &str| php_string(config.app_setting(key, default));
    let b = |key: &str, default: &str| php_bool(key, config.app_setting(key, default));
    let n = |key: &str, default: u64| match config.app_settings.get(key).filter(|v| !v.trim().is_empty()) {
        Some(value) => php_number(key, value, default),
        None => default.to_string(),
    };

    let api_key = if api_key.trim().is_empty() { DEMO_API_KEY } else { api_key.trim() };
    let log_file = config.log_file().display().to_string();

    let bindings = template::bindings([
        ("API_KEY", php_string(api_key)),
        ("APP_NAME", php_string(&config.app_name)),
        ("APP_VERSION", s("version", "1.0.0")),
        ("APP_DOMAIN", php_string(&config.domain)),
        ("DEBUG_MODE", b("debug", "false")),
        ("TIMEZONE", s("timezone", "UTC")),
        ("LOG_ENABLED", b("log_enabled", "true")),
        ("LOG_LEVEL", s("log_level", "INFO")),
        ("LOG_FILE", php_string(&log_file)),
        ("SESSION_LIFETIME", n("session_lifetime", 3600)),
        ("SESSION_SECURE", config.ssl.enabled.to_string()),
        ("SESSION_HTTPONLY", b("session_httponly", "true")),
        ("CURRENCY_SYMBOL", s("currency_symbol", "$")),
        ("CURRENCY_CODE", s("currency_code", "USD")),
        ("DATE_FORMAT", s("date_format", "Y-m-d")),
        ("TIME_FORMAT", s("time_format", "H:i")),
        ("ENABLE_EXPORT", b("enable_export", "true")),
        ("ENABLE_STATS", b("enable_stats", "true")),
        ("CACHE_ENABLED", b("cache_enabled", "false")),
        ("CACHE_TTL", n("cache_ttl", 300)),
        ("MAX_PARTICIPANTS", n("max_participants", 50)),
        ("MAX_MEETING_DURATION", n("max_meeting_duration", 480)),
        ("MEMORY_LIMIT", php_string(&config.php.memory_limit)),
        ("MAX_EXECUTION_TIME", config.php.max_execution_time.to_string()),
        ("ADMIN_EMAIL", s("admin_email", "")),
        ("MAIL_FROM", s("mail_from", "")),
        ("DEPLOYED_AT", timestamp(now)),
        ("DEPLOYED_HOST", php_string(host)),
    ]);

    debug!(bindings = ?template::describe(&bindings).keys().collect::<Vec<_>>(), "Runtime config bindings");
    bindings
}

fn apache_security_headers() -> String {
    [
        "    Header always set X-Content-Type-Options \"nosniff\"",
        "    Header always set X-Frame-Options \"SAMEORIGIN\"",
        "    Header always set X-XSS-Protection \"1; mode=block\"",
        "    Header always set Referrer-Policy \"strict-origin-when-cross-origin\"",
    ]
    .join("\n")
}

fn nginx_security_headers() -> String {
    [
        "    add_header X-Content-Type-Options \"nosniff\" always;",
        "    add_header X-Frame-Options \"SAMEORIGIN\" always;",
        "    add_header X-XSS-Protection \"1; mode=block\" always;",
        "    add_header Referrer-Policy \"strict-origin-when-cross-origin\" always;",
    ]
    .join("\n")
}

/// Renders the virtual host or server block for `server`.
///
/// `tls` selects the HTTPS variant that expects the certificate pair under
/// the domain's certificate directory.
pub fn vhost(config: &EffectiveConfig, server: WebServer, tls: bool, now: &DateTime<Local>) -> String {
    let settings = server.settings(config);
    let mut bindings = template::bindings([
        ("APP_NAME", config.app_name.clone()),
        ("DOMAIN", config.domain.clone()),
        ("SITE_NAME", settings.site_name.clone()),
        ("DOCUMENT_ROOT", config.app_path().display().to_string()),
        ("CERT_DIR", config.certificate_dir().display().to_string()),
        ("GENERATED_AT", timestamp(now)),
    ]);

    let text = match server {
        WebServer::Apache => {
            let aliases = config
                .ssl
                .alt_domains
                .iter()
                .map(|alias| format!("    ServerAlias {}", alias))
                .collect::<Vec<_>>()
                .join("\n");
            bindings.insert("SERVER_ALIASES".into(), aliases);
            bindings.insert(
                "SECURITY_HEADERS".into(),
                if settings.security_headers { apache_security_headers() } else { String::new() },
            );
            bindings.insert(
                "RATE_LIMIT".into(),
                if settings.rate_limiting {
                    format!(
                        "    <Location />\n        SetOutputFilter RATE_LIMIT\n        SetEnv rate-limit {}\n    </Location>",
                        settings.rate_limit
                    )
                } else {
                    String::new()
                },
            );
            if tls { template::APACHE_TLS } else { template::APACHE_HTTP }
        }
        WebServer::Nginx => {
            let names = std::iter::once(config.domain.as_str())
                .chain(config.ssl.alt_domains.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            bindings.insert("SERVER_NAMES".into(), names);
            bindings.insert(
                "SECURITY_HEADERS".into(),
                if settings.security_headers { nginx_security_headers() } else { String::new() },
            );
            let zone = settings.site_name.replace(['.', '-'], "_");
            if settings.rate_limiting {
                bindings.insert(
                    "RATE_LIMIT_ZONE".into(),
                    format!(
                        "limit_req_zone $binary_remote_addr zone={}:10m rate={};\n",
                        zone, settings.rate_limit
                    ),
                );
                bindings.insert("RATE_LIMIT".into(), format!("        limit_req zone={} burst=20 nodelay;", zone));
            } else {
                bindings.insert("RATE_LIMIT_ZONE".into(), String::new());
                bindings.insert("RATE_LIMIT".into(), String::new());
            }
            if tls { template::NGINX_TLS } else { template::NGINX_HTTP }
        }
    };

    template::render(text, &bindings)
}

/// Renders the logrotate rule; `reload` is run after rotation.
pub fn logrotate(config: &EffectiveConfig, reload: &str, now: &DateTime<Local>) -> String {
    let bindings = template::bindings([
        ("APP_NAME", config.app_name.clone()),
        ("LOG_DIR", config.security.log_dir.display().to_string()),
        ("RETENTION_DAYS", config.logrotate.retention_days.to_string()),
        ("WEB_USER", config.web_user.clone()),
        ("WEB_GROUP", config.web_group.clone()),
        ("RELOAD_COMMAND", reload.to_string()),
        ("GENERATED_AT", timestamp(now)),
    ]);
    template::render(template::LOGROTATE, &bindings)
}

/// Renders the marker unit that points at `env_file`.
pub fn service_unit(config: &EffectiveConfig, web_service: &str, env_file: &Path, now: &DateTime<Local>) -> String {
    let bindings = template::bindings([
        ("APP_NAME", config.app_name.clone()),
        ("DOMAIN", config.domain.clone()),
        ("WEB_SERVICE", web_service.to_string()),
        ("ENV_FILE", env_file.display().to_string()),
        ("GENERATED_AT", timestamp(now)),
    ]);
    template::render(template::SERVICE_UNIT, &bindings)
}

/// Renders the environment file read by the marker unit.
pub fn service_env(config: &EffectiveConfig, now: &DateTime<Local>) -> String {
    let bindings = template::bindings([
        ("APP_NAME", config.app_name.clone()),
        ("DOMAIN", config.domain.clone()),
        ("CONFIG_PATH", config.config_path().display().to_string()),
        ("LOG_DIR", config.security.log_dir.display().to_string()),
        ("WEB_ROOT", config.app_path().display().to_string()),
        ("GENERATED_AT", timestamp(now)),
    ]);
    template::render(template::SERVICE_ENV, &bindings)
}

/// Renders the verification probe for the generated config.
pub fn probe(config: &EffectiveConfig) -> String {
    let bindings = template::bindings([("CONFIG_PATH", php_string(&config.config_path().display().to_string()))]);
    template::render(template::PROBE, &bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(extra: &[(&str, &str)]) -> EffectiveConfig {
        let mut values: BTreeMap<String, String> = [
            ("domain", "a.example.com"),
            ("app_name", "meeting_meter"),
            ("app_dir", "app1"),
            ("web_root", "/var/www/html"),
            ("apache_security_headers", "true"),
            ("php_memory_limit", "128M"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in extra {
            values.insert(k.to_string(), v.to_string());
        }
        EffectiveConfig::from_values(values, BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn test_http_vhost_for_apache() {
        let text = vhost(&config(&[]), WebServer::Apache, false, &Local::now());
        assert!(text.contains("ServerName a.example.com"));
        assert!(text.contains("DocumentRoot /var/www/html/app1"));
        assert!(text.contains("X-Content-Type-Options"));
        assert!(!text.contains("SSLEngine"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_tls_vhost_lists_aliases_and_cert_dir() {
        let cfg = config(&[("ssl_alt_domains", "www.a.example.com")]);
        let text = vhost(&cfg, WebServer::Apache, true, &Local::now());
        assert!(text.contains("SSLEngine on"));
        assert!(text.contains("ServerAlias www.a.example.com"));
        assert!(text.contains("/etc/letsencrypt/live/a.example.com/fullchain.pem"));
    }

    #[test]
    fn test_tls_redirect_block_serves_challenges_from_webroot() {
        let text = vhost(&config(&[]), WebServer::Apache, true, &Local::now());
        let redirect = &text[..text.find("<VirtualHost *:443>").unwrap()];
        assert!(redirect.contains("<VirtualHost *:80>"));
        assert!(redirect.contains("DocumentRoot /var/www/html/app1"));
        assert!(redirect.contains("acme-challenge"));
    }

    #[test]
    fn test_nginx_rate_limit_zone() {
        let cfg = config(&[("nginx_rate_limiting", "true"), ("nginx_rate_limit", "5r/s")]);
        let text = vhost(&cfg, WebServer::Nginx, false, &Local::now());
        assert!(text.contains("limit_req_zone $binary_remote_addr zone=a_example_com:10m rate=5r/s;"));
        assert!(text.contains("limit_req zone=a_example_com burst=20 nodelay;"));
        assert!(text.contains("server_name a.example.com;"));
    }

    #[test]
    fn test_runtime_bindings_cover_builtin_template() {
        let cfg = config(&[]);
        let bindings = runtime_bindings(&cfg, "", "web01", &Local::now());
        assert!(template::unbound(template::RUNTIME_CONFIG, &bindings).is_empty());
        assert_eq!(bindings["API_KEY"], DEMO_API_KEY);
        assert_eq!(bindings["SESSION_SECURE"], "false");
        assert_eq!(bindings["DEPLOYED_HOST"], "web01");
    }

    #[test]
    fn test_php_values_are_escaped_and_typed() {
        let mut app = BTreeMap::new();
        app.insert("currency_symbol".to_string(), "it's".to_string());
        app.insert("cache_ttl".to_string(), "soon".to_string());
        app.insert("debug".to_string(), "true".to_string());
        let cfg = EffectiveConfig::from_values(BTreeMap::new(), app, BTreeMap::new());
        let bindings = runtime_bindings(&cfg, "k", "h", &Local::now());
        assert_eq!(bindings["CURRENCY_SYMBOL"], "it\\'s");
        assert_eq!(bindings["CACHE_TTL"], "300");
        assert_eq!(bindings["DEBUG_MODE"], "true");
    }

    #[test]
    fn test_probe_points_at_config() {
        let text = probe(&config(&[]));
        assert!(text.contains("require '/var/www/html/app1/config.php';"));
    }
}
