//! `{{NAME}}` placeholder substitution and the built-in artifact templates.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Runtime configuration for the PHP application.
pub const RUNTIME_CONFIG: &str = include_str!("../templates/config.template.php");
/// Plain HTTP Apache virtual host.
pub const APACHE_HTTP: &str = include_str!("../templates/apache-http.conf");
/// Apache port 80 redirect plus port 443 TLS virtual host.
pub const APACHE_TLS: &str = include_str!("../templates/apache-tls.conf");
/// Plain HTTP Nginx server block.
pub const NGINX_HTTP: &str = include_str!("../templates/nginx-http.conf");
/// Nginx redirect plus TLS server block.
pub const NGINX_TLS: &str = include_str!("../templates/nginx-tls.conf");
/// logrotate rule.
pub const LOGROTATE: &str = include_str!("../templates/logrotate.conf");
/// systemd marker unit.
pub const SERVICE_UNIT: &str = include_str!("../templates/meeting-meter.service");
/// Environment file referenced by the unit.
pub const SERVICE_ENV: &str = include_str!("../templates/service.env");
/// Throwaway script that checks the generated config loads.
pub const PROBE: &str = include_str!("../templates/probe.php");

/// Named values substituted into a template.
pub type Bindings = HashMap<String, String>;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder pattern is valid"))
}

/// Replaces every bound `{{NAME}}` with its value.
///
/// Unbound placeholders stay in the output untouched. Replacement happens in
/// a single pass, so a value that itself contains `{{X}}` is not expanded.
pub fn render(template: &str, bindings: &Bindings) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &Captures| match bindings.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in placeholder_pattern().captures_iter(template) {
        let name = caps[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Placeholders in `template` that `bindings` does not cover.
pub fn unbound(template: &str, bindings: &Bindings) -> Vec<String> {
    placeholders(template)
        .into_iter()
        .filter(|name| !bindings.contains_key(name))
        .collect()
}

/// Builds bindings from string pairs.
pub fn bindings<K, V, I>(pairs: I) -> Bindings
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Sorted view of bindings, for logging.
pub fn describe(bindings: &Bindings) -> BTreeMap<&str, &str> {
    bindings.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_without_placeholders_is_unchanged() {
        let text = "<?php\n// plain\n$x = ['a' => '{b}'];\n";
        assert_eq!(render(text, &bindings([("X", "1")])), text);
    }

    #[test]
    fn test_unbound_placeholder_is_left_as_is() {
        let out = render("name={{APP_NAME}} key={{API_KEY}}", &bindings([("APP_NAME", "meter")]));
        assert_eq!(out, "name=meter key={{API_KEY}}");
    }

    #[test]
    fn test_repeated_placeholder_renders_identically() {
        let out = render(
            "define('APP_NAME', '{{APP_NAME}}'); // {{APP_NAME}}",
            &bindings([("APP_NAME", "meeting_meter")]),
        );
        assert_eq!(out, "define('APP_NAME', 'meeting_meter'); // meeting_meter");
    }

    #[test]
    fn test_values_are_not_expanded_again() {
        let out = render(
            "{{A}} {{B}}",
            &bindings([("A", "{{B}}"), ("B", "b")]),
        );
        assert_eq!(out, "{{B}} b");
    }

    #[test]
    fn test_placeholders_and_unbound() {
        let text = "{{A}} {{B}} {{A}} {{ NOT }} {{C}}";
        assert_eq!(placeholders(text), vec!["A", "B", "C"]);
        assert_eq!(unbound(text, &bindings([("B", "")])), vec!["A", "C"]);
    }

    #[test]
    fn test_builtin_runtime_template_declares_app_name() {
        assert!(RUNTIME_CONFIG.contains("'APP_NAME'"));
        assert!(placeholders(RUNTIME_CONFIG).len() >= 25);
    }
}
