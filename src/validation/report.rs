//! Validation report formatting.

use std::collections::BTreeMap;

use super::{ValidationIssue, ValidationResult, ValidationSeverity};

/// Scope used for issues that do not belong to a registry domain.
const GLOBAL_SCOPE: &str = "deploy.conf";

/// Splits `[x.com].field` into the domain scope and the field.
fn scope_of(path: &str) -> (&str, &str) {
    path.strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .map(|(domain, field)| (domain, field.trim_start_matches('.')))
        .unwrap_or((GLOBAL_SCOPE, path))
}

/// Formats a result as a report grouped by domain, errors before warnings.
pub fn format_report(result: &ValidationResult) -> String {
    if result.issues().is_empty() {
        return "Configuration is valid.".to_string();
    }

    let mut scopes: BTreeMap<&str, Vec<(&str, &ValidationIssue)>> = BTreeMap::new();
    for issue in result.errors().chain(result.warnings()) {
        let (scope, field) = scope_of(&issue.path);
        scopes.entry(scope).or_default().push((field, issue));
    }

    let mut report = String::new();
    for (scope, issues) in &scopes {
        report.push_str(&format!("{}\n", scope));
        for (field, issue) in issues {
            report.push_str(&format_issue(field, issue));
        }
        report.push('\n');
    }

    let errors = result.error_count();
    let warnings = result.warning_count();
    report.push_str(&format!("{} error(s), {} warning(s)\n", errors, warnings));
    if errors > 0 {
        report.push_str("Nothing was deployed.\n");
    }

    report
}

fn format_issue(field: &str, issue: &ValidationIssue) -> String {
    let marker = match issue.severity {
        ValidationSeverity::Error => "error",
        ValidationSeverity::Warning => "warning",
    };
    let field = if field.is_empty() { "(section)" } else { field };

    let mut line = format!("  {:<7} {}: {}\n", marker, field, issue.message);
    if let Some(suggestion) = &issue.suggestion {
        line.push_str(&format!("          hint: {}\n", suggestion));
    }
    line
}
