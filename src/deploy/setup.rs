//! First-time setup wizard for the global configuration.

use tracing::info;

use crate::config::model::{is_valid_domain_name, parse_flag, GlobalConfig};
use crate::error::PromptError;
use crate::prompt::Prompter;

/// Attempts allowed for an answer that must pass validation.
const MAX_ATTEMPTS: usize = 3;

/// Free-text questions: section, key, question, fallback default.
const QUESTIONS: &[(&str, &str, &str, &str)] = &[
    ("general", "app_name", "Application name", "meeting_meter"),
    ("general", "web_root", "Web root", "/var/www/html"),
    ("general", "app_dir", "Application directory under the web root", "meeting-meter"),
    ("general", "source_dir", "Source directory with the application files", "."),
    ("general", "web_user", "Web server user", "www-data"),
    ("general", "web_group", "Web server group", "www-data"),
    ("general", "backup_dir", "Backup directory", "/var/backups/meeting-meter"),
    ("security", "log_dir", "Log directory", "/var/log/meeting-meter"),
];

fn current<'g>(global: &'g GlobalConfig, section: &str, key: &str) -> Option<&'g str> {
    global.document().get(section, key).filter(|v| !v.trim().is_empty())
}

fn ask<P: Prompter + ?Sized>(
    prompter: &P,
    global: &GlobalConfig,
    section: &str,
    key: &str,
    question: &str,
    fallback: &str,
) -> Result<String, PromptError> {
    let default = current(global, section, key).unwrap_or(fallback).to_string();
    let answer = prompter.input(question, Some(default.clone()))?;
    let answer = answer.trim();
    Ok(if answer.is_empty() { default } else { answer.to_string() })
}

fn ask_domain<P: Prompter + ?Sized>(prompter: &P, global: &GlobalConfig) -> Result<String, PromptError> {
    let default = current(global, "general", "domain").map(str::to_string);
    for _ in 0..MAX_ATTEMPTS {
        let answer = prompter.input("Primary domain", default.clone())?;
        let answer = answer.trim();
        if is_valid_domain_name(answer) {
            return Ok(answer.to_string());
        }
        println!("  '{}' is not a valid domain name", answer);
    }
    Err(PromptError::NoAnswer("Primary domain".to_string()))
}

fn ask_flag<P: Prompter + ?Sized>(
    prompter: &P,
    global: &GlobalConfig,
    section: &str,
    key: &str,
    question: &str,
) -> Result<bool, PromptError> {
    let default = current(global, section, key).map(parse_flag).unwrap_or(false);
    prompter.confirm(question, default)
}

/// Walks the operator through the core settings and writes the answers into
/// `global`. Returns the `(section.key, value)` pairs that were set.
pub fn run<P: Prompter + ?Sized>(prompter: &P, global: &mut GlobalConfig) -> Result<Vec<(String, String)>, PromptError> {
    let mut answers: Vec<(&str, &str, String)> = Vec::new();

    answers.push(("general", "domain", ask_domain(prompter, global)?));
    for &(section, key, question, fallback) in QUESTIONS {
        let value = ask(prompter, global, section, key, question, fallback)?;
        answers.push((section, key, value));
    }

    let secure = current(global, "security", "secure_config_dir").is_some();
    if prompter.confirm("Store the generated config outside the web root?", secure)? {
        let dir = ask(
            prompter,
            global,
            "security",
            "secure_config_dir",
            "Secure config directory",
            "/etc/meeting-meter",
        )?;
        answers.push(("security", "secure_config_dir", dir));
    } else {
        answers.push(("security", "secure_config_dir", String::new()));
    }

    let ssl = ask_flag(prompter, global, "ssl", "enable_ssl", "Request a TLS certificate?")?;
    answers.push(("ssl", "enable_ssl", ssl.to_string()));
    if ssl {
        let email = ask(prompter, global, "ssl", "ssl_email", "Certificate contact email", "")?;
        answers.push(("ssl", "ssl_email", email));
    }

    let doc = global.document_mut();
    let mut written = Vec::with_capacity(answers.len());
    for (section, key, value) in answers {
        doc.set(section, key, value.clone());
        written.push((format!("{}.{}", section, key), value));
    }

    info!(fields = written.len(), "Setup answers recorded");
    Ok(written)
}
