#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::TempDir;

use meter_deploy::config::{Document, GlobalConfig};
use meter_deploy::domain::{resolve_global, EffectiveConfig};
use meter_deploy::error::{CommandError, PromptError};
use meter_deploy::prompt::Prompter;
use meter_deploy::system::{CommandOutput, CommandRunner, SystemCommand};

/// Text that makes the fake `php -l` report a parse error.
pub const BROKEN_MARKER: &str = "SYNTAX_ERROR_HERE";

/// Answers external commands the way a healthy Debian host would, and
/// records every command it was asked to run.
#[derive(Debug)]
pub struct FakeRunner {
    pub commands: Mutex<Vec<SystemCommand>>,
    pub root: bool,
    pub apache_active: bool,
    pub nginx_active: bool,
    pub certificate_present: bool,
    pub probe_fails: bool,
    pub configtest_fails: bool,
    pub certbot_fails: bool,
    /// Whether units other than the web servers report enabled and active.
    pub unit_running: bool,
    pub loaded_modules: String,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            root: false,
            apache_active: true,
            nginx_active: false,
            certificate_present: false,
            probe_fails: false,
            configtest_fails: false,
            certbot_fails: false,
            unit_running: false,
            loaded_modules: "[PHP Modules]\nCore\njson\nmbstring\nsession\n\n[Zend Modules]\n".to_string(),
        }
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command run so far, in order.
    pub fn recorded(&self) -> Vec<SystemCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Commands whose program and leading arguments match.
    pub fn matching(&self, program: &str, args: &[&str]) -> Vec<SystemCommand> {
        self.recorded().into_iter().filter(|c| c.is(program, args)).collect()
    }

    fn respond(&self, command: &SystemCommand) -> CommandOutput {
        let flag = |on: bool| if on { CommandOutput::ok("") } else { CommandOutput::failed(1, "") };

        if command.is("id", &["-u"]) {
            return CommandOutput::ok(if self.root { "0\n" } else { "1000\n" });
        }
        if command.is("hostname", &[]) {
            return CommandOutput::ok("web01\n");
        }
        if command.is("systemctl", &["is-active", "--quiet", "apache2"]) {
            return flag(self.apache_active);
        }
        if command.is("systemctl", &["is-active", "--quiet", "nginx"]) {
            return flag(self.nginx_active);
        }
        if command.is("systemctl", &["is-active"]) || command.is("systemctl", &["is-enabled"]) {
            return flag(self.unit_running);
        }
        if command.is("apache2ctl", &["configtest"]) && self.configtest_fails {
            return CommandOutput::failed(1, "AH00526: Syntax error on line 15: Invalid command 'Header'");
        }
        if command.is("certbot", &["certonly"]) && self.certbot_fails {
            return CommandOutput::failed(1, "Challenge failed for domain a.example.com");
        }
        if command.is("test", &["-f"]) {
            return flag(self.certificate_present);
        }
        if command.is("test", &["-e"]) {
            return flag(command.args.last().map(|p| Path::new(p).exists()).unwrap_or(false));
        }
        if command.is("php", &["-r"]) {
            return CommandOutput::ok("8.1.2");
        }
        if command.is("php", &["-m"]) {
            return CommandOutput::ok(self.loaded_modules.clone());
        }
        if command.is("php", &["-l"]) {
            let path = command.args.get(1).cloned().unwrap_or_default();
            let text = fs::read_to_string(&path).unwrap_or_default();
            if text.contains(BROKEN_MARKER) {
                return CommandOutput {
                    code: 255,
                    stdout: format!("PHP Parse error: syntax error in {} on line 2", path),
                    stderr: String::new(),
                };
            }
            return CommandOutput::ok(format!("No syntax errors detected in {}", path));
        }
        if command.program == "php" && command.run_as.is_some() {
            if self.probe_fails {
                return CommandOutput::failed(255, "PHP Fatal error: Uncaught Error: config.php not readable");
            }
            return CommandOutput::ok("Configuration OK");
        }
        CommandOutput::ok("")
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError> {
        self.commands.lock().unwrap().push(command.clone());
        Ok(self.respond(command))
    }
}

/// Replays queued answers; falls back to each question's default.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    confirms: Mutex<VecDeque<bool>>,
    inputs: Mutex<VecDeque<String>>,
    pub asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirming(self, answers: &[bool]) -> Self {
        self.confirms.lock().unwrap().extend(answers.iter().copied());
        self
    }

    pub fn answering(self, answers: &[&str]) -> Self {
        self.inputs
            .lock()
            .unwrap()
            .extend(answers.iter().map(|a| a.to_string()));
        self
    }

    pub fn questions(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, question: &str, default: bool) -> Result<bool, PromptError> {
        self.asked.lock().unwrap().push(question.to_string());
        Ok(self.confirms.lock().unwrap().pop_front().unwrap_or(default))
    }

    fn input(&self, question: &str, default: Option<String>) -> Result<String, PromptError> {
        self.asked.lock().unwrap().push(question.to_string());
        match self.inputs.lock().unwrap().pop_front() {
            Some(answer) => Ok(answer),
            None => default.ok_or_else(|| PromptError::NoAnswer(question.to_string())),
        }
    }

    fn secret(&self, question: &str) -> Result<String, PromptError> {
        self.asked.lock().unwrap().push(question.to_string());
        Ok(String::new())
    }

    fn select(&self, question: &str, _items: &[String]) -> Result<usize, PromptError> {
        self.asked.lock().unwrap().push(question.to_string());
        Ok(0)
    }
}

/// A throwaway host layout: source tree, web root, backups and system
/// config locations all under one temporary directory.
pub struct Host {
    pub dir: TempDir,
}

impl Host {
    pub fn new() -> Self {
        let host = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(host.source()).unwrap();
        fs::create_dir_all(host.web_root()).unwrap();
        host
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn source(&self) -> PathBuf {
        self.root().join("src")
    }

    pub fn web_root(&self) -> PathBuf {
        self.root().join("www")
    }

    pub fn app_path(&self) -> PathBuf {
        self.web_root().join("meter")
    }

    pub fn backups(&self) -> PathBuf {
        self.root().join("backups")
    }

    pub fn apache_vhost(&self) -> PathBuf {
        self.root().join("apache/sites-available/meter.conf")
    }

    pub fn stapling_conf(&self) -> PathBuf {
        self.root().join("apache/conf-available/ssl-stapling.conf")
    }

    /// Writes the three required application files into the source tree.
    pub fn with_sources(self) -> Self {
        self.write_source("index.php", "<?php\nrequire 'functions.php';\n");
        self.write_source("api.php", "<?php\necho json_encode(['ok' => true]);\n");
        self.write_source("functions.php", "<?php\nfunction meter() { return 1; }\n");
        self
    }

    pub fn write_source(&self, name: &str, content: &str) {
        fs::write(self.source().join(name), content).unwrap();
    }

    /// Global config text for this host, with escalation off.
    pub fn global_text(&self) -> String {
        let root = self.root().display();
        format!(
            "[general]
app_name = meeting_meter
domain = a.example.com
web_root = {root}/www
app_dir = meter
source_dir = {root}/src
backup_dir = {root}/backups
web_user = www-data
web_group = www-data
use_sudo = false
required_files = index.php, api.php, functions.php
optional_files = README.md, .htaccess

[apache]
config_file = {root}/apache/sites-available/meter.conf
site_name = meter
global_config = {root}/apache/conf-available/ssl-stapling.conf

[nginx]
config_file = {root}/nginx/sites-available/meter
site_name = meter

[security]
log_dir = {root}/log

[ssl]
enable_ssl = false
ssl_email = ops@example.com
cert_dir = {root}/certs

[logrotate]
enable = false

[backup]
enable = true
retention_days = 30

[app]
timezone = Europe/Berlin
"
        )
    }

    pub fn global(&self, overrides: &[(&str, &str, &str)]) -> GlobalConfig {
        let mut doc = Document::parse(&self.global_text(), Path::new("deploy.conf")).unwrap();
        for (section, key, value) in overrides {
            doc.set(section, key, *value);
        }
        GlobalConfig::new(doc)
    }

    /// Effective single-domain config, with `(section, key, value)` overrides.
    pub fn config(&self, overrides: &[(&str, &str, &str)]) -> EffectiveConfig {
        resolve_global(&self.global(overrides))
    }
}

/// Relative paths and contents of every file under `root`, sorted.
pub fn tree(root: &Path) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().display().to_string();
            (rel, fs::read_to_string(e.path()).unwrap_or_default())
        })
        .collect();
    files.sort();
    files
}
