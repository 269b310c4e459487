//! Meter Deploy - deployment and provisioning for the Meeting Meter PHP application.
//!
//! This library resolves per-domain deployment settings, renders the
//! application and web server configuration, and drives the provisioning
//! stages and code-only updates against a host.

pub mod cli;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod error;
pub mod prompt;
pub mod status;
pub mod system;
pub mod template;
pub mod validation;

use std::path::Path;

use anyhow::{bail, Context as _, Result};
use tracing::{info, warn};

use crate::cli::{AddDomainArgs, Cli, Commands, DomainCommand};
use crate::config::model::{field_spec, APP_PREFIX, FIELDS};
use crate::config::{ConfigPaths, DomainRecord, DomainRegistry, GlobalConfig};
use crate::deploy::{CodeOnlyUpdater, Context, Mode, Pipeline, PipelineOptions, StageOutcome, UpdateOptions};
use crate::domain::{list_domains, resolve, resolve_global, EffectiveConfig};
use crate::error::ConfigError;
use crate::prompt::{choose_domain, Prompter, TerminalPrompter};
use crate::system::ProcessRunner;
use crate::validation::report::format_report;

/// Runs the command selected on the command line.
pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.log_level(), cli.log_json)?;

    let paths = cli.config_paths();
    let prompter = TerminalPrompter::new();

    match &cli.command {
        Commands::Deploy(args) => {
            if args.interactive {
                interactive_setup(&paths, &prompter)?;
            }
            run_pipeline(&cli, &paths, &prompter, Mode::Deploy, PipelineOptions::default()).await
        }
        Commands::Provision(args) => {
            let options = PipelineOptions {
                rollback_on_failure: args.rollback_on_failure,
            };
            run_pipeline(&cli, &paths, &prompter, Mode::Provision, options).await
        }
        Commands::Update(args) => {
            let options = UpdateOptions {
                no_backup: args.no_backup,
            };
            run_update(&cli, &paths, &prompter, options).await
        }
        Commands::Domain { action } => domain_command(&paths, &prompter, action).await,
        Commands::ConfigShow => show_config(&cli, &paths, &prompter),
        Commands::ConfigValidate(args) => validate_config(&paths, cli.domain.as_deref(), args.mode.into()),
    }
}

/// Initializes the tracing subscriber for structured logging on stderr.
fn setup_logging(level: &str, json: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    if json {
        builder
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        builder.with_target(false).init();
    }

    Ok(())
}

/// Formats an error chain as one line, skipping causes whose text is
/// already part of the message before them.
pub fn error_line(err: &anyhow::Error) -> String {
    let mut line = String::new();
    for cause in err.chain() {
        let text = cause.to_string();
        if line.contains(&text) {
            continue;
        }
        if !line.is_empty() {
            line.push_str(": ");
        }
        line.push_str(&text);
    }
    line
}

/// Builds the effective config for this run, selecting a domain when the
/// registry is in use.
pub fn effective_config<P: Prompter>(
    paths: &ConfigPaths,
    global: &GlobalConfig,
    requested: Option<&str>,
    prompter: &P,
) -> Result<EffectiveConfig> {
    if !global.multi_domain_enabled() && requested.is_none() {
        return Ok(resolve_global(global));
    }

    let registry = paths.load_registry()?;
    let names = list_domains(&registry);
    let name = match requested {
        Some(name) => name.to_string(),
        None => choose_domain(prompter, &names)?,
    };

    let resolution = resolve(global, &registry, &name)?;
    for key in &resolution.ignored_keys {
        warn!(domain = %name, key = %key, "Unknown key in domain section ignored");
    }
    info!(domain = %name, "Domain resolved");
    Ok(resolution.config)
}

fn interactive_setup<P: Prompter>(paths: &ConfigPaths, prompter: &P) -> Result<()> {
    let mut global = match paths.load_global() {
        Ok(global) => global,
        // The template was just copied into place; the wizard edits it.
        Err(ConfigError::Bootstrapped { .. }) => paths.load_global()?,
        Err(e) => return Err(e.into()),
    };

    status::line("Setup");
    let written = deploy::setup::run(prompter, &mut global)?;
    paths.save_global(&global)?;
    status::ok(format!("Saved {} setting(s) to {}", written.len(), paths.global.display()));
    Ok(())
}

fn summarize(outcomes: &[(deploy::Stage, StageOutcome)]) {
    for (stage, outcome) in outcomes {
        match outcome {
            StageOutcome::Completed => {}
            StageOutcome::Kept => status::line(format!("  {}: existing files kept", stage)),
            StageOutcome::Skipped(reason) => status::line(format!("  {}: skipped ({})", stage, reason)),
        }
    }
}

async fn run_pipeline<P: Prompter>(
    cli: &Cli,
    paths: &ConfigPaths,
    prompter: &P,
    mode: Mode,
    options: PipelineOptions,
) -> Result<()> {
    let global = paths.load_global()?;
    let config = effective_config(paths, &global, cli.domain.as_deref(), prompter)?;

    let runner = ProcessRunner::new(config.use_sudo);
    let ctx = Context::new(&config, &runner, prompter, cli.conflict_policy());
    let report = Pipeline::new(ctx, mode, options).run().await?;

    summarize(&report.outcomes);
    info!(domain = %report.domain, mode = %report.mode, writes = report.journal.tokens().len(), "Pipeline finished");
    Ok(())
}

async fn run_update<P: Prompter>(cli: &Cli, paths: &ConfigPaths, prompter: &P, options: UpdateOptions) -> Result<()> {
    let global = paths.load_global()?;
    let config = effective_config(paths, &global, cli.domain.as_deref(), prompter)?;

    let runner = ProcessRunner::new(config.use_sudo);
    let ctx = Context::new(&config, &runner, prompter, cli.conflict_policy());
    let report = CodeOnlyUpdater::new(ctx, options).run().await?;

    info!(domain = %report.domain, files = report.synced.len(), pruned = report.pruned.len(), "Update finished");
    Ok(())
}

fn record_from_args(args: &AddDomainArgs) -> DomainRecord {
    DomainRecord {
        app_name: args.app_name.clone(),
        app_dir: args.app_dir.clone(),
        source_dir: args.source_dir.clone(),
        web_root: args.web_root.clone(),
        ssl_email: args.ssl_email.clone(),
        ssl_alt_domains: args
            .alt_domains
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect(),
        enable_ssl: args.enable_ssl.then_some(true),
        ..DomainRecord::new(args.name.trim())
    }
}

/// Other domains whose section sets the same `app_dir`.
fn shared_app_dir(registry: &DomainRegistry, name: &str, app_dir: &str) -> Vec<String> {
    registry
        .names()
        .into_iter()
        .filter(|other| *other != name)
        .filter(|other| {
            registry
                .section(other)
                .and_then(|s| s.get("app_dir"))
                .map(|dir| dir.trim() == app_dir)
                .unwrap_or(false)
        })
        .map(str::to_string)
        .collect()
}

/// Checks that `key` names an overridable field.
fn check_domain_key(key: &str) -> Result<()> {
    if key.starts_with(APP_PREFIX) || field_spec(key).is_some() {
        return Ok(());
    }
    let suggestion = FIELDS
        .iter()
        .map(|f| (strsim::levenshtein(key, f.name), f.name))
        .filter(|(distance, _)| *distance <= 3)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, name)| format!(" (did you mean '{}'?)", name))
        .unwrap_or_default();
    bail!("Unknown key '{}'{}", key, suggestion)
}

async fn domain_command<P: Prompter>(paths: &ConfigPaths, prompter: &P, action: &DomainCommand) -> Result<()> {
    match action {
        DomainCommand::List => {
            let registry = paths.load_registry_for_edit()?;
            let names = list_domains(&registry);
            if names.is_empty() {
                println!("No domains configured. Add one with 'domain add <name>'.");
                return Ok(());
            }
            for (i, name) in names.iter().enumerate() {
                let section = registry.section(name);
                let app_dir = section.and_then(|s| s.get("app_dir")).unwrap_or("-");
                let ssl = section.and_then(|s| s.get("enable_ssl")).unwrap_or("-");
                println!("{:>3}) {:<40} app_dir={:<20} ssl={}", i + 1, name, app_dir, ssl);
            }
        }
        DomainCommand::Add(args) => {
            let mut registry = paths.load_registry_for_edit()?;
            let record = record_from_args(args);
            registry.add(&record)?;
            if let Some(app_dir) = &record.app_dir {
                for other in shared_app_dir(&registry, &record.domain, app_dir) {
                    status::warn(format!("{} already deploys into app_dir '{}'", other, app_dir));
                }
            }
            paths.save_registry(&registry)?;
            status::ok(format!("Added {} to {}", record.domain, paths.domains.display()));
        }
        DomainCommand::Remove { name, yes } => {
            let mut registry = paths.load_registry_for_edit()?;
            if registry.section(name).is_none() {
                return Err(registry.not_found(name).into());
            }
            if !*yes && !prompter.confirm(&format!("Remove {} from the registry?", name), false)? {
                status::skip("Nothing removed");
                return Ok(());
            }
            registry.remove(name)?;
            paths.save_registry(&registry)?;
            status::ok(format!("Removed {}", name));
        }
        DomainCommand::Edit { name, set } => {
            let mut registry = paths.load_registry_for_edit()?;
            if registry.section(name).is_none() {
                return Err(registry.not_found(name).into());
            }

            if set.is_empty() {
                open_editor(&paths.domains).await?;
            } else {
                for assignment in set {
                    let Some((key, value)) = assignment.split_once('=') else {
                        bail!("Expected KEY=VALUE, got '{}'", assignment);
                    };
                    let key = key.trim();
                    check_domain_key(key)?;
                    registry.set(name, key, value.trim())?;
                }
                paths.save_registry(&registry)?;
                status::ok(format!("Updated {}", name));
            }

            let global = paths.load_global()?;
            let registry = paths.load_registry()?;
            let result = validation::registry::validate(&global, &registry, Mode::Provision);
            println!("{}", format_report(&result));
            if !result.is_valid() {
                bail!("Registry has {} error(s) after editing", result.error_count());
            }
        }
        DomainCommand::Validate { mode } => validate_registry(paths, (*mode).into())?,
    }
    Ok(())
}

async fn open_editor(path: &Path) -> Result<()> {
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "nano".to_string());
    info!(editor = %editor, path = %path.display(), "Opening editor");
    let status = tokio::process::Command::new(&editor)
        .arg(path)
        .status()
        .await
        .with_context(|| format!("Failed to start editor '{}'", editor))?;
    if !status.success() {
        bail!("Editor '{}' exited with {}", editor, status);
    }
    Ok(())
}

fn validate_registry(paths: &ConfigPaths, mode: Mode) -> Result<()> {
    let global = paths.load_global()?;
    let registry = paths.load_registry()?;
    let result = validation::registry::validate(&global, &registry, mode);
    println!("{}", format_report(&result));
    if !result.is_valid() {
        bail!("Configuration has {} error(s)", result.error_count());
    }
    Ok(())
}

/// Validates one domain when `--domain` is given, otherwise the registry
/// when it is in use, otherwise the global config.
fn validate_config(paths: &ConfigPaths, domain: Option<&str>, mode: Mode) -> Result<()> {
    let global = paths.load_global()?;
    let result = match domain {
        Some(name) => {
            let registry = paths.load_registry()?;
            let resolution = resolve(&global, &registry, name)?;
            validation::validate_effective(&resolution.config, mode, &format!("[{}].", name))
        }
        None if global.multi_domain_enabled() => return validate_registry(paths, mode),
        None => validation::validate_effective(&resolve_global(&global), mode, ""),
    };
    println!("{}", format_report(&result));
    if !result.is_valid() {
        bail!("Configuration has {} error(s)", result.error_count());
    }
    Ok(())
}

/// Displays the effective configuration as YAML.
fn show_config<P: Prompter>(cli: &Cli, paths: &ConfigPaths, prompter: &P) -> Result<()> {
    let global = paths.load_global()?;
    let config = effective_config(paths, &global, cli.domain.as_deref(), prompter)?;
    let yaml = serde_yaml::to_string(&config)?;
    println!("{}", yaml);
    Ok(())
}
